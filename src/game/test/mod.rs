//! Tests for the Mafia game core.

#![cfg(test)]
#![allow(clippy::bool_assert_comparison)]

pub mod state_transitions;
pub mod test_utils;
