use crate::error::GameError;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// A game player.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Player {
    pub name: String,
    pub role: Role,
    pub alive: bool,
}

#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Debug)]
pub enum Role {
    Villager,
    Mafia,
    Godfather,
    Detective,
    Doctor,
}

impl Role {
    /// Whether this role belongs to the mafia faction.
    pub fn is_mafia(&self) -> bool {
        matches!(self, Role::Mafia | Role::Godfather)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Villager => "villager",
            Role::Mafia => "mafia",
            Role::Godfather => "godfather",
            Role::Detective => "detective",
            Role::Doctor => "doctor",
        }
    }
}

impl Player {
    pub fn new(name: String, role: Role) -> Self {
        Self {
            name,
            role,
            alive: true,
        }
    }
}

/// Builds the role multiset for the given head count and deals it out in a
/// uniformly random order. The multiset is fixed by the head count; only who
/// holds each role is random, and players keep their join order.
pub fn assign_roles(num_players: usize, rng: &mut impl rand::Rng) -> Result<Vec<Role>, GameError> {
    let num_mafia = num_players / 3;
    let num_godfathers = usize::from(num_mafia > 1);
    let num_regulars = num_mafia - num_godfathers;

    // One detective and one doctor are always dealt, so a very small lobby
    // cannot field a full role set.
    let num_villagers = num_players
        .checked_sub(num_regulars + num_godfathers + 2)
        .ok_or(GameError::InsufficientPlayers)?;

    let mut roles = Vec::with_capacity(num_players);
    roles.extend(std::iter::repeat(Role::Mafia).take(num_regulars));
    roles.extend(std::iter::repeat(Role::Godfather).take(num_godfathers));
    roles.push(Role::Detective);
    roles.push(Role::Doctor);
    roles.extend(std::iter::repeat(Role::Villager).take(num_villagers));
    roles.shuffle(rng);
    Ok(roles)
}
