//! Tests walking complete games through the phase cycle.

use super::super::player::Role;
use super::super::{Phase, Winner};
use super::test_utils::*;
use crate::event::Event;

/// Extracts the phase announcements from a batch of events, in order.
fn phases(events: &[crate::event::Envelope]) -> Vec<&'static str> {
    events
        .iter()
        .filter_map(|env| match env.event {
            Event::PhaseChanged { phase, .. } => Some(phase),
            _ => None,
        })
        .collect()
}

#[test]
fn a_full_game_runs_night_day_night_to_a_verdict() {
    let mut game = standard_five();
    let (alex, bob, charlie, david, ed) = (
        idx(&game, "Alex"),
        idx(&game, "Bob"),
        idx(&game, "Charlie"),
        idx(&game, "David"),
        idx(&game, "Ed"),
    );

    // Night one: the lone mafioso marks David.
    game.cast_mafia_vote(alex, david).unwrap();
    assert_eq!(game.phase, Phase::NightDetective);

    // The detective fingers Alex.
    game.investigate(bob, alex).unwrap();
    assert_eq!(game.detective_result, Some(true));
    assert_eq!(game.phase, Phase::NightDoctor);

    // The doctor guards themselves; David is not so lucky.
    game.save_player(charlie, charlie).unwrap();
    assert_eq!(game.phase, Phase::Day);
    assert!(!alive(&game, "David"));

    // Day one: the town convicts Alex on the detective's word.
    game.cast_day_vote(bob, alex).unwrap();
    game.cast_day_vote(charlie, alex).unwrap();
    game.cast_day_vote(ed, alex).unwrap();
    game.cast_day_vote(alex, bob).unwrap();

    assert!(!alive(&game, "Alex"));
    assert_eq!(game.winner(), Some(Winner::Villagers));

    let events = game.take_events();
    assert_eq!(
        phases(&events),
        vec!["nightDetective", "nightDoctor", "day", "finished"]
    );
}

#[test]
fn the_day_announcement_carries_the_casualty() {
    let mut game = standard_five();
    let (alex, bob, charlie, ed) = (
        idx(&game, "Alex"),
        idx(&game, "Bob"),
        idx(&game, "Charlie"),
        idx(&game, "Ed"),
    );
    game.take_events();

    game.cast_mafia_vote(alex, ed).unwrap();
    game.investigate(bob, charlie).unwrap();
    game.save_player(charlie, bob).unwrap();

    let events = game.take_events();
    assert!(events.iter().any(|env| env.event
        == Event::PhaseChanged {
            phase: "day",
            last_killed: Some("Ed".to_string()),
        }));
    // Consumed on announcement: a later day would not repeat it.
    assert_eq!(game.last_killed, None);
}

#[test]
fn dead_special_roles_collapse_the_night() {
    let mut game = standard_seven();
    kill(&mut game, "Bob");
    kill(&mut game, "Charlie");
    let (alex, david) = (idx(&game, "Alex"), idx(&game, "David"));
    game.take_events();

    game.cast_mafia_vote(alex, david).unwrap();

    // With no detective and no doctor, the only announcement is the day.
    let events = game.take_events();
    assert_eq!(phases(&events), vec!["day"]);
    assert_eq!(game.phase, Phase::Day);
}

#[test]
fn the_cycle_repeats_until_a_verdict_is_reached() {
    let mut game = game_with_roles(&[
        ("Alex", Role::Mafia),
        ("Bob", Role::Detective),
        ("Charlie", Role::Doctor),
        ("David", Role::Villager),
        ("Ed", Role::Villager),
        ("Frank", Role::Villager),
        ("Grace", Role::Villager),
    ]);
    let (alex, bob, charlie) = (idx(&game, "Alex"), idx(&game, "Bob"), idx(&game, "Charlie"));

    // Night one: Frank dies.
    game.cast_mafia_vote(alex, idx(&game, "Frank")).unwrap();
    game.investigate(bob, idx(&game, "David")).unwrap();
    game.save_player(charlie, charlie).unwrap();
    assert!(!alive(&game, "Frank"));

    // Day one: the town cannot agree, 2-2-2 spares everyone.
    let (david, ed, grace) = (idx(&game, "David"), idx(&game, "Ed"), idx(&game, "Grace"));
    game.cast_day_vote(alex, david).unwrap();
    game.cast_day_vote(bob, david).unwrap();
    game.cast_day_vote(charlie, ed).unwrap();
    game.cast_day_vote(david, ed).unwrap();
    game.cast_day_vote(ed, grace).unwrap();
    game.cast_day_vote(grace, grace).unwrap();
    assert_eq!(game.num_alive(), 6);
    assert_eq!(game.phase, Phase::NightMafia);

    // Night two opens with a clean slate.
    assert_eq!(game.mafia_votes.count(), 0);
    assert_eq!(game.detective_result, None);
    assert_eq!(game.doctor_save, None);

    // Night two: Grace dies.
    game.cast_mafia_vote(alex, grace).unwrap();
    game.investigate(bob, alex).unwrap();
    game.save_player(charlie, bob).unwrap();
    assert!(!alive(&game, "Grace"));
    assert_eq!(game.phase, Phase::Day);

    // Day two: the detective's report convicts Alex.
    game.cast_day_vote(bob, alex).unwrap();
    game.cast_day_vote(charlie, alex).unwrap();
    game.cast_day_vote(david, alex).unwrap();
    game.cast_day_vote(ed, alex).unwrap();
    game.cast_day_vote(alex, bob).unwrap();

    assert_eq!(game.winner(), Some(Winner::Villagers));
}

#[test]
fn a_dealt_game_survives_a_serde_round_trip() {
    let names: Vec<_> = (1..=8).map(|i| format!("Player{i}")).collect();
    let mut game = super::super::Game::new(&names, 99).unwrap();
    game.take_events();

    let json = serde_json::to_string(&game).unwrap();
    let mut restored: super::super::Game = serde_json::from_str(&json).unwrap();

    assert_eq!(restored.phase, game.phase);
    assert_eq!(
        restored.player_names().collect::<Vec<_>>(),
        game.player_names().collect::<Vec<_>>()
    );
    // The event outbox is transient and comes back empty.
    assert!(restored.take_events().is_empty());
}
