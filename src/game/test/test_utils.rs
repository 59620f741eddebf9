//! Test utilities and helper functions.

use super::super::player::{Player, Role};
use super::super::votes::Votes;
use super::super::{Game, Phase};

/// Creates a game with the given named roles, already in the mafia night phase.
pub fn game_with_roles(roles: &[(&str, Role)]) -> Game {
    Game {
        players: roles
            .iter()
            .map(|(name, role)| Player::new(name.to_string(), *role))
            .collect(),
        phase: Phase::NightMafia,
        mafia_votes: Votes::new(),
        day_votes: Votes::new(),
        mafia_target: None,
        detective_result: None,
        doctor_save: None,
        last_killed: None,
        outbox: vec![],
    }
}

/// A standard 5-player town: one mafioso, detective, doctor, two villagers.
pub fn standard_five() -> Game {
    game_with_roles(&[
        ("Alex", Role::Mafia),
        ("Bob", Role::Detective),
        ("Charlie", Role::Doctor),
        ("David", Role::Villager),
        ("Ed", Role::Villager),
    ])
}

/// A wider town with one mafioso and four villagers.
pub fn standard_seven() -> Game {
    game_with_roles(&[
        ("Alex", Role::Mafia),
        ("Bob", Role::Detective),
        ("Charlie", Role::Doctor),
        ("David", Role::Villager),
        ("Ed", Role::Villager),
        ("Frank", Role::Villager),
        ("Grace", Role::Villager),
    ])
}

pub fn idx(game: &Game, name: &str) -> usize {
    game.find_player(name).unwrap()
}

pub fn kill(game: &mut Game, name: &str) {
    let idx = idx(game, name);
    game.players[idx].alive = false;
}

pub fn alive(game: &Game, name: &str) -> bool {
    game.players[idx(game, name)].alive
}
