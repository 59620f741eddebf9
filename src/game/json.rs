use super::Game;
use serde_json::{json, Value};

impl Game {
    /// The public view of the game: everything except roles.
    pub fn get_public_json(&self) -> Value {
        json!({
            "state": if self.game_over() { "finished" } else { "inProgress" },
            "phase": self.phase.name(),
            "players": self.get_players_json(),
        })
    }

    /// The private view for one player: the public view plus their own role,
    /// and the gang roster if they are mafia.
    pub fn get_player_json(&self, player: usize) -> Value {
        let me = &self.players[player];
        json!({
            "state": if self.game_over() { "finished" } else { "inProgress" },
            "phase": self.phase.name(),
            "name": me.name,
            "role": me.role.as_str(),
            "isDead": !me.alive,
            "mafiaGang": me.role.is_mafia().then(|| self.mafia_roster()),
            "players": self.get_players_json(),
        })
    }

    fn get_players_json(&self) -> Value {
        self.players
            .iter()
            .map(|p| {
                json!({
                    "name": p.name,
                    "isDead": !p.alive
                })
            })
            .collect()
    }

    /// The outcome record archived once the game is over.
    pub fn get_outcome_json(&self) -> Value {
        json!({
            "winner": self.winner().map(|w| w.as_str()),
            "mafiaGang": self.mafia_roster(),
        })
    }
}
