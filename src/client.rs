use crate::{
    error::GameError,
    event::Envelope,
    game::Game,
    session::{SessionHandle, SessionManager, READY_COUNTDOWN},
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

/// A single connected client, tied to at most one session and player.
pub struct Client<'a> {
    manager: &'a SessionManager,
    session: Option<SessionHandle>,
    game_id: Option<String>,
    player: Option<String>,
    events: Option<broadcast::Receiver<Envelope>>,
}

impl<'a> Client<'a> {
    /// Creates a new game client.
    pub fn new(manager: &'a SessionManager) -> Self {
        Self {
            manager,
            session: None,
            game_id: None,
            player: None,
            events: None,
        }
    }

    /// Creates a new game session, returning its ID.
    pub fn create_session(&mut self, max_players: Option<usize>) -> Result<String, GameError> {
        let session = self.manager.create_session(max_players)?;
        let id = session.lock().unwrap().id().to_owned();
        Ok(id)
    }

    /// Joins a session as a player.
    pub fn join(&mut self, game_id: &str, name: &str) -> Result<(), GameError> {
        let session = self.manager.find_session(game_id)?;
        {
            let mut session = session.lock().unwrap();
            session.join(name)?;
            self.events = Some(session.subscribe());
        }
        self.player = Some(name.to_string());
        self.game_id = Some(game_id.to_string());
        self.session = Some(session);
        Ok(())
    }

    /// Marks this player as ready. When their readiness completes the start
    /// gate, the countdown timer is armed: it sleeps without holding the
    /// session lock, then re-checks the gate against live state.
    pub fn set_ready(&self) -> Result<(), GameError> {
        let name = self.player()?;
        let session = self.session()?;
        let armed = session.lock().unwrap().set_ready(&name)?;

        if let Some(generation) = armed {
            let handle = Arc::clone(session);
            tokio::spawn(async move {
                tokio::time::sleep(READY_COUNTDOWN).await;
                let result = handle.lock().unwrap().try_start(generation);
                if let Err(err) = result {
                    log::error!("Could not start game: {}", err);
                }
            });
        }
        Ok(())
    }

    /// Marks this player as not ready, cancelling a pending start.
    pub fn set_unready(&self) -> Result<(), GameError> {
        let name = self.player()?;
        self.session()?.lock().unwrap().set_unready(&name)
    }

    /// Casts this player's mafia kill vote.
    pub fn cast_mafia_vote(&self, target: &str) -> Result<(), GameError> {
        let name = self.player()?;
        self.mutate_game(|game| {
            let voter = game.find_player(&name)?;
            let target = game
                .find_player(target)
                .map_err(|_| GameError::InvalidTarget)?;
            game.cast_mafia_vote(voter, target)
        })
    }

    /// Investigates a player as the detective.
    pub fn investigate(&self, target: &str) -> Result<(), GameError> {
        let name = self.player()?;
        self.mutate_game(|game| {
            let player = game.find_player(&name)?;
            let target = game
                .find_player(target)
                .map_err(|_| GameError::InvalidTarget)?;
            game.investigate(player, target)
        })
    }

    /// Chooses who the doctor protects tonight.
    pub fn doctor_save(&self, target: &str) -> Result<(), GameError> {
        let name = self.player()?;
        self.mutate_game(|game| {
            let doctor = game.find_player(&name)?;
            let target = game
                .find_player(target)
                .map_err(|_| GameError::InvalidTarget)?;
            game.save_player(doctor, target)
        })
    }

    /// Casts this player's day elimination vote.
    pub fn cast_day_vote(&self, target: &str) -> Result<(), GameError> {
        let name = self.player()?;
        self.mutate_game(|game| {
            let voter = game.find_player(&name)?;
            let target = game
                .find_player(target)
                .map_err(|_| GameError::InvalidTarget)?;
            game.cast_day_vote(voter, target)
        })
    }

    /// Sends a chat message to the session, if discussion is open.
    pub fn chat(&self, message: &str) -> Result<(), GameError> {
        let name = self.player()?;
        self.session()?.lock().unwrap().chat(&name, message)
    }

    /// The current session state, from this player's point of view.
    pub fn state(&self) -> Result<Value, GameError> {
        let name = self.player()?;
        self.session()?.lock().unwrap().get_player_json(&name)
    }

    /// Waits until there is an event for this player, then returns it.
    pub async fn next_event(&mut self) -> Value {
        let Some(events) = &mut self.events else {
            return std::future::pending().await;
        };
        loop {
            match events.recv().await {
                Ok(envelope) if envelope.is_for(self.player.as_deref()) => {
                    return serde_json::to_value(&envelope.event).unwrap_or(Value::Null);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    return std::future::pending().await;
                }
            }
        }
    }

    /// Keeps the game session alive.
    pub fn heartbeat(&self) {
        let Some(session) = &self.session else {
            return;
        };
        let mut session = session.lock().unwrap();
        session.heartbeat();
    }

    /// Leaves the session. A lobby player gives up their spot; a player in a
    /// running game keeps their seat and may reattach later.
    pub fn leave(&mut self) {
        if let (Some(session), Some(name)) = (&self.session, &self.player) {
            if let Ok(mut session) = session.lock() {
                session.remove_player(name).ok();
            }
        }
        self.session = None;
        self.game_id = None;
        self.player = None;
        self.events = None;
    }

    /// Performs an action on the game.
    fn mutate_game<F>(&self, mutation: F) -> Result<(), GameError>
    where
        F: FnOnce(&mut Game) -> Result<(), GameError>,
    {
        let session = self.session()?;
        let mut session = session.lock().unwrap();
        session.mutate_game(mutation)
    }

    fn session(&self) -> Result<&SessionHandle, GameError> {
        self.session.as_ref().ok_or(GameError::SessionNotFound)
    }

    fn player(&self) -> Result<String, GameError> {
        self.player.clone().ok_or(GameError::PlayerNotFound)
    }
}
