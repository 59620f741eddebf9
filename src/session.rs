use crate::error::GameError;
use crate::event::{ChannelSink, Envelope, Event, EventSink, Target};
use crate::game::{Game, MAX_PLAYERS, MIN_PLAYERS};
use crate::time::iso8601;
use dashmap::{mapref::entry::Entry, DashMap};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::broadcast;

/// How long the lobby countdown runs before the game starts.
pub const READY_COUNTDOWN: Duration = Duration::from_secs(10);

/// Lobby capacity used when a session is created without an explicit limit.
pub const DEFAULT_MAX_PLAYERS: usize = 10;

/// Manages all the game sessions running on the server.
pub struct SessionManager {
    sessions: DashMap<String, SessionHandle>,
    dbs: Dbs,
}

/// The databases that sessions are persisted to.
#[derive(Clone)]
struct Dbs {
    db: sled::Db,
    game: sled::Tree,
    archive: sled::Tree,
}

/// A single game session.
pub struct Session {
    /// The session ID.
    id: String,
    /// The lobby, or the game itself once started.
    state: State,
    /// Where this session's events are delivered.
    sink: Arc<dyn EventSink>,
    /// Generation counter for the lobby countdown. Bumping it invalidates
    /// any timer already in flight.
    countdown: u64,
    /// The databases.
    dbs: Dbs,
    /// Timestamp of the last time this session was interacted with.
    last_ts: Instant,
}

pub type SessionHandle = Arc<Mutex<Session>>;

#[allow(clippy::large_enum_variant)]
#[derive(Serialize, Deserialize)]
enum State {
    Lobby {
        max_players: usize,
        players: Vec<LobbyPlayer>,
    },
    Playing {
        /// The game itself.
        game: Game,
        /// Timestamp that the game was started.
        started_ts: SystemTime,
        /// Whether this game has been archived.
        archived: bool,
    },
}

#[derive(Clone, Serialize, Deserialize)]
struct LobbyPlayer {
    name: String,
    ready: bool,
}

impl SessionManager {
    pub fn new(db: sled::Db) -> Result<Self, Box<dyn Error>> {
        let sessions = DashMap::new();
        let dbs = Dbs {
            db: db.clone(),
            game: db.open_tree("games")?,
            archive: db.open_tree("archive")?,
        };
        for entry in dbs.game.iter() {
            let (id, state) = entry?;
            let id = String::from_utf8(id.to_vec())?;
            let Ok(state) = serde_json::from_slice(&state) else {
                continue;
            };
            let session = Session::hydrate(id.clone(), dbs.clone(), state);
            let session = Arc::new(Mutex::new(session));
            sessions.insert(id, session);
        }
        Ok(Self { sessions, dbs })
    }

    pub fn create_session(&self, max_players: Option<usize>) -> Result<SessionHandle, GameError> {
        let max_players = max_players
            .unwrap_or(DEFAULT_MAX_PLAYERS)
            .clamp(MIN_PLAYERS, MAX_PLAYERS);
        loop {
            let id = Self::random_id();
            let entry = self.sessions.entry(id);
            if let Entry::Occupied(_) = entry {
                continue;
            }
            let mut session = Session::new(
                entry.key().clone(),
                self.dbs.clone(),
                max_players,
                Arc::new(ChannelSink::new()),
            );
            session.persist()?;
            session.sink.send(Envelope::new(
                Target::All,
                Event::GameCreated {
                    game_id: session.id.clone(),
                },
            ));
            let session = Arc::new(Mutex::new(session));
            entry.or_insert(session.clone());
            break Ok(session);
        }
    }

    pub fn find_session(&self, session_id: &str) -> Result<SessionHandle, GameError> {
        self.sessions
            .get(session_id)
            .map(|session| session.clone())
            .ok_or(GameError::SessionNotFound)
    }

    pub fn num_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Lists the archived records of finished games.
    pub fn past_games(&self) -> Vec<Value> {
        self.dbs
            .archive
            .iter()
            .filter_map(|entry| entry.ok())
            .filter_map(|(_, data)| serde_json::from_slice(&data).ok())
            .collect()
    }

    /// Removes sessions that have been idle for over an hour.
    pub fn purge_sessions(&self) {
        let mut ids_to_delete = vec![];

        // Find expired sessions
        for session in self.sessions.iter() {
            let session_id = session.key();
            let Ok(session) = session.lock() else {
                log::error!("Found poisoned session: {}", session_id);
                ids_to_delete.push(session_id.clone());
                continue;
            };
            let elapsed = Instant::now().duration_since(session.last_ts);
            if elapsed > Duration::from_secs(3600) {
                if self.dbs.game.remove(session.id().as_bytes()).is_ok() {
                    ids_to_delete.push(session_id.clone());
                } else {
                    log::error!("Could not remove session: {}", session_id);
                }
            }
        }

        for session_id in ids_to_delete.into_iter() {
            self.sessions.remove(&session_id);
        }
    }

    fn random_id() -> String {
        let mut rng = rand::thread_rng();
        (0..4).map(|_| rng.gen_range('A'..='Z')).collect()
    }
}

impl Session {
    fn new(id: String, dbs: Dbs, max_players: usize, sink: Arc<dyn EventSink>) -> Self {
        let state = State::Lobby {
            max_players,
            players: vec![],
        };
        Self {
            id,
            state,
            sink,
            countdown: 0,
            dbs,
            last_ts: Instant::now(),
        }
    }

    fn hydrate(id: String, dbs: Dbs, state: State) -> Self {
        Self {
            id,
            state,
            sink: Arc::new(ChannelSink::new()),
            countdown: 0,
            dbs,
            last_ts: Instant::now(),
        }
    }

    /// Gets the unique session ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Subscribes to this session's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sink.subscribe()
    }

    /// Adds a player to the lobby. Once the game has started, joining with a
    /// known name reattaches that player instead.
    pub fn join(&mut self, name: &str) -> Result<(), GameError> {
        match &mut self.state {
            State::Lobby {
                max_players,
                players,
            } => {
                if players.iter().any(|p| p.name == name) {
                    return Err(GameError::NameTaken);
                }
                if players.len() == *max_players {
                    return Err(GameError::RoomFull);
                }
                players.push(LobbyPlayer {
                    name: name.to_string(),
                    ready: false,
                });
                // The newcomer is not ready, so any armed start is off.
                self.countdown += 1;
                self.after_change(Event::PlayerJoined {
                    name: name.to_string(),
                })
            }
            State::Playing { game, .. } => game.find_player(name).map(|_| ()),
        }
    }

    /// Marks a player as ready. Returns the countdown generation to arm when
    /// this readiness completes the start gate.
    pub fn set_ready(&mut self, name: &str) -> Result<Option<u64>, GameError> {
        let State::Lobby { players, .. } = &mut self.state else {
            return Err(GameError::InvalidPhase);
        };
        let player = players
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or(GameError::PlayerNotFound)?;
        if player.ready {
            return Ok(None);
        }
        player.ready = true;
        let armed = players.len() >= MIN_PLAYERS && players.iter().all(|p| p.ready);

        let mut generation = None;
        if armed {
            self.countdown += 1;
            generation = Some(self.countdown);
        }
        let persisted = self.after_change(Event::PlayerReady {
            name: name.to_string(),
        });
        if armed {
            self.sink.send(Envelope::new(
                Target::All,
                Event::StartCountdown {
                    seconds: READY_COUNTDOWN.as_secs(),
                },
            ));
        }
        persisted.map(|_| generation)
    }

    /// Flips a player back to not ready, cancelling any armed countdown.
    pub fn set_unready(&mut self, name: &str) -> Result<(), GameError> {
        let State::Lobby { players, .. } = &mut self.state else {
            return Err(GameError::InvalidPhase);
        };
        let player = players
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or(GameError::PlayerNotFound)?;
        if !player.ready {
            return Ok(());
        }
        player.ready = false;
        self.countdown += 1;
        self.after_change(Event::PlayerUnready {
            name: name.to_string(),
        })
    }

    /// Removes a player from the lobby, cancelling any armed countdown.
    /// Once the game has started, a departed player keeps their seat.
    pub fn remove_player(&mut self, name: &str) -> Result<(), GameError> {
        let State::Lobby { players, .. } = &mut self.state else {
            return Ok(());
        };
        let idx = players
            .iter()
            .position(|p| p.name == name)
            .ok_or(GameError::PlayerNotFound)?;
        players.remove(idx);
        self.countdown += 1;
        self.after_change(Event::PlayerLeft {
            name: name.to_string(),
        })
    }

    /// Fires when the lobby countdown elapses. The start precondition is
    /// re-checked against current state; a stale generation or a broken gate
    /// aborts silently.
    pub fn try_start(&mut self, generation: u64) -> Result<(), GameError> {
        if generation != self.countdown {
            return Ok(());
        }
        let State::Lobby { players, .. } = &self.state else {
            return Ok(());
        };
        if players.len() < MIN_PLAYERS || !players.iter().all(|p| p.ready) {
            return Ok(());
        }

        let names: Vec<String> = players.iter().map(|p| p.name.clone()).collect();
        let seed = rand::thread_rng().next_u64();
        self.state = State::Playing {
            game: Game::new(&names, seed)?,
            started_ts: SystemTime::now(),
            archived: false,
        };

        let persisted = self.persist();
        self.sink
            .send(Envelope::new(Target::All, Event::GameStarted));
        self.notify_snapshot();
        self.flush_game_events();
        self.last_ts = Instant::now();
        persisted
    }

    /// Performs an action on the game.
    pub fn mutate_game<F>(&mut self, mutation: F) -> Result<(), GameError>
    where
        F: FnOnce(&mut Game) -> Result<(), GameError>,
    {
        let State::Playing { game, .. } = &mut self.state else {
            return Err(GameError::InvalidPhase);
        };
        mutation(game)?;

        let persisted = self.persist();
        self.notify_snapshot();
        self.flush_game_events();
        self.archive().ok();
        self.last_ts = Instant::now();
        persisted
    }

    /// Relays a chat message if the sender is allowed to talk right now.
    /// Discussion is unrestricted in the lobby and day-only once playing.
    pub fn chat(&mut self, name: &str, message: &str) -> Result<(), GameError> {
        match &self.state {
            State::Lobby { players, .. } => {
                if !players.iter().any(|p| p.name == name) {
                    return Err(GameError::PlayerNotFound);
                }
            }
            State::Playing { game, .. } => {
                let player = game.find_player(name)?;
                game.check_chat(player)?;
            }
        }
        self.sink.send(Envelope::new(
            Target::All,
            Event::ChatMessage {
                name: name.to_string(),
                message: message.to_string(),
            },
        ));
        self.last_ts = Instant::now();
        Ok(())
    }

    /// Keeps the game session alive.
    pub fn heartbeat(&mut self) {
        self.last_ts = Instant::now();
    }

    /// The public view of this session.
    pub fn get_public_json(&self) -> Value {
        match &self.state {
            State::Lobby {
                max_players,
                players,
            } => json!({
                "id": self.id,
                "state": "waiting",
                "maxPlayers": max_players,
                "players": players
                    .iter()
                    .map(|p| json!({ "name": p.name, "ready": p.ready }))
                    .collect::<Value>(),
            }),
            State::Playing { game, .. } => {
                let mut state = game.get_public_json();
                state["id"] = self.id.clone().into();
                state
            }
        }
    }

    /// The view of this session for one named player.
    pub fn get_player_json(&self, name: &str) -> Result<Value, GameError> {
        match &self.state {
            State::Lobby { .. } => Ok(self.get_public_json()),
            State::Playing { game, .. } => {
                let player = game.find_player(name)?;
                let mut state = game.get_player_json(player);
                state["id"] = self.id.clone().into();
                Ok(state)
            }
        }
    }

    /// Persists the state change, then broadcasts the updated snapshot
    /// followed by the event itself. External observers rely on this order.
    fn after_change(&mut self, event: Event) -> Result<(), GameError> {
        let persisted = self.persist();
        self.notify_snapshot();
        self.sink.send(Envelope::new(Target::All, event));
        self.last_ts = Instant::now();
        persisted
    }

    fn notify_snapshot(&self) {
        self.sink.send(Envelope::new(
            Target::All,
            Event::GameUpdated {
                snapshot: self.get_public_json(),
            },
        ));
    }

    fn flush_game_events(&mut self) {
        let State::Playing { game, .. } = &mut self.state else {
            return;
        };
        for envelope in game.take_events() {
            self.sink.send(envelope);
        }
    }

    /// Persists the session state to disk, so it can be recovered upon
    /// server restart. A failure is surfaced to the caller; the in-memory
    /// state remains the source of truth.
    fn persist(&mut self) -> Result<(), GameError> {
        let data = serde_json::to_string(&self.state).map_err(|err| {
            log::error!("Could not encode session {}: {}", self.id, err);
            GameError::Storage
        })?;
        self.dbs
            .game
            .insert(self.id.as_bytes(), data.as_bytes())
            .map_err(|err| {
                log::error!("Could not persist session {}: {}", self.id, err);
                GameError::Storage
            })?;
        Ok(())
    }

    /// Archives the game if it is over and hasn't been archived yet.
    fn archive(&mut self) -> Result<(), Box<dyn Error>> {
        let State::Playing { game, started_ts, archived } = &mut self.state else {
            return Ok(());
        };
        if game.game_over() && !*archived {
            let key = self.dbs.db.generate_id()?.to_be_bytes();
            let data = json!({
                "game_id": self.id,
                "players": game.player_names().collect::<Value>(),
                "started": iso8601(*started_ts),
                "finished": iso8601(SystemTime::now()),
                "outcome": game.get_outcome_json()
            })
            .to_string();
            self.dbs.archive.insert(key, data.as_bytes())?;
            *archived = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// A sink that records every delivered envelope, for assertions.
    struct RecordingSink {
        tx: broadcast::Sender<Envelope>,
        sent: Mutex<Vec<Envelope>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                tx: broadcast::channel(64).0,
                sent: Mutex::new(vec![]),
            })
        }

        fn events(&self) -> Vec<Event> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|e| e.event.clone())
                .collect()
        }
    }

    impl EventSink for RecordingSink {
        fn send(&self, envelope: Envelope) {
            self.sent.lock().unwrap().push(envelope.clone());
            self.tx.send(envelope).ok();
        }

        fn subscribe(&self) -> broadcast::Receiver<Envelope> {
            self.tx.subscribe()
        }
    }

    fn test_dbs() -> Dbs {
        let db = sled::Config::new().temporary(true).open().unwrap();
        Dbs {
            game: db.open_tree("games").unwrap(),
            archive: db.open_tree("archive").unwrap(),
            db,
        }
    }

    fn lobby_of(names: &[&str], max_players: usize) -> (Session, Arc<RecordingSink>) {
        let sink = RecordingSink::new();
        let mut session = Session::new("TEST".into(), test_dbs(), max_players, sink.clone());
        for name in names {
            session.join(name).unwrap();
        }
        (session, sink)
    }

    fn ready_all(session: &mut Session, names: &[&str]) -> Option<u64> {
        let mut generation = None;
        for name in names {
            generation = session.set_ready(name).unwrap();
        }
        generation
    }

    const FIVE: [&str; 5] = ["Alex", "Bob", "Charlie", "David", "Ed"];

    #[test]
    fn countdown_arms_only_when_everyone_is_ready() {
        let (mut session, sink) = lobby_of(&FIVE, 10);
        for name in &FIVE[..4] {
            assert!(session.set_ready(name).unwrap().is_none());
        }
        let generation = session.set_ready("Ed").unwrap();
        assert!(generation.is_some());
        assert!(sink
            .events()
            .contains(&Event::StartCountdown { seconds: 10 }));
    }

    #[test]
    fn countdown_does_not_arm_below_minimum() {
        let four = ["Alex", "Bob", "Charlie", "David"];
        let (mut session, _sink) = lobby_of(&four, 10);
        assert!(ready_all(&mut session, &four).is_none());
    }

    #[test]
    fn stale_countdown_is_a_noop() {
        let (mut session, _sink) = lobby_of(&FIVE, 10);
        let generation = ready_all(&mut session, &FIVE).unwrap();
        session.set_unready("Charlie").unwrap();
        session.try_start(generation).unwrap();
        assert!(matches!(session.state, State::Lobby { .. }));
    }

    #[test]
    fn recheck_happens_at_fire_time_not_schedule_time() {
        let (mut session, _sink) = lobby_of(&FIVE, 10);
        let generation = ready_all(&mut session, &FIVE).unwrap();
        // The gate was intact when the timer was armed, but breaks before it
        // fires; the re-check must see current state.
        session.remove_player("Ed").unwrap();
        session.try_start(generation).unwrap();
        assert!(matches!(session.state, State::Lobby { .. }));
        // Re-completing the gate arms a fresh generation that does fire.
        session.join("Frank").unwrap();
        let generation = session.set_ready("Frank").unwrap().unwrap();
        session.try_start(generation).unwrap();
        assert!(matches!(session.state, State::Playing { .. }));
    }

    #[test]
    fn starting_deals_roles_and_announces_the_night() {
        let (mut session, sink) = lobby_of(&FIVE, 10);
        let generation = ready_all(&mut session, &FIVE).unwrap();
        session.try_start(generation).unwrap();

        let events = sink.events();
        assert!(events.contains(&Event::GameStarted));
        let roles = events
            .iter()
            .filter(|e| matches!(e, Event::PrivateRole { .. }))
            .count();
        assert_eq!(roles, 5);
        assert!(events.contains(&Event::PhaseChanged {
            phase: "nightMafia",
            last_killed: None
        }));
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let (mut session, _sink) = lobby_of(&["Alex"], 10);
        assert!(matches!(session.join("Alex"), Err(GameError::NameTaken)));
    }

    #[test]
    fn full_lobby_is_rejected() {
        let (mut session, _sink) = lobby_of(&FIVE, 5);
        assert!(matches!(session.join("Frank"), Err(GameError::RoomFull)));
    }

    #[test]
    fn snapshot_precedes_the_lobby_event() {
        let (mut session, sink) = lobby_of(&[], 10);
        session.join("Alex").unwrap();
        let events = sink.events();
        let snapshot = events
            .iter()
            .position(|e| matches!(e, Event::GameUpdated { .. }))
            .unwrap();
        let joined = events
            .iter()
            .position(|e| matches!(e, Event::PlayerJoined { .. }))
            .unwrap();
        assert!(snapshot < joined);
    }

    #[test]
    fn started_game_allows_reattach_by_name_only() {
        let (mut session, _sink) = lobby_of(&FIVE, 10);
        let generation = ready_all(&mut session, &FIVE).unwrap();
        session.try_start(generation).unwrap();

        assert!(session.join("Alex").is_ok());
        assert!(matches!(
            session.join("Mallory"),
            Err(GameError::PlayerNotFound)
        ));
    }

    #[test]
    fn persisted_session_hydrates_to_the_same_state() {
        let (mut session, _sink) = lobby_of(&FIVE, 10);
        let generation = ready_all(&mut session, &FIVE).unwrap();
        session.try_start(generation).unwrap();

        let data = session.dbs.game.get(b"TEST").unwrap().unwrap();
        let state: State = serde_json::from_slice(&data).unwrap();
        let copy = Session::hydrate("TEST".into(), session.dbs.clone(), state);
        assert_eq!(copy.get_public_json(), session.get_public_json());
    }
}
