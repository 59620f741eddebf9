use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// Where an event is delivered: the whole session, or a named set of players
/// (a single recipient, or one faction).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    All,
    Names(Vec<String>),
}

/// An event together with its delivery target.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub target: Target,
    pub event: Event,
}

impl Envelope {
    pub fn new(target: Target, event: Event) -> Self {
        Self { target, event }
    }

    /// Whether this event should be delivered to the given player.
    /// Spectators (no name) only receive session-wide events.
    pub fn is_for(&self, name: Option<&str>) -> bool {
        match &self.target {
            Target::All => true,
            Target::Names(names) => name.map_or(false, |n| names.iter().any(|m| m == n)),
        }
    }
}

/// An event emitted by a game session.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Event {
    GameCreated {
        #[serde(rename = "gameId")]
        game_id: String,
    },
    PlayerJoined {
        name: String,
    },
    PlayerReady {
        name: String,
    },
    PlayerUnready {
        name: String,
    },
    PlayerLeft {
        name: String,
    },
    StartCountdown {
        seconds: u64,
    },
    GameStarted,
    /// Sent to a single player when they are dealt their role.
    PrivateRole {
        role: String,
    },
    /// Sent to the mafia faction only.
    MafiaGang {
        names: Vec<String>,
    },
    /// Sent to the mafia faction only.
    MafiaVoteCast {
        voter: String,
        target: String,
    },
    /// Sent to the detective only.
    InvestigationResult {
        target: String,
        result: bool,
    },
    PhaseChanged {
        phase: &'static str,
        #[serde(rename = "lastKilled")]
        last_killed: Option<String>,
    },
    PlayerEliminated {
        name: String,
        #[serde(rename = "killedBy")]
        killed_by: &'static str,
    },
    NightResult {
        message: String,
    },
    DayVoteResult {
        eliminated: Option<String>,
    },
    ChatMessage {
        name: String,
        message: String,
    },
    GameOver {
        winner: &'static str,
        #[serde(rename = "mafiaGang")]
        mafia_gang: Vec<String>,
    },
    GameUpdated {
        snapshot: Value,
    },
}

/// Sink for outbound session events. Each session is handed one at
/// construction, so tests can substitute a recording fake.
pub trait EventSink: Send + Sync {
    /// Fire-and-forget delivery; the sink never reports failures back.
    fn send(&self, envelope: Envelope);

    /// Subscribes to the live event stream of this session.
    fn subscribe(&self) -> broadcast::Receiver<Envelope>;
}

/// The production sink: a broadcast channel that connected clients subscribe to.
pub struct ChannelSink {
    tx: broadcast::Sender<Envelope>,
}

impl ChannelSink {
    pub fn new() -> Self {
        Self {
            tx: broadcast::channel(64).0,
        }
    }
}

impl Default for ChannelSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for ChannelSink {
    fn send(&self, envelope: Envelope) {
        // A send only fails when nobody is subscribed, which is fine.
        self.tx.send(envelope).ok();
    }

    fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}
