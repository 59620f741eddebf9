use thiserror::Error;

/// The result of attempting to perform an invalid operation on a [Game] or [Session].
#[derive(Error, Debug)]
pub enum GameError {
    #[error("session does not exist")]
    SessionNotFound,
    #[error("no player exists with the given name")]
    PlayerNotFound,
    #[error("a player with this name is already in the session")]
    NameTaken,
    #[error("the session is already full")]
    RoomFull,
    #[error("this action cannot be performed during this phase of the game")]
    InvalidPhase,
    #[error("this player cannot perform this action")]
    InvalidActor,
    #[error("this player cannot be targeted")]
    InvalidTarget,
    #[error("this player has already acted this cycle")]
    DuplicateAction,
    #[error("this role has already acted tonight")]
    AlreadyActed,
    #[error("too few players to deal a full set of roles")]
    InsufficientPlayers,
    #[error("could not persist the session")]
    Storage,
}
