use self::player::{assign_roles, Player, Role};
use self::votes::Votes;
use crate::error::GameError;
use crate::event::{Envelope, Event, Target};
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

mod json;
mod player;
mod test;
mod votes;

/// The minimum number of players needed to start a game.
pub const MIN_PLAYERS: usize = 5;

/// The maximum number of players a session will admit.
pub const MAX_PLAYERS: usize = 16;

/// A game of Mafia.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Game {
    players: Vec<Player>,
    phase: Phase,
    /// Ledger of mafia kill votes for the current night.
    mafia_votes: Votes,
    /// Ledger of elimination votes for the current day.
    day_votes: Votes,
    /// The kill chosen by the mafia tonight.
    mafia_target: Option<usize>,
    /// The result of tonight's investigation, if one has been made.
    detective_result: Option<bool>,
    /// The player protected by the doctor tonight.
    doctor_save: Option<usize>,
    /// Who died last night; consumed when the day phase is announced.
    last_killed: Option<usize>,
    /// Events produced by the latest mutation, drained by the session.
    #[serde(skip)]
    outbox: Vec<Envelope>,
}

/// Represents the current phase in the game loop.
#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Debug)]
pub enum Phase {
    NightMafia,
    NightDetective,
    NightDoctor,
    Day,
    GameOver(Winner),
}

#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Debug)]
pub enum Winner {
    Villagers,
    Mafia,
}

impl Phase {
    fn name(&self) -> &'static str {
        match self {
            Phase::NightMafia => "nightMafia",
            Phase::NightDetective => "nightDetective",
            Phase::NightDoctor => "nightDoctor",
            Phase::Day => "day",
            Phase::GameOver(_) => "finished",
        }
    }
}

impl Winner {
    pub fn as_str(&self) -> &'static str {
        match self {
            Winner::Villagers => "villagers",
            Winner::Mafia => "mafia",
        }
    }
}

impl Game {
    /// Creates a new game of Mafia, dealing roles to the players in join order.
    pub fn new(player_names: &[String], seed: u64) -> Result<Self, GameError> {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
        let roles = assign_roles(player_names.len(), &mut rng)?;
        let players = player_names
            .iter()
            .zip(roles)
            .map(|(name, role)| Player::new(name.clone(), role))
            .collect::<Vec<_>>();

        let mut game = Game {
            players,
            phase: Phase::NightMafia,
            mafia_votes: Votes::new(),
            day_votes: Votes::new(),
            mafia_target: None,
            detective_result: None,
            doctor_save: None,
            last_killed: None,
            outbox: vec![],
        };

        // Each player privately learns only their own role.
        for player in game.players.clone() {
            game.send(
                Target::Names(vec![player.name]),
                Event::PrivateRole {
                    role: player.role.as_str().to_string(),
                },
            );
        }

        // The mafia additionally learn who their teammates are, by name only.
        let gang = game.mafia_roster();
        game.send(Target::Names(gang.clone()), Event::MafiaGang { names: gang });

        game.advance(Phase::NightMafia);
        Ok(game)
    }

    /// Gets the player names, in join order.
    pub fn player_names(&self) -> impl Iterator<Item = &'_ str> {
        self.players.iter().map(|p| &p.name[..])
    }

    /// Finds a player with the given name.
    pub fn find_player(&self, name: &str) -> Result<usize, GameError> {
        self.players
            .iter()
            .position(|p| p.name == name)
            .ok_or(GameError::PlayerNotFound)
    }

    pub fn num_players(&self) -> usize {
        self.players.len()
    }

    /// Whether the game has reached its terminal phase.
    pub fn game_over(&self) -> bool {
        matches!(self.phase, Phase::GameOver(_))
    }

    pub fn winner(&self) -> Option<Winner> {
        match self.phase {
            Phase::GameOver(winner) => Some(winner),
            _ => None,
        }
    }

    /// Called when a mafia member votes for tonight's kill.
    pub fn cast_mafia_vote(&mut self, voter: usize, target: usize) -> Result<(), GameError> {
        if self.phase != Phase::NightMafia {
            return Err(GameError::InvalidPhase);
        }
        let actor = self.players.get(voter).ok_or(GameError::PlayerNotFound)?;
        if !actor.alive || !actor.role.is_mafia() {
            return Err(GameError::InvalidActor);
        }
        let victim = self.players.get(target).ok_or(GameError::InvalidTarget)?;
        if !victim.alive {
            return Err(GameError::InvalidTarget);
        }
        let (voter_name, target_name) = (actor.name.clone(), victim.name.clone());

        self.mafia_votes.cast(voter, target)?;

        // Every living mafia member sees every cast vote.
        self.send(
            Target::Names(self.living_mafia()),
            Event::MafiaVoteCast {
                voter: voter_name,
                target: target_name,
            },
        );

        // Resolution waits for every living mafia member, counted afresh.
        if self.mafia_votes.count() == self.eligible_mafia_count() {
            self.mafia_target = self.mafia_votes.majority_latest();
            self.advance(Phase::NightDetective);
        }
        Ok(())
    }

    /// Called when the detective investigates a player.
    pub fn investigate(&mut self, player: usize, target: usize) -> Result<(), GameError> {
        if self.phase != Phase::NightDetective {
            return Err(GameError::InvalidPhase);
        }
        let actor = self.players.get(player).ok_or(GameError::PlayerNotFound)?;
        if !actor.alive || actor.role != Role::Detective {
            return Err(GameError::InvalidActor);
        }
        if self.detective_result.is_some() {
            return Err(GameError::AlreadyActed);
        }
        let suspect = self.players.get(target).ok_or(GameError::InvalidTarget)?;
        if !suspect.alive {
            return Err(GameError::InvalidTarget);
        }

        // The godfather reads as an innocent; only a plain mafioso is exposed.
        let result = suspect.role == Role::Mafia;
        let (actor_name, target_name) = (actor.name.clone(), suspect.name.clone());
        self.detective_result = Some(result);
        self.send(
            Target::Names(vec![actor_name]),
            Event::InvestigationResult {
                target: target_name,
                result,
            },
        );

        // A single actor with a single action: nothing more to wait for.
        self.advance(Phase::NightDoctor);
        Ok(())
    }

    /// Called when the doctor chooses who to protect tonight.
    /// Protecting themselves is allowed.
    pub fn save_player(&mut self, doctor: usize, target: usize) -> Result<(), GameError> {
        if self.phase != Phase::NightDoctor {
            return Err(GameError::InvalidPhase);
        }
        let actor = self.players.get(doctor).ok_or(GameError::PlayerNotFound)?;
        if !actor.alive || actor.role != Role::Doctor {
            return Err(GameError::InvalidActor);
        }
        if self.doctor_save.is_some() {
            return Err(GameError::AlreadyActed);
        }
        let patient = self.players.get(target).ok_or(GameError::InvalidTarget)?;
        if !patient.alive {
            return Err(GameError::InvalidTarget);
        }

        self.doctor_save = Some(target);
        self.resolve_night();
        self.advance(Phase::Day);
        Ok(())
    }

    /// Called when a player votes to eliminate someone during the day.
    pub fn cast_day_vote(&mut self, voter: usize, target: usize) -> Result<(), GameError> {
        if self.phase != Phase::Day {
            return Err(GameError::InvalidPhase);
        }
        let actor = self.players.get(voter).ok_or(GameError::PlayerNotFound)?;
        if !actor.alive {
            return Err(GameError::InvalidActor);
        }
        let accused = self.players.get(target).ok_or(GameError::InvalidTarget)?;
        if !accused.alive {
            return Err(GameError::InvalidTarget);
        }

        self.day_votes.cast(voter, target)?;

        if self.day_votes.count() == self.num_alive() {
            self.resolve_day();
        }
        Ok(())
    }

    /// Checks whether a player may talk right now: public discussion is open
    /// to living players during the day only.
    pub fn check_chat(&self, player: usize) -> Result<(), GameError> {
        let actor = self.players.get(player).ok_or(GameError::PlayerNotFound)?;
        if !actor.alive {
            return Err(GameError::InvalidActor);
        }
        if self.phase != Phase::Day {
            return Err(GameError::InvalidPhase);
        }
        Ok(())
    }

    /// Moves the game into the requested phase, skipping phases that have no
    /// eligible actor. Expressed as a loop over a transition table so the
    /// skip chain always terminates.
    fn advance(&mut self, requested: Phase) {
        let mut next = requested;
        loop {
            match next {
                Phase::NightMafia => {
                    // A new cycle begins with empty scratch state.
                    self.mafia_votes.clear();
                    self.mafia_target = None;
                    self.detective_result = None;
                    self.doctor_save = None;
                    if self.eligible_mafia_count() == 0 {
                        next = Phase::NightDetective;
                        continue;
                    }
                    self.phase = next;
                    // The "city sleeps" signal: discussion closes.
                    self.send(
                        Target::All,
                        Event::PhaseChanged {
                            phase: next.name(),
                            last_killed: None,
                        },
                    );
                    return;
                }
                Phase::NightDetective => {
                    if self.living_role(Role::Detective).is_none() {
                        next = Phase::NightDoctor;
                        continue;
                    }
                    self.phase = next;
                    self.send(
                        Target::All,
                        Event::PhaseChanged {
                            phase: next.name(),
                            last_killed: None,
                        },
                    );
                    return;
                }
                Phase::NightDoctor => {
                    if self.living_role(Role::Doctor).is_none() {
                        self.resolve_night();
                        next = Phase::Day;
                        continue;
                    }
                    self.phase = next;
                    self.send(
                        Target::All,
                        Event::PhaseChanged {
                            phase: next.name(),
                            last_killed: None,
                        },
                    );
                    return;
                }
                Phase::Day => {
                    if let Some(winner) = self.evaluate_win() {
                        next = Phase::GameOver(winner);
                        continue;
                    }
                    self.phase = next;
                    // Announcing the day opens the discussion channel and
                    // consumes last night's casualty.
                    let last_killed = self
                        .last_killed
                        .take()
                        .map(|idx| self.players[idx].name.clone());
                    self.send(
                        Target::All,
                        Event::PhaseChanged {
                            phase: next.name(),
                            last_killed,
                        },
                    );
                    return;
                }
                Phase::GameOver(winner) => {
                    self.phase = next;
                    self.send(
                        Target::All,
                        Event::PhaseChanged {
                            phase: next.name(),
                            last_killed: None,
                        },
                    );
                    self.send(
                        Target::All,
                        Event::GameOver {
                            winner: winner.as_str(),
                            mafia_gang: self.mafia_roster(),
                        },
                    );
                    return;
                }
            }
        }
    }

    /// Applies the night's actions. Scratch state is consumed with `take`,
    /// so replaying a resolution is a no-op.
    fn resolve_night(&mut self) {
        let target = self.mafia_target.take();
        let saved = self.doctor_save.take();
        self.detective_result = None;
        self.mafia_votes.clear();

        let Some(target) = target else {
            return;
        };
        if saved == Some(target) {
            self.send(
                Target::All,
                Event::NightResult {
                    message: "The doctor was on duty: nobody died tonight".to_string(),
                },
            );
            return;
        }
        if !self.players[target].alive {
            return;
        }
        self.players[target].alive = false;
        self.last_killed = Some(target);
        let name = self.players[target].name.clone();
        self.send(
            Target::All,
            Event::PlayerEliminated {
                name: name.clone(),
                killed_by: "mafia",
            },
        );
        self.send(
            Target::All,
            Event::NightResult {
                message: format!("{name} was killed in the night"),
            },
        );
    }

    /// Tallies the day vote and eliminates the leading candidate if they
    /// reached the majority threshold.
    fn resolve_day(&mut self) {
        let alive = self.num_alive();
        let threshold = (alive + 1) / 2;
        let leader = self.day_votes.tally_leader(self.players.len());
        self.day_votes.clear();

        let mut eliminated = None;
        if let Some((target, count)) = leader {
            if count >= threshold && self.players[target].alive {
                self.players[target].alive = false;
                let name = self.players[target].name.clone();
                self.send(
                    Target::All,
                    Event::PlayerEliminated {
                        name: name.clone(),
                        killed_by: "vote",
                    },
                );
                eliminated = Some(name);
            }
        }
        self.send(Target::All, Event::DayVoteResult { eliminated });

        match self.evaluate_win() {
            Some(winner) => self.advance(Phase::GameOver(winner)),
            None => self.advance(Phase::NightMafia),
        }
    }

    /// Compares faction head counts and produces a verdict, if any.
    fn evaluate_win(&self) -> Option<Winner> {
        let mafia = self.eligible_mafia_count();
        let town = self
            .players
            .iter()
            .filter(|p| p.alive && !p.role.is_mafia())
            .count();
        if mafia == 0 {
            Some(Winner::Villagers)
        } else if mafia >= town {
            Some(Winner::Mafia)
        } else {
            None
        }
    }

    fn num_alive(&self) -> usize {
        self.players.iter().filter(|p| p.alive).count()
    }

    /// The number of players eligible to cast a mafia kill vote right now.
    fn eligible_mafia_count(&self) -> usize {
        self.players
            .iter()
            .filter(|p| p.alive && p.role.is_mafia())
            .count()
    }

    /// The first living player holding the given role, if any.
    fn living_role(&self, role: Role) -> Option<usize> {
        self.players.iter().position(|p| p.alive && p.role == role)
    }

    /// The names of all living mafia members.
    fn living_mafia(&self) -> Vec<String> {
        self.players
            .iter()
            .filter(|p| p.alive && p.role.is_mafia())
            .map(|p| p.name.clone())
            .collect()
    }

    /// The names of every mafia member, dead or alive.
    fn mafia_roster(&self) -> Vec<String> {
        self.players
            .iter()
            .filter(|p| p.role.is_mafia())
            .map(|p| p.name.clone())
            .collect()
    }

    fn send(&mut self, target: Target, event: Event) {
        self.outbox.push(Envelope::new(target, event));
    }

    /// Drains the events produced by the latest mutation.
    pub fn take_events(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.outbox)
    }
}
