//! Players, rounds, events and outcomes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GameError, Result};

/// Stable player identifier: the player's seat index
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PlayerId(pub usize);

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Player role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Kills at night, wins on parity
    Mafia,
    /// Protects one player per night
    Doctor,
    /// No night action
    Villager,
}

impl Role {
    /// Faction this role plays for
    pub fn faction(self) -> Faction {
        match self {
            Role::Mafia => Faction::Mafia,
            Role::Doctor | Role::Villager => Faction::Town,
        }
    }

    /// Display name
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Mafia => "Mafia",
            Role::Doctor => "Doctor",
            Role::Villager => "Villager",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Win-condition grouping of roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Faction {
    /// Mafia members
    Mafia,
    /// Villagers and the doctor
    Town,
}

impl std::fmt::Display for Faction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Faction::Mafia => f.write_str("Mafia"),
            Faction::Town => f.write_str("Town"),
        }
    }
}

/// Day-vote tie resolution, fixed for a whole run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreak {
    /// Nobody is eliminated on a tie
    #[default]
    NoElimination,
    /// One of the tied players is drawn with the game RNG
    Random,
}

impl std::str::FromStr for TieBreak {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "no-elimination" | "skip" => Ok(Self::NoElimination),
            "random" => Ok(Self::Random),
            _ => Err(format!("Unknown tie break: {s}")),
        }
    }
}

/// One seat at the table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    /// Seat index
    pub id: PlayerId,
    /// Visible name; the model identity is hidden from other players
    pub name: String,
    /// Secret role
    pub role: Role,
    /// Model identity that plays this seat
    pub model: String,
    /// Still in the game
    pub alive: bool,
}

impl Player {
    /// Create a living player
    pub fn new(id: PlayerId, name: impl Into<String>, role: Role, model: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            role,
            model: model.into(),
            alive: true,
        }
    }
}

/// Game state machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Roles being assigned
    Setup,
    /// Public discussion
    Discussion,
    /// Public elimination vote
    Voting,
    /// Secret mafia kill and doctor protection
    NightAction,
    /// Eliminations applied, win checked, graph updated
    Resolution,
    /// Game over
    Terminated,
}

impl Phase {
    /// Whether speech in this phase is visible to every player
    pub fn is_public(self) -> bool {
        !matches!(self, Phase::NightAction)
    }
}

/// Something a player said
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    /// Speaker
    pub speaker: PlayerId,
    /// Round index
    pub round: u32,
    /// Position in the round's event order
    pub seq: u32,
    /// Phase it was said in
    pub phase: Phase,
    /// Sanitised text
    pub content: String,
}

/// Targeted action kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Public accusation during discussion
    Accuse,
    /// Public defense during discussion
    Defend,
    /// Day vote to eliminate
    Eliminate,
    /// Mafia kill choice
    NightKill,
    /// Doctor protection choice
    NightProtect,
}

/// A targeted action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Acting player
    pub actor: PlayerId,
    /// Target player
    pub target: PlayerId,
    /// Round index
    pub round: u32,
    /// Position in the round's event order
    pub seq: u32,
    /// Action kind
    pub kind: ActionKind,
}

/// One entry of a round's ordered event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoundEvent {
    /// Speech
    Utterance(Utterance),
    /// Vote or targeted action
    Action(Action),
}

/// Why a player left the game
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EliminationCause {
    /// Voted out during the day
    Vote,
    /// Killed by the mafia at night
    NightKill,
}

/// Elimination record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Elimination {
    /// Eliminated player
    pub player: PlayerId,
    /// Cause
    pub cause: EliminationCause,
}

/// Tally of a confirmation vote
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationTally {
    /// Player up for elimination
    pub candidate: Option<PlayerId>,
    /// Players agreeing
    pub agree: Vec<PlayerId>,
    /// Players disagreeing or not answering
    pub disagree: Vec<PlayerId>,
}

impl ConfirmationTally {
    /// Strict majority of voters agreed
    pub fn confirmed(&self) -> bool {
        let voters = self.agree.len() + self.disagree.len();
        voters > 0 && self.agree.len() * 2 > voters
    }
}

/// One day/night cycle; append-only until closed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    /// 1-based round index
    pub index: u32,
    /// Phase the round is currently in
    pub phase: Phase,
    events: Vec<RoundEvent>,
    /// Players who left the game this round
    pub eliminations: Vec<Elimination>,
    /// Confirmation vote, if one was held
    pub confirmation: Option<ConfirmationTally>,
    /// Mafia's chosen night target
    pub night_target: Option<PlayerId>,
    /// Players protected by a doctor
    pub protected: Vec<PlayerId>,
    /// Narrative summary of what happened
    pub outcome: String,
    closed: bool,
}

impl Round {
    /// Open a new round in the discussion phase
    pub fn open(index: u32) -> Self {
        Self {
            index,
            phase: Phase::Discussion,
            events: Vec::new(),
            eliminations: Vec::new(),
            confirmation: None,
            night_target: None,
            protected: Vec::new(),
            outcome: String::new(),
            closed: false,
        }
    }

    /// Ordered events
    pub fn events(&self) -> &[RoundEvent] {
        &self.events
    }

    /// Whether the round has been closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn next_seq(&self) -> u32 {
        self.events.len() as u32
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(GameError::Internal(format!(
                "round {} is closed",
                self.index
            )));
        }
        Ok(())
    }

    /// Record speech in the current phase
    pub fn record_utterance(&mut self, speaker: PlayerId, content: impl Into<String>) -> Result<()> {
        self.ensure_open()?;
        let utterance = Utterance {
            speaker,
            round: self.index,
            seq: self.next_seq(),
            phase: self.phase,
            content: content.into(),
        };
        self.events.push(RoundEvent::Utterance(utterance));
        Ok(())
    }

    /// Record a targeted action
    pub fn record_action(&mut self, actor: PlayerId, target: PlayerId, kind: ActionKind) -> Result<()> {
        self.ensure_open()?;
        let action = Action {
            actor,
            target,
            round: self.index,
            seq: self.next_seq(),
            kind,
        };
        self.events.push(RoundEvent::Action(action));
        Ok(())
    }

    /// Move to another phase
    pub fn advance(&mut self, phase: Phase) -> Result<()> {
        self.ensure_open()?;
        self.phase = phase;
        Ok(())
    }

    /// Close the round; no further events are accepted
    pub fn close(&mut self) {
        self.phase = Phase::Resolution;
        self.closed = true;
    }

    /// Utterances everyone could hear
    pub fn public_utterances(&self) -> impl Iterator<Item = &Utterance> {
        self.events.iter().filter_map(|event| match event {
            RoundEvent::Utterance(u) if u.phase.is_public() => Some(u),
            _ => None,
        })
    }

    /// Actions of one kind
    pub fn actions(&self, kind: ActionKind) -> impl Iterator<Item = &Action> {
        self.events.iter().filter_map(move |event| match event {
            RoundEvent::Action(a) if a.kind == kind => Some(a),
            _ => None,
        })
    }
}

/// How a game ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// One faction met its win condition
    Decided,
    /// Round limit reached without a winner
    Timeout,
}

/// Per-player end-of-game record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurvivalRecord {
    /// Seat
    pub player: PlayerId,
    /// Visible name
    pub name: String,
    /// Role
    pub role: Role,
    /// Model identity
    pub model: String,
    /// Alive at the end
    pub survived: bool,
    /// Round the player was eliminated in
    pub eliminated_in: Option<u32>,
}

/// Final result of one game; immutable once created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameOutcome {
    /// Game identifier
    pub game_id: Uuid,
    /// Decided or timed out
    pub kind: OutcomeKind,
    /// Winning faction, if decided
    pub winner: Option<Faction>,
    /// Rounds played
    pub rounds: u32,
    /// Seed the game RNG was built from
    pub seed: u64,
    /// Per-player survival
    pub survivors: Vec<SurvivalRecord>,
}

impl GameOutcome {
    /// Whether `faction` won
    pub fn won_by(&self, faction: Faction) -> bool {
        self.winner == Some(faction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_factions() {
        assert_eq!(Role::Mafia.faction(), Faction::Mafia);
        assert_eq!(Role::Doctor.faction(), Faction::Town);
        assert_eq!(Role::Villager.faction(), Faction::Town);
    }

    #[test]
    fn test_round_is_append_only_until_closed() {
        let mut round = Round::open(1);
        round.record_utterance(PlayerId(0), "I think Bailey is lying").unwrap();
        round
            .record_action(PlayerId(0), PlayerId(1), ActionKind::Accuse)
            .unwrap();
        assert_eq!(round.events().len(), 2);

        round.close();
        assert!(round.is_closed());
        assert!(round.record_utterance(PlayerId(1), "late").is_err());
        assert!(round
            .record_action(PlayerId(1), PlayerId(0), ActionKind::Eliminate)
            .is_err());
        assert_eq!(round.events().len(), 2);
    }

    #[test]
    fn test_event_sequence_numbers() {
        let mut round = Round::open(3);
        round.record_utterance(PlayerId(2), "hello").unwrap();
        round.advance(Phase::Voting).unwrap();
        round
            .record_action(PlayerId(2), PlayerId(0), ActionKind::Eliminate)
            .unwrap();

        match &round.events()[1] {
            RoundEvent::Action(a) => {
                assert_eq!(a.seq, 1);
                assert_eq!(a.round, 3);
            },
            RoundEvent::Utterance(_) => panic!("expected action"),
        }
    }

    #[test]
    fn test_night_speech_is_private() {
        let mut round = Round::open(1);
        round.record_utterance(PlayerId(0), "day talk").unwrap();
        round.advance(Phase::NightAction).unwrap();
        round.record_utterance(PlayerId(1), "kill Casey").unwrap();
        let public: Vec<_> = round.public_utterances().collect();
        assert_eq!(public.len(), 1);
        assert_eq!(public[0].content, "day talk");
    }

    #[test]
    fn test_confirmation_requires_strict_majority() {
        let mut tally = ConfirmationTally {
            candidate: Some(PlayerId(1)),
            agree: vec![PlayerId(0), PlayerId(2)],
            disagree: vec![PlayerId(3), PlayerId(4)],
        };
        assert!(!tally.confirmed());
        tally.agree.push(PlayerId(5));
        assert!(tally.confirmed());
        assert!(!ConfirmationTally::default().confirmed());
    }

    #[test]
    fn test_tie_break_from_str() {
        assert_eq!("random".parse::<TieBreak>().unwrap(), TieBreak::Random);
        assert_eq!(
            "no-elimination".parse::<TieBreak>().unwrap(),
            TieBreak::NoElimination
        );
        assert!("coin".parse::<TieBreak>().is_err());
    }
}
