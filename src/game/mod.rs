//! Game state and the orchestrator that drives a session.

mod names;
mod orchestrator;
mod types;

pub use names::{draw_names, PLAYER_NAMES};
pub use orchestrator::{Game, GameReport, GameSettings, ModelAssignment};
pub use types::{
    Action, ActionKind, ConfirmationTally, Elimination, EliminationCause, Faction, GameOutcome,
    OutcomeKind, Phase, Player, PlayerId, Role, Round, RoundEvent, SurvivalRecord, TieBreak,
    Utterance,
};
