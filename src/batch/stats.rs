//! Batch aggregation.
//!
//! Win rates use completed games as the denominator: games that reached an
//! outcome, including round-limit timeouts (a non-win for both factions).
//! Failed games are excluded and reported separately, so one crashed run
//! never counts as a loss.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::{Faction, GameReport, OutcomeKind, Role};
use crate::graph::GraphMode;

/// A game that ended in an unrecoverable error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRun {
    /// Index inside the batch
    pub game_index: usize,
    /// Seed the game was started with
    pub seed: u64,
    /// Error message
    pub reason: String,
}

/// Games and wins in one role
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleStats {
    /// Games played in this role
    pub games: usize,
    /// Games won in this role
    pub wins: usize,
}

impl RoleStats {
    fn record(&mut self, won: bool) {
        self.games += 1;
        if won {
            self.wins += 1;
        }
    }
}

/// Per-model record across a batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelStats {
    /// Seats played as mafia
    pub mafia: RoleStats,
    /// Seats played as doctor
    pub doctor: RoleStats,
    /// Seats played as villager
    pub villager: RoleStats,
}

impl ModelStats {
    /// Record one seat
    pub fn record(&mut self, role: Role, won: bool) {
        match role {
            Role::Mafia => self.mafia.record(won),
            Role::Doctor => self.doctor.record(won),
            Role::Villager => self.villager.record(won),
        }
    }

    /// Seats played in any role
    pub fn games(&self) -> usize {
        self.mafia.games + self.doctor.games + self.villager.games
    }

    /// Seats won in any role
    pub fn wins(&self) -> usize {
        self.mafia.wins + self.doctor.wins + self.villager.wins
    }

    /// Fraction of seats won
    pub fn win_rate(&self) -> Option<f64> {
        let games = self.games();
        (games > 0).then(|| self.wins() as f64 / games as f64)
    }
}

/// Aggregate of one (model, mode) batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Batch identifier
    pub batch_id: Uuid,
    /// Model identity (or pool description)
    pub model: String,
    /// Graph mode under test
    pub mode: GraphMode,
    /// Repetitions asked for
    pub requested: usize,
    /// Games that reached an outcome (wins plus timeouts)
    pub completed: usize,
    /// Games won by the mafia
    pub mafia_wins: usize,
    /// Games won by the town
    pub town_wins: usize,
    /// Games that hit the round limit
    pub timeouts: usize,
    /// Games that failed; excluded from win rates
    pub failed: Vec<FailedRun>,
    /// Games not started or aborted because the batch was cancelled
    pub cancelled: usize,
    /// Recoverable decoding failures across all completed games
    pub decoding_failures: usize,
    /// Per-model seat statistics
    pub per_model: BTreeMap<String, ModelStats>,
    /// Wall-clock duration
    pub elapsed: Duration,
}

impl BatchSummary {
    /// Empty summary
    pub fn new(batch_id: Uuid, model: impl Into<String>, mode: GraphMode, requested: usize) -> Self {
        Self {
            batch_id,
            model: model.into(),
            mode,
            requested,
            completed: 0,
            mafia_wins: 0,
            town_wins: 0,
            timeouts: 0,
            failed: Vec::new(),
            cancelled: 0,
            decoding_failures: 0,
            per_model: BTreeMap::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// Fold in a finished game
    pub fn record_game(&mut self, report: &GameReport) {
        let outcome = &report.outcome;
        self.completed += 1;
        match (outcome.kind, outcome.winner) {
            (OutcomeKind::Decided, Some(Faction::Mafia)) => self.mafia_wins += 1,
            (OutcomeKind::Decided, Some(Faction::Town)) => self.town_wins += 1,
            _ => self.timeouts += 1,
        }
        self.decoding_failures += report.failures.len();

        for seat in &outcome.survivors {
            let won = outcome.won_by(seat.role.faction());
            self.per_model
                .entry(seat.model.clone())
                .or_default()
                .record(seat.role, won);
        }
    }

    /// Record a failed game
    pub fn record_failure(&mut self, failure: FailedRun) {
        self.failed.push(failure);
    }

    /// Games with a winning faction
    pub fn decided(&self) -> usize {
        self.mafia_wins + self.town_wins
    }

    /// Wins of `faction` over completed games; `None` before any completed game
    pub fn win_rate(&self, faction: Faction) -> Option<f64> {
        if self.completed == 0 {
            return None;
        }
        let wins = match faction {
            Faction::Mafia => self.mafia_wins,
            Faction::Town => self.town_wins,
        };
        Some(wins as f64 / self.completed as f64)
    }

    /// One-line human summary
    pub fn headline(&self) -> String {
        let rate = |f| {
            self.win_rate(f)
                .map_or_else(|| "n/a".to_string(), |r| format!("{:.1}%", r * 100.0))
        };
        format!(
            "{} [{}]: {} completed ({} mafia, {} town, {} timeouts), {} failed, {} cancelled; town win rate {}, mafia win rate {}",
            self.model,
            self.mode,
            self.completed,
            self.mafia_wins,
            self.town_wins,
            self.timeouts,
            self.failed.len(),
            self.cancelled,
            rate(Faction::Town),
            rate(Faction::Mafia),
        )
    }
}
