//! Turns a round's events into relation graph edges.
//!
//! Explicit actions carry the full weight of their kind; utterances are
//! scanned for other players' names and contribute a smaller implicit
//! `Mention` weight (once per utterance and named player).

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{GameError, Result};
use crate::game::{ActionKind, Player, PlayerId, RoundEvent};

use super::relation::{EdgeKind, RelationGraph};

/// Largest accepted magnitude for a configured weight
pub const MAX_EVENT_WEIGHT: f64 = 1e6;

/// Weight deltas per event kind
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphWeights {
    /// Added per accusation
    pub accuse: f64,
    /// Subtracted per defense
    pub defend: f64,
    /// Added per elimination vote
    pub eliminate: f64,
    /// Added per utterance naming another player
    pub mention: f64,
    /// Added per night kill choice, subtracted per protection
    pub night_action: f64,
}

impl Default for GraphWeights {
    fn default() -> Self {
        Self {
            accuse: 1.0,
            defend: 1.0,
            eliminate: 1.5,
            mention: 0.25,
            night_action: 1.0,
        }
    }
}

impl GraphWeights {
    /// Signed delta and edge kind for an action
    pub fn delta(&self, kind: ActionKind) -> (EdgeKind, f64) {
        match kind {
            ActionKind::Accuse => (EdgeKind::Accuse, self.accuse),
            ActionKind::Defend => (EdgeKind::Defend, -self.defend),
            ActionKind::Eliminate => (EdgeKind::Eliminate, self.eliminate),
            ActionKind::NightKill => (EdgeKind::NightAction, self.night_action),
            ActionKind::NightProtect => (EdgeKind::NightAction, -self.night_action),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let all = [
            self.accuse,
            self.defend,
            self.eliminate,
            self.mention,
            self.night_action,
        ];
        if all.iter().any(|w| !w.is_finite()) {
            return Err(GameError::Config("graph weights must be finite".to_string()));
        }
        if all.iter().any(|w| w.abs() > MAX_EVENT_WEIGHT) {
            return Err(GameError::Config(format!(
                "graph weights must be within ±{MAX_EVENT_WEIGHT}"
            )));
        }
        Ok(())
    }
}

/// Builds per-round and cumulative relation graphs for one roster
#[derive(Debug, Clone)]
pub struct RelationGraphBuilder {
    weights: GraphWeights,
    roster: Vec<PlayerId>,
    mentions: Vec<(PlayerId, Regex)>,
}

impl RelationGraphBuilder {
    /// Create a builder for the given players
    pub fn new(weights: GraphWeights, players: &[Player]) -> Self {
        let mentions = players
            .iter()
            .filter_map(|p| {
                let pattern = format!(r"(?i)\b{}\b", regex::escape(&p.name));
                Regex::new(&pattern).ok().map(|re| (p.id, re))
            })
            .collect();

        Self {
            weights,
            roster: players.iter().map(|p| p.id).collect(),
            mentions,
        }
    }

    /// Weights in use
    pub fn weights(&self) -> &GraphWeights {
        &self.weights
    }

    /// Graph of one round's events, starting from zero.
    ///
    /// Zero events give a graph with every roster node and no edges.
    pub fn round_graph(&self, events: &[RoundEvent]) -> RelationGraph {
        let mut graph = RelationGraph::with_nodes(self.roster.iter().copied());

        for event in events {
            match event {
                RoundEvent::Action(action) => {
                    let (kind, delta) = self.weights.delta(action.kind);
                    if !graph.add_weight(action.actor, action.target, kind, delta) {
                        tracing::debug!(
                            actor = %action.actor,
                            target = %action.target,
                            "dropped action edge"
                        );
                    }
                },
                RoundEvent::Utterance(utterance) if utterance.phase.is_public() => {
                    for (player, pattern) in &self.mentions {
                        if *player != utterance.speaker && pattern.is_match(&utterance.content) {
                            graph.add_weight(
                                utterance.speaker,
                                *player,
                                EdgeKind::Mention,
                                self.weights.mention,
                            );
                        }
                    }
                },
                RoundEvent::Utterance(_) => {},
            }
        }

        graph
    }

    /// Per-round graph plus the cumulative graph carried forward from `prior`
    pub fn build(&self, events: &[RoundEvent], prior: &RelationGraph) -> (RelationGraph, RelationGraph) {
        let round = self.round_graph(events);
        let mut cumulative = prior.clone();
        cumulative.merge(&round);
        (round, cumulative)
    }
}
