//! Renders relation graphs into bounded prompt fragments.
//!
//! Output is deterministic: edges are ordered by descending absolute weight,
//! ties broken by source id, then target id, then kind. When the rendering
//! exceeds the budget the weakest edges are dropped first, so a kept edge is
//! never weaker than a dropped one.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::game::PlayerId;
use crate::tokenizer::{count_tokens, TokenEncoding};

use super::relation::{Edge, GraphHistory, RelationGraph};

/// Fragment used when a graph has no edges
pub const EMPTY_GRAPH_PLACEHOLDER: &str = "No relationships observed yet.";

const HEADER: &str = "Relationship graph (strongest first):";
const HISTORY_HEADER: &str = "Across all previous rounds:";

/// Which graph view is injected into agent prompts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GraphMode {
    /// No graph in prompts
    #[default]
    None,
    /// Speech-derived edges of the current round
    Communication,
    /// Communication plus the cumulative history
    CommunicationHistory,
    /// All public edges of the current round
    Round,
    /// Round plus the cumulative history
    RoundHistory,
    /// Cumulative history merged with the current round
    GlobalHistory,
}

impl GraphMode {
    /// Every mode
    pub const ALL: [GraphMode; 6] = [
        GraphMode::None,
        GraphMode::Communication,
        GraphMode::CommunicationHistory,
        GraphMode::Round,
        GraphMode::RoundHistory,
        GraphMode::GlobalHistory,
    ];

    /// Config/CLI name
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Communication => "communication",
            Self::CommunicationHistory => "communication-history",
            Self::Round => "round",
            Self::RoundHistory => "round-history",
            Self::GlobalHistory => "global-history",
        }
    }
}

impl std::fmt::Display for GraphMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for GraphMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "none" | "off" => Ok(Self::None),
            "communication" | "comm" => Ok(Self::Communication),
            "communication-history" | "comm-history" => Ok(Self::CommunicationHistory),
            "round" => Ok(Self::Round),
            "round-history" => Ok(Self::RoundHistory),
            "global-history" | "global" => Ok(Self::GlobalHistory),
            _ => Err(format!("Unknown graph mode: {s}")),
        }
    }
}

/// Size limit for a rendered fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    /// Maximum characters
    Chars(usize),
    /// Maximum tokens under an encoding
    Tokens {
        /// Token limit
        limit: usize,
        /// Encoding used to count
        encoding: TokenEncoding,
    },
}

impl Budget {
    fn size(&self, text: &str) -> usize {
        match self {
            Budget::Chars(_) => text.chars().count(),
            Budget::Tokens { encoding, .. } => count_tokens(text, *encoding),
        }
    }

    fn limit(&self) -> usize {
        match self {
            Budget::Chars(limit) | Budget::Tokens { limit, .. } => *limit,
        }
    }

    fn with_limit(&self, limit: usize) -> Budget {
        match *self {
            Budget::Chars(_) => Budget::Chars(limit),
            Budget::Tokens { encoding, .. } => Budget::Tokens { limit, encoding },
        }
    }
}

/// Graph-to-text renderer
#[derive(Debug, Clone)]
pub struct GraphSerializer {
    budget: Budget,
    names: HashMap<PlayerId, String>,
}

impl GraphSerializer {
    /// Create a serializer that names players through `names`
    pub fn new(budget: Budget, names: HashMap<PlayerId, String>) -> Self {
        Self { budget, names }
    }

    /// Budget in use
    pub fn budget(&self) -> Budget {
        self.budget
    }

    fn name(&self, player: PlayerId) -> String {
        self.names
            .get(&player)
            .cloned()
            .unwrap_or_else(|| player.to_string())
    }

    fn line(&self, edge: &Edge) -> String {
        format!(
            "{} -> {} -> {} ({:+.2})",
            self.name(edge.source),
            edge.kind.label(),
            self.name(edge.target),
            edge.weight
        )
    }

    /// Render one graph within the serializer's budget
    pub fn serialize(&self, graph: &RelationGraph) -> String {
        render(graph, self.budget, |edge| self.line(edge))
    }

    /// Render the view selected by `mode`.
    ///
    /// `live` holds the in-progress round; `history` the committed rounds.
    /// Night-action edges are never rendered. Returns `None` for
    /// [`GraphMode::None`].
    pub fn render_mode(&self, mode: GraphMode, live: &RelationGraph, history: &GraphHistory) -> Option<String> {
        let public = |kind: super::EdgeKind| kind.is_public();
        let speech = |kind: super::EdgeKind| kind.is_speech();
        let line = |edge: &Edge| self.line(edge);

        match mode {
            GraphMode::None => None,
            GraphMode::Communication => Some(render(&live.filtered(speech), self.budget, line)),
            GraphMode::Round => Some(render(&live.filtered(public), self.budget, line)),
            GraphMode::CommunicationHistory | GraphMode::RoundHistory => {
                let current = if mode == GraphMode::CommunicationHistory {
                    live.filtered(speech)
                } else {
                    live.filtered(public)
                };
                let separator = format!("\n{HISTORY_HEADER}\n");
                let room = self
                    .budget
                    .limit()
                    .saturating_sub(self.budget.size(&separator));
                let first = self.budget.with_limit(room / 2);
                let second = self.budget.with_limit(room - room / 2);
                let current = render(&current, first, line);
                let past = render(&history.cumulative().filtered(public), second, line);
                Some(fit(format!("{current}{separator}{past}"), self.budget))
            },
            GraphMode::GlobalHistory => {
                let mut global = history.cumulative().clone();
                global.merge(live);
                Some(render(&global.filtered(public), self.budget, line))
            },
        }
    }
}

/// Descending |weight|, then source, target, kind ascending
pub fn edge_order(a: &Edge, b: &Edge) -> Ordering {
    b.weight
        .abs()
        .total_cmp(&a.weight.abs())
        .then_with(|| a.key().cmp(&b.key()))
}

fn render(graph: &RelationGraph, budget: Budget, line: impl Fn(&Edge) -> String) -> String {
    if graph.is_empty() {
        return fit(EMPTY_GRAPH_PLACEHOLDER.to_string(), budget);
    }

    let mut edges: Vec<Edge> = graph.edges().collect();
    edges.sort_by(edge_order);
    let lines: Vec<String> = edges.iter().map(&line).collect();

    let full = format!("{HEADER}\n{}", lines.join("\n"));
    if budget.size(&full) <= budget.limit() {
        return full;
    }

    // Keep the longest prefix that still leaves room for the omission note
    let mut kept = 0;
    let mut text = HEADER.to_string();
    for (i, l) in lines.iter().enumerate() {
        let candidate = format!("{text}\n{l}");
        let note = omitted_note(lines.len() - (i + 1));
        if budget.size(&format!("{candidate}\n{note}")) > budget.limit() {
            break;
        }
        text = candidate;
        kept = i + 1;
    }

    let note = omitted_note(lines.len() - kept);
    let truncated = format!("{text}\n{note}");
    if budget.size(&truncated) <= budget.limit() {
        return truncated;
    }
    // Not even the header fits: the bare note, clipped if need be
    fit(note, budget)
}

/// Drop trailing characters until `text` fits `budget`
fn fit(mut text: String, budget: Budget) -> String {
    while budget.size(&text) > budget.limit() && text.pop().is_some() {}
    text
}

fn omitted_note(count: usize) -> String {
    format!("({count} weaker edges omitted)")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EdgeKind;

    fn names() -> HashMap<PlayerId, String> {
        [(0, "Alex"), (1, "Bailey"), (2, "Casey"), (3, "Dana")]
            .into_iter()
            .map(|(i, n)| (PlayerId(i), n.to_string()))
            .collect()
    }

    fn sample() -> RelationGraph {
        let mut graph = RelationGraph::with_nodes((0..4).map(PlayerId));
        graph.add_weight(PlayerId(0), PlayerId(1), EdgeKind::Accuse, 2.0);
        graph.add_weight(PlayerId(2), PlayerId(1), EdgeKind::Defend, -1.0);
        graph.add_weight(PlayerId(3), PlayerId(0), EdgeKind::Mention, 0.25);
        graph.add_weight(PlayerId(1), PlayerId(3), EdgeKind::Eliminate, 1.0);
        graph
    }

    #[test]
    fn test_empty_graph_placeholder() {
        let serializer = GraphSerializer::new(Budget::Chars(500), names());
        let out = serializer.serialize(&RelationGraph::with_nodes([PlayerId(0)]));
        assert_eq!(out, EMPTY_GRAPH_PLACEHOLDER);
        assert!(!out.is_empty());
    }

    #[test]
    fn test_ordering_and_ties() {
        let serializer = GraphSerializer::new(Budget::Chars(1000), names());
        let out = serializer.serialize(&sample());
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines[1], "Alex -> accuses -> Bailey (+2.00)");
        // |1.0| tie: Bailey(1) sorts before Casey(2)
        assert_eq!(lines[2], "Bailey -> votes against -> Dana (+1.00)");
        assert_eq!(lines[3], "Casey -> defends -> Bailey (-1.00)");
        assert_eq!(lines[4], "Dana -> mentions -> Alex (+0.25)");
    }

    #[test]
    fn test_truncation_drops_weakest() {
        let serializer = GraphSerializer::new(Budget::Chars(110), names());
        let out = serializer.serialize(&sample());
        assert!(out.chars().count() <= 110);
        assert!(out.contains("Alex -> accuses -> Bailey"));
        assert!(!out.contains("Dana -> mentions -> Alex"));
        assert!(out.ends_with("weaker edges omitted)"));
    }

    #[test]
    fn test_budget_below_header_keeps_note() {
        let serializer = GraphSerializer::new(Budget::Chars(40), names());
        assert_eq!(serializer.serialize(&sample()), "(4 weaker edges omitted)");
    }

    #[test]
    fn test_tiny_budget_is_clipped() {
        let serializer = GraphSerializer::new(Budget::Chars(5), names());
        let out = serializer.serialize(&sample());
        assert_eq!(out, "(4 we");

        let empty = RelationGraph::with_nodes([PlayerId(0)]);
        assert!(serializer.serialize(&empty).chars().count() <= 5);
    }

    #[test]
    fn test_history_modes_respect_budget() {
        let mut history = GraphHistory::new((0..4).map(PlayerId));
        history.push(sample());
        for limit in [60, 120, 200, 400] {
            let serializer = GraphSerializer::new(Budget::Chars(limit), names());
            for mode in [GraphMode::CommunicationHistory, GraphMode::RoundHistory, GraphMode::GlobalHistory] {
                let out = serializer.render_mode(mode, &sample(), &history).unwrap();
                assert!(out.chars().count() <= limit, "{mode} at {limit}: {}", out.chars().count());
            }
        }
    }

    #[test]
    fn test_mode_none_renders_nothing() {
        let serializer = GraphSerializer::new(Budget::Chars(500), names());
        let history = GraphHistory::new((0..4).map(PlayerId));
        assert!(serializer
            .render_mode(GraphMode::None, &sample(), &history)
            .is_none());
    }

    #[test]
    fn test_communication_mode_is_speech_only() {
        let serializer = GraphSerializer::new(Budget::Chars(500), names());
        let history = GraphHistory::new((0..4).map(PlayerId));
        let out = serializer
            .render_mode(GraphMode::Communication, &sample(), &history)
            .unwrap();
        assert!(out.contains("accuses"));
        assert!(!out.contains("votes against"));
    }

    #[test]
    fn test_history_modes_include_cumulative() {
        let serializer = GraphSerializer::new(Budget::Chars(1000), names());
        let mut history = GraphHistory::new((0..4).map(PlayerId));
        let mut past = RelationGraph::with_nodes((0..4).map(PlayerId));
        past.add_weight(PlayerId(3), PlayerId(2), EdgeKind::Eliminate, 1.5);
        past.add_weight(PlayerId(1), PlayerId(2), EdgeKind::NightAction, 1.0);
        history.push(past);

        let live = RelationGraph::with_nodes((0..4).map(PlayerId));
        let out = serializer
            .render_mode(GraphMode::RoundHistory, &live, &history)
            .unwrap();
        assert!(out.starts_with(EMPTY_GRAPH_PLACEHOLDER));
        assert!(out.contains(HISTORY_HEADER));
        assert!(out.contains("Dana -> votes against -> Casey (+1.50)"));
        assert!(!out.contains("targets at night"));

        let global = serializer
            .render_mode(GraphMode::GlobalHistory, &sample(), &history)
            .unwrap();
        assert!(global.contains("Dana -> votes against -> Casey"));
        assert!(global.contains("Alex -> accuses -> Bailey"));
    }

    #[test]
    fn test_token_budget() {
        let budget = Budget::Tokens {
            limit: 20,
            encoding: TokenEncoding::Heuristic,
        };
        let serializer = GraphSerializer::new(budget, names());
        let out = serializer.serialize(&sample());
        assert!(count_tokens(&out, TokenEncoding::Heuristic) <= 20);
    }

    #[test]
    fn test_mode_parse_roundtrip() {
        for mode in GraphMode::ALL {
            assert_eq!(mode.name().parse::<GraphMode>().unwrap(), mode);
        }
        assert!("sideways".parse::<GraphMode>().is_err());
    }
}
