//! Directed weighted relation graph over players.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use crate::game::PlayerId;

/// Closed vocabulary of edge kinds
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Explicit accusation
    Accuse,
    /// Explicit defense
    Defend,
    /// Day elimination vote
    Eliminate,
    /// Name mentioned in speech
    Mention,
    /// Secret night kill or protection
    NightAction,
}

impl EdgeKind {
    /// Every kind, in ordering order
    pub const ALL: [EdgeKind; 5] = [
        EdgeKind::Accuse,
        EdgeKind::Defend,
        EdgeKind::Eliminate,
        EdgeKind::Mention,
        EdgeKind::NightAction,
    ];

    /// Visible to all players (night actions are secret)
    pub fn is_public(self) -> bool {
        !matches!(self, EdgeKind::NightAction)
    }

    /// Derived from what players said rather than how they voted
    pub fn is_speech(self) -> bool {
        matches!(self, EdgeKind::Accuse | EdgeKind::Defend | EdgeKind::Mention)
    }

    /// Relation label used in serialized edges
    pub fn label(self) -> &'static str {
        match self {
            EdgeKind::Accuse => "accuses",
            EdgeKind::Defend => "defends",
            EdgeKind::Eliminate => "votes against",
            EdgeKind::Mention => "mentions",
            EdgeKind::NightAction => "targets at night",
        }
    }
}

/// Edge identity: weights for the same key accumulate
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EdgeKey {
    /// Acting player
    pub source: PlayerId,
    /// Player acted upon
    pub target: PlayerId,
    /// Relation kind
    pub kind: EdgeKind,
}

/// Materialised edge
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Acting player
    pub source: PlayerId,
    /// Player acted upon
    pub target: PlayerId,
    /// Relation kind
    pub kind: EdgeKind,
    /// Signed accumulated strength
    pub weight: f64,
}

impl Edge {
    /// Key of this edge
    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            source: self.source,
            target: self.target,
            kind: self.kind,
        }
    }
}

/// Relation graph
///
/// Invariants: no self-loops, every weight is finite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "GraphSnapshot", into = "GraphSnapshot")]
pub struct RelationGraph {
    nodes: BTreeSet<PlayerId>,
    edges: BTreeMap<EdgeKey, f64>,
}

impl RelationGraph {
    /// Empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph with the given nodes and no edges
    pub fn with_nodes(nodes: impl IntoIterator<Item = PlayerId>) -> Self {
        Self {
            nodes: nodes.into_iter().collect(),
            edges: BTreeMap::new(),
        }
    }

    /// Add a node
    pub fn add_node(&mut self, node: PlayerId) {
        self.nodes.insert(node);
    }

    /// Add `delta` to the edge `source -> target` of `kind`.
    ///
    /// Returns `false` (and leaves the graph untouched) for self-loops and
    /// non-finite deltas or sums.
    pub fn add_weight(&mut self, source: PlayerId, target: PlayerId, kind: EdgeKind, delta: f64) -> bool {
        if source == target || !delta.is_finite() {
            return false;
        }
        let key = EdgeKey { source, target, kind };
        let current = self.edges.get(&key).copied().unwrap_or(0.0);
        let next = current + delta;
        if !next.is_finite() {
            return false;
        }
        self.nodes.insert(source);
        self.nodes.insert(target);
        self.edges.insert(key, next);
        true
    }

    /// Weight of one edge
    pub fn weight(&self, source: PlayerId, target: PlayerId, kind: EdgeKind) -> Option<f64> {
        self.edges.get(&EdgeKey { source, target, kind }).copied()
    }

    /// Edges in key order
    pub fn edges(&self) -> impl Iterator<Item = Edge> + '_ {
        self.edges.iter().map(|(key, weight)| Edge {
            source: key.source,
            target: key.target,
            kind: key.kind,
            weight: *weight,
        })
    }

    /// Nodes in id order
    pub fn nodes(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.nodes.iter().copied()
    }

    /// Number of edges
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// True when there are no edges
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Element-wise sum: nodes are unioned, weights of equal keys are added.
    ///
    /// Sums that overflow saturate at `±f64::MAX` so weights stay finite.
    pub fn merge(&mut self, other: &RelationGraph) {
        self.nodes.extend(other.nodes.iter().copied());
        for (key, weight) in &other.edges {
            let slot = self.edges.entry(*key).or_insert(0.0);
            let sum = *slot + weight;
            *slot = if sum.is_finite() {
                sum
            } else {
                tracing::warn!(source = %key.source, target = %key.target, "Edge weight saturated");
                f64::MAX.copysign(sum)
            };
        }
    }

    /// Copy keeping only edges whose kind passes `keep`
    pub fn filtered(&self, keep: impl Fn(EdgeKind) -> bool) -> RelationGraph {
        RelationGraph {
            nodes: self.nodes.clone(),
            edges: self
                .edges
                .iter()
                .filter(|(key, _)| keep(key.kind))
                .map(|(key, weight)| (*key, *weight))
                .collect(),
        }
    }

    /// Net signed weight flowing into `target` over public edges
    pub fn incoming_pressure(&self, target: PlayerId) -> f64 {
        self.edges
            .iter()
            .filter(|(key, _)| key.target == target && key.kind.is_public())
            .map(|(_, weight)| weight)
            .sum()
    }

    /// Convert to a petgraph digraph (node weight = player, edge weight = (kind, weight))
    pub fn to_petgraph(&self) -> DiGraph<PlayerId, (EdgeKind, f64)> {
        let mut graph = DiGraph::new();
        let mut index: BTreeMap<PlayerId, NodeIndex> = BTreeMap::new();
        for node in &self.nodes {
            index.insert(*node, graph.add_node(*node));
        }
        for (key, weight) in &self.edges {
            if let (Some(a), Some(b)) = (index.get(&key.source), index.get(&key.target)) {
                graph.add_edge(*a, *b, (key.kind, *weight));
            }
        }
        graph
    }

    /// Render in Graphviz DOT format; `label` names each player
    pub fn to_dot(&self, label: impl Fn(PlayerId) -> String) -> String {
        let graph = self.to_petgraph();
        let mut dot = String::new();
        dot.push_str("digraph Relations {\n");
        dot.push_str("  rankdir=LR;\n");
        dot.push_str("  node [shape=circle];\n\n");

        for idx in graph.node_indices() {
            let player = graph[idx];
            dot.push_str(&format!("  {} [label=\"{}\"];\n", player.0, label(player)));
        }

        dot.push('\n');
        for edge in graph.edge_references() {
            let (kind, weight) = edge.weight();
            let color = if *weight < 0.0 { "green" } else { "red" };
            let style = if kind.is_public() { "solid" } else { "dashed" };
            dot.push_str(&format!(
                "  {} -> {} [label=\"{} {:+.2}\" color={} style={}];\n",
                graph[edge.source()].0,
                graph[edge.target()].0,
                kind.label(),
                weight,
                color,
                style
            ));
        }

        dot.push_str("}\n");
        dot
    }
}

/// Serializable form of a [`RelationGraph`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// Nodes
    pub nodes: Vec<PlayerId>,
    /// Edges in key order
    pub edges: Vec<Edge>,
}

impl From<RelationGraph> for GraphSnapshot {
    fn from(graph: RelationGraph) -> Self {
        Self {
            edges: graph.edges().collect(),
            nodes: graph.nodes.into_iter().collect(),
        }
    }
}

impl From<GraphSnapshot> for RelationGraph {
    fn from(snapshot: GraphSnapshot) -> Self {
        let mut graph = RelationGraph::with_nodes(snapshot.nodes);
        for edge in snapshot.edges {
            graph.add_weight(edge.source, edge.target, edge.kind, edge.weight);
        }
        graph
    }
}

/// Per-round snapshots plus their running aggregate
///
/// Invariant: `cumulative()` equals the element-wise sum of every snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphHistory {
    snapshots: Vec<RelationGraph>,
    cumulative: RelationGraph,
}

impl GraphHistory {
    /// Empty history over the given players
    pub fn new(nodes: impl IntoIterator<Item = PlayerId>) -> Self {
        Self {
            snapshots: Vec::new(),
            cumulative: RelationGraph::with_nodes(nodes),
        }
    }

    /// Append a committed round's graph
    pub fn push(&mut self, round_graph: RelationGraph) {
        self.cumulative.merge(&round_graph);
        self.snapshots.push(round_graph);
    }

    /// Aggregate over every committed round
    pub fn cumulative(&self) -> &RelationGraph {
        &self.cumulative
    }

    /// Per-round snapshots, oldest first
    pub fn snapshots(&self) -> &[RelationGraph] {
        &self.snapshots
    }

    /// Most recent snapshot
    pub fn last(&self) -> Option<&RelationGraph> {
        self.snapshots.last()
    }

    /// Committed rounds
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// True before the first commit
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Recompute the sum of the first `rounds` snapshots
    pub fn aggregate_through(&self, rounds: usize) -> RelationGraph {
        let mut total = RelationGraph::with_nodes(self.cumulative.nodes());
        for snapshot in self.snapshots.iter().take(rounds) {
            total.merge(snapshot);
        }
        total
    }
}
