//! Property tests for relation graph aggregation and serialization.

use std::collections::HashMap;

use mafia_graph::game::PlayerId;
use mafia_graph::graph::{
    Budget, EdgeKind, GraphHistory, GraphMode, GraphSerializer, RelationGraph,
    EMPTY_GRAPH_PLACEHOLDER,
};
use proptest::prelude::*;

const NAMES: [&str; 6] = ["Alex", "Bailey", "Casey", "Dana", "Ellis", "Finley"];

fn names() -> HashMap<PlayerId, String> {
    NAMES
        .iter()
        .enumerate()
        .map(|(i, n)| (PlayerId(i), (*n).to_string()))
        .collect()
}

fn arb_edge() -> impl Strategy<Value = (usize, usize, usize, f64)> {
    (0..6usize, 0..6usize, 0..EdgeKind::ALL.len(), -3.0f64..3.0)
}

fn graph_from(edges: &[(usize, usize, usize, f64)]) -> RelationGraph {
    let mut graph = RelationGraph::with_nodes((0..6).map(PlayerId));
    for &(s, t, k, w) in edges {
        graph.add_weight(PlayerId(s), PlayerId(t), EdgeKind::ALL[k], w);
    }
    graph
}

proptest! {
    #[test]
    fn cumulative_is_sum_of_snapshots(
        rounds in prop::collection::vec(prop::collection::vec(arb_edge(), 0..12), 1..6)
    ) {
        let mut history = GraphHistory::new((0..6).map(PlayerId));
        for round in &rounds {
            history.push(graph_from(round));
        }

        prop_assert_eq!(history.len(), rounds.len());
        let recomputed = history.aggregate_through(rounds.len());
        for edge in history.cumulative().edges() {
            let expected: f64 = history
                .snapshots()
                .iter()
                .filter_map(|g| g.weight(edge.source, edge.target, edge.kind))
                .sum();
            prop_assert!((edge.weight - expected).abs() < 1e-9);
            let again = recomputed.weight(edge.source, edge.target, edge.kind);
            prop_assert!(again.is_some_and(|w| (w - edge.weight).abs() < 1e-9));
        }
        prop_assert!(history.cumulative().edges().all(|e| e.source != e.target));
    }

    #[test]
    fn truncation_respects_budget_and_keeps_strongest(
        edges in prop::collection::vec(arb_edge(), 1..30),
        budget in 80usize..600,
    ) {
        let graph = graph_from(&edges);
        let full = GraphSerializer::new(Budget::Chars(100_000), names()).serialize(&graph);
        let cut = GraphSerializer::new(Budget::Chars(budget), names()).serialize(&graph);

        if graph.is_empty() {
            prop_assert_eq!(cut, EMPTY_GRAPH_PLACEHOLDER);
        } else {
            prop_assert!(cut.chars().count() <= budget);
            // Kept lines are a prefix of the untruncated rendering
            let kept: Vec<&str> = cut.lines().filter(|l| !l.ends_with("omitted)")).collect();
            let all: Vec<&str> = full.lines().collect();
            prop_assert_eq!(&all[..kept.len()], &kept[..]);
        }
    }

    #[test]
    fn rendered_views_never_leak_night_actions(
        live in prop::collection::vec(arb_edge(), 0..15),
        past in prop::collection::vec(arb_edge(), 0..15),
    ) {
        let mut history = GraphHistory::new((0..6).map(PlayerId));
        history.push(graph_from(&past));
        let live = graph_from(&live);
        let serializer = GraphSerializer::new(Budget::Chars(4_000), names());

        for mode in GraphMode::ALL {
            let text = serializer.render_mode(mode, &live, &history);
            if mode == GraphMode::None {
                prop_assert!(text.is_none());
            } else {
                let text = text.unwrap_or_default();
                prop_assert!(!text.is_empty());
                prop_assert!(!text.contains(EdgeKind::NightAction.label()));
            }
        }
    }
}

#[test]
fn history_modes_stay_within_budget() {
    let edges: Vec<(usize, usize, usize, f64)> = (0..6)
        .flat_map(|s| (0..6).map(move |t| (s, t, (s + t) % 4, 1.0 + s as f64)))
        .collect();
    let mut history = GraphHistory::new((0..6).map(PlayerId));
    history.push(graph_from(&edges));
    let live = graph_from(&edges);

    let serializer = GraphSerializer::new(Budget::Chars(400), names());
    for mode in [GraphMode::CommunicationHistory, GraphMode::RoundHistory] {
        let text = serializer.render_mode(mode, &live, &history).unwrap_or_default();
        assert!(text.chars().count() <= 400, "{mode}: {} chars", text.chars().count());
        assert!(text.contains("Across all previous rounds:"));
    }
}
