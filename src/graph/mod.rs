//! Relation graphs built from game events.
//!
//! - [`RelationGraphBuilder`] turns a round's utterances and actions into a
//!   per-round [`RelationGraph`] and folds it into a cumulative one.
//! - [`GraphHistory`] keeps one snapshot per committed round.
//! - [`GraphSerializer`] renders a [`GraphMode`] view into a bounded text
//!   fragment for agent prompts.

mod builder;
mod relation;
mod serializer;

pub use builder::{GraphWeights, RelationGraphBuilder, MAX_EVENT_WEIGHT};
pub use relation::{Edge, EdgeKey, EdgeKind, GraphHistory, GraphSnapshot, RelationGraph};
pub use serializer::{edge_order, Budget, GraphMode, GraphSerializer, EMPTY_GRAPH_PLACEHOLDER};
