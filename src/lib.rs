//! # Mafia Graph - Graph-Conditioned LLM Agents Playing Mafia
//!
//! Runs repeated games of Mafia between language-model agents and measures how
//! injecting a summary of the social graph into each agent's prompt changes
//! win rates.
//!
//! ## Features
//!
//! - **Relation graphs**: weighted, directed player-to-player graphs built from
//!   accusations, defenses, votes, mentions and night targets
//! - **Prompt injection modes**: none, communication, round, the history
//!   variants and a global cumulative view, each under a size budget
//! - **Resilient agents**: per-call timeouts, one corrective retry and a legal
//!   fallback decision, so a bad model answer never stalls a game
//! - **Batch experiments**: bounded-concurrency repetitions with per-game
//!   failure isolation and append-only JSON Lines results
//!
//! ## Architecture
//!
//! ```text
//! BatchRunner ──> Game (orchestrator) ──> AgentSession ──> ModelClient ──> endpoint
//!                   │        ▲
//!                   │        └── GraphSerializer <── RelationGraph <── RelationGraphBuilder
//!                   │                                                        ▲
//!                   └────────────── committed Round events ──────────────────┘
//!                   │
//!                   └──> ResultSink (JSONL)
//! ```
//!
//! ### Round Lifecycle
//!
//! ```text
//!     [Discussion] ──> [Voting] ──> [NightAction] ──> [Closed]
//!                          │                             │
//!                          └── win check ──> [Closed] ───┴──> commit graph snapshot
//! ```
//!
//! Only a committed round changes the relation graph, and only public events
//! (speech and votes) ever reach a prompt.
//!
//! ### Graph Modes
//!
//! | Mode                    | Injected view                                        |
//! |-------------------------|------------------------------------------------------|
//! | `none`                  | nothing                                              |
//! | `communication`         | speech edges of the current round                    |
//! | `round`                 | all public edges of the current round                |
//! | `communication-history` | current speech plus cumulative public history        |
//! | `round-history`         | current round plus cumulative public history         |
//! | `global-history`        | cumulative public graph merged with the current round |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mafia_graph::{BatchRunner, BatchSpec, Config, GameSettings, GraphMode, NullSink, ScriptedClient};
//!
//! let config = Config::default();
//! let runner = BatchRunner::new(
//!     GameSettings::from_config(&config),
//!     Arc::new(ScriptedClient::heuristic(7)),
//!     Arc::new(NullSink),
//! );
//! let summary = runner
//!     .run(&BatchSpec::single("scripted", GraphMode::Round, 10).with_workers(4))
//!     .await?;
//! println!("{}", summary.headline());
//! ```

pub mod agent;
pub mod batch;
pub mod config;
pub mod error;
pub mod game;
pub mod graph;
pub mod inference;
pub mod review;
pub mod store;
pub mod tokenizer;

// Re-exports for convenience
pub use agent::{AgentSession, Decision, DecisionRequest, Task};
pub use batch::{BatchRunner, BatchSpec, BatchSummary, CancelHandle, CancelToken};
pub use config::Config;
pub use error::{GameError, Result};
pub use game::{
    Faction, Game, GameOutcome, GameReport, GameSettings, ModelAssignment, OutcomeKind, Player,
    PlayerId, Role, Round,
};
pub use graph::{GraphMode, GraphSerializer, RelationGraph, RelationGraphBuilder};
pub use inference::{CompletionRequest, ModelClient, OpenAiClient, ScriptedClient};
pub use review::CriticReview;
pub use store::{JsonlSink, MemorySink, NullSink, ResultSink, StoreRecord};
pub use tokenizer::{count_tokens, count_tokens_for_model, TokenEncoding};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
