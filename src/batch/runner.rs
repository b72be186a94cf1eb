//! Concurrent batch execution.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;

use super::stats::{BatchSummary, FailedRun};
use super::{CancelHandle, CancelToken};
use crate::config::Config;
use crate::error::{GameError, Result};
use crate::game::{Game, GameReport, GameSettings, ModelAssignment};
use crate::graph::GraphMode;
use crate::inference::ModelClient;
use crate::store::{RecordKind, ResultSink, StoreRecord};

/// One (model, mode) configuration to repeat
#[derive(Debug, Clone)]
pub struct BatchSpec {
    /// Seat-to-model assignment
    pub models: ModelAssignment,
    /// Graph mode injected into prompts
    pub mode: GraphMode,
    /// Games to play
    pub repetitions: usize,
    /// Games played at once
    pub workers: usize,
    /// Game `i` uses `base_seed + i`; random when unset
    pub base_seed: Option<u64>,
}

impl BatchSpec {
    /// Every seat plays `model`
    pub fn single(model: impl Into<String>, mode: GraphMode, repetitions: usize) -> Self {
        Self {
            models: ModelAssignment::Single(model.into()),
            mode,
            repetitions,
            workers: 1,
            base_seed: None,
        }
    }

    /// Spec for one mode using the batch and seed settings of `config`
    pub fn from_config(config: &Config, models: ModelAssignment, mode: GraphMode) -> Self {
        Self {
            models,
            mode,
            repetitions: config.batch.repetitions,
            workers: config.batch.workers,
            base_seed: config.game.seed,
        }
    }

    /// Set the concurrency bound
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the base seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.base_seed = Some(seed);
        self
    }

    /// Label used in summaries and logs
    pub fn label(&self) -> String {
        match &self.models {
            ModelAssignment::Single(model) => model.clone(),
            ModelAssignment::Pool(models) => models.join(","),
        }
    }
}

/// Plays batches of games against one client and one sink
pub struct BatchRunner {
    settings: GameSettings,
    client: Arc<dyn ModelClient>,
    sink: Arc<dyn ResultSink>,
    cancel: CancelHandle,
}

impl std::fmt::Debug for BatchRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRunner")
            .field("client", &self.client.name())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

type GameResult = (usize, u64, Result<GameReport>);

impl BatchRunner {
    /// Create a runner; `settings` supplies rules, weights and inference knobs
    pub fn new(settings: GameSettings, client: Arc<dyn ModelClient>, sink: Arc<dyn ResultSink>) -> Self {
        Self {
            settings,
            client,
            sink,
            cancel: CancelHandle::new(),
        }
    }

    /// Share an externally owned cancellation handle
    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle that cancels this runner
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Play `spec.repetitions` games and aggregate them.
    ///
    /// Individual game failures never fail the batch; they are recorded in the
    /// sink and listed in the summary.
    pub async fn run(&self, spec: &BatchSpec) -> Result<BatchSummary> {
        if spec.workers == 0 {
            return Err(GameError::Config("workers must be positive".to_string()));
        }

        let started = Instant::now();
        let batch_id = Uuid::new_v4();
        let base_seed = spec.base_seed.unwrap_or_else(rand::random);
        let settings = GameSettings {
            models: spec.models.clone(),
            ..self.settings.clone()
        }
        .with_mode(spec.mode);
        let mut summary = BatchSummary::new(batch_id, spec.label(), spec.mode, spec.repetitions);

        tracing::info!(
            %batch_id,
            model = %summary.model,
            mode = %spec.mode,
            games = spec.repetitions,
            workers = spec.workers,
            base_seed,
            "batch started"
        );

        let semaphore = Arc::new(Semaphore::new(spec.workers));
        let mut games: JoinSet<GameResult> = JoinSet::new();

        for index in 0..spec.repetitions {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| GameError::Internal(e.to_string()))?;
            if self.cancel.is_cancelled() {
                summary.cancelled += spec.repetitions - index;
                tracing::warn!(%batch_id, remaining = spec.repetitions - index, "batch cancelled");
                break;
            }

            let seed = base_seed.wrapping_add(index as u64);
            let span = tracing::info_span!("game", %batch_id, index, seed);
            let task = play(
                index,
                batch_id,
                seed,
                settings.clone(),
                self.client.clone(),
                self.sink.clone(),
                self.cancel.token(),
            );
            games.spawn(
                async move {
                    let _permit = permit;
                    let result = AssertUnwindSafe(task)
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| Err(GameError::Internal(panic_message(panic.as_ref()))));
                    (index, seed, result)
                }
                .instrument(span),
            );
        }

        while let Some(joined) = games.join_next().await {
            match joined {
                Ok((_, _, Ok(report))) => summary.record_game(&report),
                Ok((index, seed, Err(GameError::Cancelled))) => {
                    tracing::info!(%batch_id, index, seed, "game cancelled");
                    let mut record =
                        StoreRecord::new(RecordKind::GameCancelled, batch_id, json!({ "seed": seed }));
                    record.game_index = Some(index);
                    self.append(record);
                    summary.cancelled += 1;
                },
                Ok((index, seed, Err(e))) => {
                    let failure = GameError::BatchItemFailure {
                        game_index: index,
                        reason: e.to_string(),
                    };
                    tracing::warn!(%batch_id, seed, error = %failure, "game failed");
                    let mut record = StoreRecord::new(
                        RecordKind::GameFailed,
                        batch_id,
                        json!({ "seed": seed, "reason": e.to_string() }),
                    );
                    record.game_index = Some(index);
                    self.append(record);
                    summary.record_failure(FailedRun {
                        game_index: index,
                        seed,
                        reason: e.to_string(),
                    });
                },
                Err(e) => {
                    tracing::error!(%batch_id, error = %e, "game task aborted");
                    summary.cancelled += 1;
                },
            }
        }

        summary.failed.sort_by_key(|f| f.game_index);
        summary.elapsed = started.elapsed();

        match serde_json::to_value(&summary) {
            Ok(payload) => self.append(StoreRecord::new(RecordKind::BatchSummary, batch_id, payload)),
            Err(e) => tracing::error!(%batch_id, error = %e, "failed to encode batch summary"),
        }
        if let Err(e) = self.sink.flush() {
            tracing::error!(%batch_id, error = %e, "failed to flush results");
        }

        tracing::info!(%batch_id, elapsed_ms = summary.elapsed.as_millis() as u64, "{}", summary.headline());
        Ok(summary)
    }

    /// Run several specs one after another, stopping early on cancellation
    pub async fn run_all(&self, specs: &[BatchSpec]) -> Result<Vec<BatchSummary>> {
        let mut summaries = Vec::with_capacity(specs.len());
        for spec in specs {
            if self.cancel.is_cancelled() {
                break;
            }
            summaries.push(self.run(spec).await?);
        }
        Ok(summaries)
    }

    fn append(&self, record: StoreRecord) {
        if let Err(e) = self.sink.append(record) {
            tracing::error!(error = %e, "failed to store record");
        }
    }
}

async fn play(
    index: usize,
    batch_id: Uuid,
    seed: u64,
    settings: GameSettings,
    client: Arc<dyn ModelClient>,
    sink: Arc<dyn ResultSink>,
    cancel: CancelToken,
) -> Result<GameReport> {
    let game = Game::new(index, batch_id, seed, settings, client, sink, cancel)?;
    tracing::debug!(game_id = %game.id(), "game created");
    game.run().await
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown".to_string());
    format!("game panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::game::Faction;
    use crate::inference::{CompletionFuture, CompletionRequest, ScriptedClient};
    use crate::store::MemorySink;

    fn settings() -> GameSettings {
        let mut config = Config::default();
        config.game.players = 6;
        config.game.mafia = 1;
        config.game.max_rounds = 6;
        GameSettings::from_config(&config)
    }

    /// Rejects the start record of selected games
    struct FailingSink {
        inner: MemorySink,
        fail_index: usize,
    }

    impl ResultSink for FailingSink {
        fn append(&self, record: StoreRecord) -> Result<()> {
            if record.kind == RecordKind::GameStarted && record.game_index == Some(self.fail_index) {
                return Err(GameError::Store("disk full".to_string()));
            }
            self.inner.append(record)
        }
    }

    /// Panics on one call, answers heuristically otherwise
    struct PanickingClient {
        inner: ScriptedClient,
        calls: AtomicUsize,
        panic_on: usize,
    }

    impl ModelClient for PanickingClient {
        fn complete<'a>(&'a self, request: &'a CompletionRequest) -> CompletionFuture<'a> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == self.panic_on {
                panic!("model backend crashed");
            }
            self.inner.complete(request)
        }

        fn name(&self) -> &'static str {
            "panicking"
        }
    }

    #[tokio::test]
    async fn test_panicking_game_is_isolated() {
        let client = Arc::new(PanickingClient {
            inner: ScriptedClient::heuristic(11),
            calls: AtomicUsize::new(0),
            panic_on: 5,
        });
        let sink = Arc::new(MemorySink::new());
        let runner = BatchRunner::new(settings(), client, sink.clone());
        let spec = BatchSpec::single("scripted", GraphMode::Round, 6)
            .with_workers(3)
            .with_seed(40);

        let summary = runner.run(&spec).await.unwrap();

        assert_eq!(summary.completed, 5);
        assert_eq!(summary.failed.len(), 1);
        assert!(summary.failed[0].reason.contains("model backend crashed"));
        assert_eq!(sink.of_kind(RecordKind::GameFinished).len(), 5);
        assert_eq!(sink.of_kind(RecordKind::GameFailed).len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_games_are_recorded() {
        let client = Arc::new(ScriptedClient::heuristic(6).with_delay(Duration::from_millis(20)));
        let sink = Arc::new(MemorySink::new());
        let runner = BatchRunner::new(settings(), client, sink.clone());
        let handle = runner.cancel_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            handle.cancel();
        });

        let spec = BatchSpec::single("scripted", GraphMode::Round, 6)
            .with_workers(2)
            .with_seed(3);
        let summary = runner.run(&spec).await.unwrap();

        assert_eq!(summary.completed, 0);
        assert_eq!(summary.cancelled, 6);

        let mut started: Vec<Option<usize>> = sink
            .of_kind(RecordKind::GameStarted)
            .iter()
            .map(|r| r.game_index)
            .collect();
        let mut cancelled: Vec<Option<usize>> = sink
            .of_kind(RecordKind::GameCancelled)
            .iter()
            .map(|r| r.game_index)
            .collect();
        started.sort();
        cancelled.sort();
        assert_eq!(started.len(), 2);
        assert_eq!(cancelled, started);
        assert!(sink
            .of_kind(RecordKind::GameCancelled)
            .iter()
            .all(|r| r.payload["seed"].as_u64().is_some()));
    }

    #[tokio::test]
    async fn test_failed_game_is_isolated() {
        let sink = Arc::new(FailingSink {
            inner: MemorySink::new(),
            fail_index: 17,
        });
        let runner = BatchRunner::new(settings(), Arc::new(ScriptedClient::heuristic(3)), sink.clone());
        let spec = BatchSpec::single("scripted", GraphMode::Round, 80)
            .with_workers(8)
            .with_seed(1000);

        let summary = runner.run(&spec).await.unwrap();

        assert_eq!(summary.completed, 79);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].game_index, 17);
        assert_eq!(summary.failed[0].seed, 1017);
        assert_eq!(summary.mafia_wins + summary.town_wins + summary.timeouts, 79);
        if let Some(rate) = summary.win_rate(Faction::Town) {
            assert!((rate - summary.town_wins as f64 / 79.0).abs() < 1e-9);
        }

        assert_eq!(sink.inner.of_kind(RecordKind::GameFinished).len(), 79);
        assert_eq!(sink.inner.of_kind(RecordKind::GameFailed).len(), 1);
        assert_eq!(sink.inner.of_kind(RecordKind::BatchSummary).len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_batch_starts_nothing() {
        let sink = Arc::new(MemorySink::new());
        let runner = BatchRunner::new(settings(), Arc::new(ScriptedClient::heuristic(0)), sink.clone());
        runner.cancel_handle().cancel();

        let summary = runner
            .run(&BatchSpec::single("scripted", GraphMode::None, 5))
            .await
            .unwrap();

        assert_eq!(summary.completed, 0);
        assert_eq!(summary.cancelled, 5);
        assert!(sink.of_kind(RecordKind::GameStarted).is_empty());
        assert_eq!(sink.of_kind(RecordKind::BatchSummary).len(), 1);
    }

    #[tokio::test]
    async fn test_zero_workers_rejected() {
        let runner = BatchRunner::new(
            settings(),
            Arc::new(ScriptedClient::heuristic(0)),
            Arc::new(MemorySink::new()),
        );
        let spec = BatchSpec::single("scripted", GraphMode::None, 1).with_workers(0);
        assert!(matches!(runner.run(&spec).await, Err(GameError::Config(_))));
    }

    #[tokio::test]
    async fn test_run_all_covers_every_mode() {
        let runner = BatchRunner::new(
            settings(),
            Arc::new(ScriptedClient::heuristic(2)),
            Arc::new(MemorySink::new()),
        );
        let specs: Vec<BatchSpec> = GraphMode::ALL
            .iter()
            .map(|mode| BatchSpec::single("scripted", *mode, 2).with_seed(7).with_workers(2))
            .collect();

        let summaries = runner.run_all(&specs).await.unwrap();
        assert_eq!(summaries.len(), GraphMode::ALL.len());
        for (summary, mode) in summaries.iter().zip(GraphMode::ALL) {
            assert_eq!(summary.mode, mode);
            assert_eq!(summary.completed + summary.failed.len(), 2);
        }
    }
}
