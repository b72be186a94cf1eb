//! Mafia Graph CLI binary.
//!
//! Graph-conditioned LLM agents playing Mafia.
//!
//! # Commands
//!
//! - `run` - Play batches of games for every (model, mode) pair
//! - `play` - Play a single game and print its rounds
//! - `config` - Print or validate the effective configuration
//!
//! # Usage
//!
//! ```bash
//! # 50 games per mode against a local vLLM server
//! MAFIA_ENDPOINT=http://localhost:8000 mafia-graph run \
//!   --model qwen2.5-7b --mode none --mode round --mode round-history --games 50 --workers 8
//!
//! # No endpoint needed: in-process heuristic agents
//! mafia-graph play --dry-run --mode global-history --seed 7 --dot
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use mafia_graph::{
    game::{Game, GameSettings, ModelAssignment},
    graph::GraphMode,
    inference::{ModelClient, OpenAiClient, ScriptedClient},
    store::{JsonlSink, MemorySink, NullSink, ResultSink},
    BatchRunner, BatchSpec, CancelHandle, Config, VERSION,
};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "mafia-graph")]
#[command(version = VERSION)]
#[command(about = "Graph-conditioned LLM agents playing Mafia", long_about = None)]
struct Cli {
    /// TOML configuration file (environment variables override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play batches of games and report win rates
    Run {
        /// Model identity (repeatable; defaults to the configured models)
        #[arg(short, long)]
        model: Vec<String>,

        /// Graph mode (repeatable; defaults to the configured mode)
        #[arg(long)]
        mode: Vec<GraphMode>,

        /// Seat models drawn from all --model values instead of one batch per model
        #[arg(long)]
        pool: bool,

        /// Games per (model, mode) pair
        #[arg(short, long)]
        games: Option<usize>,

        /// Games played concurrently
        #[arg(short, long)]
        workers: Option<usize>,

        /// Base seed; game i uses seed + i
        #[arg(short, long)]
        seed: Option<u64>,

        /// JSON Lines results file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Ask a critic model to review every game
        #[arg(long)]
        review: bool,

        /// Use in-process heuristic agents instead of the endpoint
        #[arg(long)]
        dry_run: bool,
    },

    /// Play one game and print what happened
    Play {
        /// Model identity for every seat
        #[arg(short, long)]
        model: Option<String>,

        /// Graph mode
        #[arg(long)]
        mode: Option<GraphMode>,

        /// Game seed
        #[arg(short, long)]
        seed: Option<u64>,

        /// Print the cumulative relation graph in DOT format
        #[arg(long)]
        dot: bool,

        /// Use in-process heuristic agents instead of the endpoint
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the effective configuration
    Config {
        /// Only validate, print nothing on success
        #[arg(long)]
        check: bool,
    },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    let mut config = match &cli.config {
        Some(path) => {
            let mut config = Config::from_file(path)?;
            config.apply_env();
            config
        },
        None => Config::from_env(),
    };

    match cli.command {
        Commands::Run {
            model,
            mode,
            pool,
            games,
            workers,
            seed,
            output,
            review,
            dry_run,
        } => {
            if let Some(games) = games {
                config.batch.repetitions = games;
            }
            if let Some(workers) = workers {
                config.batch.workers = workers;
            }
            if seed.is_some() {
                config.game.seed = seed;
            }
            if output.is_some() {
                config.batch.output = output;
            }
            if !model.is_empty() {
                config.inference.models = model;
            }
            config.review.enabled |= review;
            cmd_run(&config, &mode, pool, dry_run)
        },

        Commands::Play {
            model,
            mode,
            seed,
            dot,
            dry_run,
        } => {
            if let Some(model) = model {
                config.inference.models = vec![model];
            }
            if let Some(mode) = mode {
                config.graph.mode = mode;
            }
            cmd_play(&config, seed, dot, dry_run)
        },

        Commands::Config { check } => {
            config.validate()?;
            if !check {
                print!("{}", config.to_toml()?);
            }
            Ok(())
        },
    }
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn client_for(config: &Config, dry_run: bool, seed: u64) -> anyhow::Result<Arc<dyn ModelClient>> {
    if dry_run {
        tracing::info!("Dry run: using heuristic agents");
        return Ok(Arc::new(ScriptedClient::heuristic(seed)));
    }
    let client = OpenAiClient::from_config(&config.inference)?;
    tracing::info!("Using endpoint {}", client.endpoint());
    Ok(Arc::new(client))
}

fn cmd_run(config: &Config, modes: &[GraphMode], pool: bool, dry_run: bool) -> anyhow::Result<()> {
    config.validate()?;

    let modes = if modes.is_empty() {
        vec![config.graph.mode]
    } else {
        modes.to_vec()
    };
    let assignments: Vec<ModelAssignment> = if pool {
        vec![ModelAssignment::Pool(config.inference.models.clone())]
    } else {
        config
            .inference
            .models
            .iter()
            .cloned()
            .map(ModelAssignment::Single)
            .collect()
    };
    let specs: Vec<BatchSpec> = assignments
        .iter()
        .flat_map(|models| {
            modes
                .iter()
                .map(move |mode| BatchSpec::from_config(config, models.clone(), *mode))
        })
        .collect();

    let client = client_for(config, dry_run, config.game.seed.unwrap_or(0))?;
    let sink: Arc<dyn ResultSink> = match &config.batch.output {
        Some(path) => {
            let sink = JsonlSink::open(path)?;
            tracing::info!("Writing results to {}", sink.path().display());
            Arc::new(sink)
        },
        None => Arc::new(NullSink),
    };

    let cancel = CancelHandle::new();
    let runner = BatchRunner::new(GameSettings::from_config(config), client, sink)
        .with_cancel(cancel.clone());

    let runtime = tokio::runtime::Runtime::new()?;
    let summaries = runtime.block_on(async {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, finishing in-flight games");
                cancel.cancel();
            }
        });
        runner.run_all(&specs).await
    })?;

    println!();
    for summary in &summaries {
        println!("{}", summary.headline());
        for (model, stats) in &summary.per_model {
            if let Some(rate) = stats.win_rate() {
                println!("    {model}: {:.1}% of {} seats won", rate * 100.0, stats.games());
            }
        }
        for failure in &summary.failed {
            println!("    game {} (seed {}) failed: {}", failure.game_index, failure.seed, failure.reason);
        }
    }
    Ok(())
}

fn cmd_play(config: &Config, seed: Option<u64>, dot: bool, dry_run: bool) -> anyhow::Result<()> {
    config.validate()?;

    let seed = seed.or(config.game.seed).unwrap_or_else(rand::random);
    let client = client_for(config, dry_run, seed)?;
    let settings = GameSettings::from_config(config);
    let sink = Arc::new(MemorySink::new());
    let cancel = CancelHandle::new();
    let game = Game::new(0, Uuid::new_v4(), seed, settings, client, sink, cancel.token())?;

    println!("Game {} (seed {seed}, mode {})", game.id(), config.graph.mode);
    for player in game.players() {
        println!("  {:<10} {:<8} {}", player.name, player.role, player.model);
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let report = runtime.block_on(async {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
        game.run().await
    })?;

    println!();
    for round in &report.rounds {
        println!("Round {}: {}", round.index, round.outcome);
    }
    match report.outcome.winner {
        Some(winner) => println!("\n{winner} wins after {} rounds", report.outcome.rounds),
        None => println!("\nNo winner after {} rounds", report.outcome.rounds),
    }
    if !report.failures.is_empty() {
        println!("{} decoding failures recovered", report.failures.len());
    }
    if let Some(review) = &report.review {
        println!("\n{}\n{}\n{}", review.title, review.content, review.one_liner);
    }
    if dot {
        let names: std::collections::HashMap<_, _> =
            report.players.iter().map(|p| (p.id, p.name.clone())).collect();
        let graph = report.history.cumulative();
        println!(
            "\n{}",
            graph.to_dot(|id| names.get(&id).cloned().unwrap_or_else(|| id.to_string()))
        );
    }
    Ok(())
}
