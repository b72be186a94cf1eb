//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables (optionally seeded from a `.env` file)
//! - CLI arguments (applied by the binary on top of both)

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GameError, Result};
use crate::game::TieBreak;
use crate::graph::{Budget, GraphMode, GraphWeights};
use crate::tokenizer::TokenEncoding;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Game rules
    #[serde(default)]
    pub game: GameConfig,

    /// Model-serving endpoint
    #[serde(default)]
    pub inference: InferenceConfig,

    /// Relation graph construction and prompt injection
    #[serde(default)]
    pub graph: GraphConfig,

    /// Batch repetition settings
    #[serde(default)]
    pub batch: BatchConfig,

    /// Post-game critic review
    #[serde(default)]
    pub review: ReviewConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| GameError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| GameError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override fields from environment variables that are set
    pub fn apply_env(&mut self) {
        if let Some(endpoint) = env_var("MAFIA_ENDPOINT").or_else(|| env_var("LOCAL_LLM_API_URL")) {
            self.inference.endpoint = endpoint;
        }
        if let Some(key) = env_var("OPENROUTER_API_KEY") {
            self.inference.api_key = Some(key);
        }
        if let Some(model) = env_var("MAFIA_MODEL") {
            self.inference.models = vec![model];
        }
        if let Some(timeout) = env_parse("API_TIMEOUT") {
            self.inference.timeout_secs = timeout;
        }
        if let Some(tokens) = env_parse("MAX_OUTPUT_TOKENS") {
            self.inference.max_tokens = tokens;
        }

        if let Some(players) = env_parse("PLAYERS_PER_GAME") {
            self.game.players = players;
        }
        if let Some(mafia) = env_parse("MAFIA_COUNT") {
            self.game.mafia = mafia;
        }
        if let Some(doctors) = env_parse("DOCTOR_COUNT") {
            self.game.doctors = doctors;
        }
        if let Some(rounds) = env_parse("MAX_ROUNDS") {
            self.game.max_rounds = rounds;
        }
        if let Some(seed) = env_parse("RANDOM_SEED") {
            self.game.seed = Some(seed);
        }

        if let Some(games) = env_parse("NUM_GAMES") {
            self.batch.repetitions = games;
        }
        if let Some(mode) = env_var("GRAPH_MODE") {
            match mode.parse() {
                Ok(mode) => self.graph.mode = mode,
                Err(e) => tracing::warn!("Ignoring GRAPH_MODE: {e}"),
            }
        }
    }

    /// Check that the configuration describes a playable game
    pub fn validate(&self) -> Result<()> {
        self.game.validate()?;
        self.graph.weights.validate()?;

        if self.inference.models.is_empty() {
            return Err(GameError::Config("at least one model is required".to_string()));
        }
        if self.inference.timeout_secs == 0 {
            return Err(GameError::Config("timeout_secs must be positive".to_string()));
        }
        if self.batch.workers == 0 {
            return Err(GameError::Config("batch.workers must be positive".to_string()));
        }
        Ok(())
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| GameError::Config(e.to_string()))
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_var(name).and_then(|v| v.trim().parse().ok())
}

/// Game rule configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Players per game
    pub players: usize,

    /// Mafia members per game
    pub mafia: usize,

    /// Doctors per game
    pub doctors: usize,

    /// Rounds before the game is declared a draw
    pub max_rounds: u32,

    /// Most recent public utterances shown in prompts
    pub discussion_history_limit: usize,

    /// What happens when the day vote is tied
    pub tie_break: TieBreak,

    /// Ask the town to confirm the plurality target before eliminating
    pub confirmation_vote: bool,

    /// Let a voted-out player speak once before leaving
    pub last_words: bool,

    /// Shuffle the speaking order every round instead of seat order
    pub shuffle_turn_order: bool,

    /// Base seed; game `i` of a batch uses `seed + i`
    pub seed: Option<u64>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            players: 8,
            mafia: 2,
            doctors: 1,
            max_rounds: 20,
            discussion_history_limit: 30,
            tie_break: TieBreak::NoElimination,
            confirmation_vote: true,
            last_words: true,
            shuffle_turn_order: false,
            seed: None,
        }
    }
}

impl GameConfig {
    /// Villagers implied by the role counts
    pub fn villagers(&self) -> usize {
        self.players.saturating_sub(self.mafia + self.doctors)
    }

    fn validate(&self) -> Result<()> {
        if self.players < 3 {
            return Err(GameError::Config(format!(
                "a game needs at least 3 players, got {}",
                self.players
            )));
        }
        if self.mafia == 0 {
            return Err(GameError::Config("a game needs at least one mafia".to_string()));
        }
        if self.mafia + self.doctors > self.players {
            return Err(GameError::Config(format!(
                "{} mafia + {} doctors exceed {} players",
                self.mafia, self.doctors, self.players
            )));
        }
        if self.mafia >= self.players - self.mafia {
            return Err(GameError::Config(
                "mafia must start outnumbered by the town".to_string(),
            ));
        }
        if self.max_rounds == 0 {
            return Err(GameError::Config("max_rounds must be positive".to_string()));
        }
        Ok(())
    }
}

/// Model-serving endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// OpenAI-compatible chat completions URL
    pub endpoint: String,

    /// Bearer token, if the endpoint needs one
    pub api_key: Option<String>,

    /// Model identities; players draw from this list
    pub models: Vec<String>,

    /// Per-call timeout in seconds
    pub timeout_secs: u64,

    /// Per-model timeout overrides in seconds
    pub timeouts: HashMap<String, u64>,

    /// Completion length limit
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// Chat template forwarded to the serving process
    pub chat_template: Option<String>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000/v1/chat/completions".to_string(),
            api_key: None,
            models: vec!["mistralai/mistral-7b-instruct-v0.2".to_string()],
            timeout_secs: 60,
            timeouts: HashMap::new(),
            max_tokens: 400,
            temperature: 0.7,
            chat_template: None,
        }
    }
}

impl InferenceConfig {
    /// Timeout for one call to `model`
    pub fn timeout_for(&self, model: &str) -> Duration {
        let secs = self.timeouts.get(model).copied().unwrap_or(self.timeout_secs);
        Duration::from_secs(secs)
    }

    /// First configured model
    pub fn default_model(&self) -> Option<&str> {
        self.models.first().map(String::as_str)
    }
}

/// Relation graph configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Which graph view is injected into prompts
    pub mode: GraphMode,

    /// Character budget for the serialized graph
    pub char_budget: usize,

    /// Token budget; takes precedence over `char_budget` when set
    pub token_budget: Option<usize>,

    /// Edge weight deltas per event kind
    pub weights: GraphWeights,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            mode: GraphMode::None,
            char_budget: 1200,
            token_budget: None,
            weights: GraphWeights::default(),
        }
    }
}

impl GraphConfig {
    /// Serializer budget for prompts sent to `model`
    pub fn budget_for(&self, model: &str) -> Budget {
        match self.token_budget {
            Some(limit) => Budget::Tokens {
                limit,
                encoding: TokenEncoding::infer_from_id(model),
            },
            None => Budget::Chars(self.char_budget),
        }
    }
}

/// Batch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Games per (model, mode) configuration
    pub repetitions: usize,

    /// Games played concurrently
    pub workers: usize,

    /// JSON Lines results file
    pub output: Option<PathBuf>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            repetitions: 1,
            workers: 1,
            output: dirs::data_local_dir().map(|p| p.join("mafia-graph").join("results.jsonl")),
        }
    }
}

/// Critic review configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Request a review after each game
    pub enabled: bool,

    /// Reviewer model; defaults to the first inference model
    pub model: Option<String>,
}
