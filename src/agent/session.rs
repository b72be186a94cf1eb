//! One player's decision cycle.
//!
//! A session is stateless between calls: everything the player may know is
//! passed in the [`DecisionRequest`]. Each call is bounded by a timeout; a
//! failed or undecodable answer is retried once with a corrective
//! instruction, then replaced by a fallback decision.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::parse::{self, Parsed, Target};
use super::prompt;
use crate::config::InferenceConfig;
use crate::error::{GameError, Result};
use crate::game::{PlayerId, Role};
use crate::inference::{CompletionRequest, ModelClient};

/// What the player is asked to do
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum Task {
    /// Speak during the day discussion
    Discuss,
    /// Cast a day elimination vote
    Vote,
    /// Choose a mafia kill target
    NightKill,
    /// Choose a player to protect
    NightProtect,
    /// Agree or disagree with eliminating a candidate
    Confirm {
        /// Candidate's visible name
        candidate: String,
    },
    /// Final words after being voted out
    LastWords,
}

impl Task {
    /// Short name for logs and records
    pub fn name(&self) -> &'static str {
        match self {
            Task::Discuss => "discuss",
            Task::Vote => "vote",
            Task::NightKill => "night_kill",
            Task::NightProtect => "night_protect",
            Task::Confirm { .. } => "confirm",
            Task::LastWords => "last_words",
        }
    }

    /// Whether the decision must name a target
    pub fn needs_target(&self) -> bool {
        matches!(self, Task::Vote | Task::NightKill | Task::NightProtect)
    }

    /// Whether the text is spoken to the whole table
    pub fn is_public_speech(&self) -> bool {
        matches!(self, Task::Discuss | Task::LastWords)
    }
}

/// Everything one player may see when deciding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRequest {
    /// Round index
    pub round: u32,
    /// What to decide
    pub task: Task,
    /// Deciding player
    pub player: PlayerId,
    /// Deciding player's visible name
    pub name: String,
    /// Deciding player's role
    pub role: Role,
    /// Living fellow mafia members (mafia only)
    pub teammates: Vec<String>,
    /// Names of every living player
    pub alive: Vec<String>,
    /// Players the decision may name
    #[serde(skip)]
    pub targets: Vec<Target>,
    /// Public summary of the game so far
    pub game_state: String,
    /// Recent public discussion, one `Name: text` entry per utterance
    pub discussion: Vec<String>,
    /// Serialized relation graph, if the mode injects one
    pub graph: Option<String>,
}

/// A recoverable decoding failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodingFailure {
    /// Player whose answer failed
    pub player: PlayerId,
    /// Round index
    pub round: u32,
    /// Task name
    pub task: String,
    /// 1 for the first call, 2 for the retry
    pub attempt: u32,
    /// Why it failed
    pub reason: String,
}

/// Decoded decision
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Cleaned text visible to other players (empty when nothing was said)
    pub text: String,
    /// Chosen target; `None` means abstain
    pub target: Option<PlayerId>,
    /// Players accused during discussion
    pub accusations: Vec<PlayerId>,
    /// Players defended during discussion
    pub defenses: Vec<PlayerId>,
    /// Confirmation answer
    pub agree: bool,
    /// Model calls made
    pub attempts: u32,
    /// True when the decision is the fallback
    pub fallback: bool,
    /// Failed attempts, in order
    pub failures: Vec<DecodingFailure>,
}

/// Decision maker bound to one model identity
#[derive(Clone)]
pub struct AgentSession {
    client: Arc<dyn ModelClient>,
    model: String,
    timeout: Duration,
    max_tokens: u32,
    temperature: f32,
    chat_template: Option<String>,
}

impl std::fmt::Debug for AgentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSession")
            .field("client", &self.client.name())
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl AgentSession {
    /// Create a session with default sampling settings
    pub fn new(client: Arc<dyn ModelClient>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            model: model.into(),
            timeout,
            max_tokens: 400,
            temperature: 0.7,
            chat_template: None,
        }
    }

    /// Create a session using the endpoint settings for `model`
    pub fn from_config(client: Arc<dyn ModelClient>, model: &str, config: &InferenceConfig) -> Self {
        Self {
            client,
            model: model.to_string(),
            timeout: config.timeout_for(model),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            chat_template: config.chat_template.clone(),
        }
    }

    /// Set the completion length limit
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Model identity
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Per-call timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Ask for one decision. Never fails: undecodable answers end in a
    /// fallback, recorded in [`Decision::failures`].
    pub async fn decide<R: Rng + Send>(&self, request: &DecisionRequest, rng: &mut R) -> Decision {
        let base = prompt::build(request, self.max_tokens);
        let mut failures = Vec::new();

        for attempt in 1..=2u32 {
            let prompt = match failures.last() {
                Some(DecodingFailure { reason, .. }) => {
                    format!("{base}{}", prompt::corrective(request, reason))
                },
                None => base.clone(),
            };

            match self.attempt(request, prompt).await {
                Ok(mut decision) => {
                    decision.attempts = attempt;
                    decision.failures = failures;
                    return decision;
                },
                Err(e) => {
                    tracing::debug!(
                        player = %request.name,
                        task = request.task.name(),
                        attempt,
                        error = %e,
                        "decision attempt failed"
                    );
                    let retry = e.is_retryable();
                    failures.push(DecodingFailure {
                        player: request.player,
                        round: request.round,
                        task: request.task.name().to_string(),
                        attempt,
                        reason: e.to_string(),
                    });
                    if !retry {
                        break;
                    }
                },
            }
        }

        tracing::warn!(
            player = %request.name,
            model = %self.model,
            task = request.task.name(),
            round = request.round,
            "decoding failed, using fallback decision"
        );
        fallback(request, rng, failures)
    }

    async fn attempt(&self, request: &DecisionRequest, prompt: String) -> Result<Decision> {
        let completion = CompletionRequest {
            model: self.model.clone(),
            prompt,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            chat_template: self.chat_template.clone(),
        };

        let raw = match tokio::time::timeout(self.timeout, self.client.complete(&completion)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(GameError::ModelTimeout {
                    model: self.model.clone(),
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            },
        };
        tracing::debug!(player = %request.name, task = request.task.name(), response = %raw, "model response");

        decode(request, &raw)
    }
}

/// Turn raw model text into a decision for `request`
pub fn decode(request: &DecisionRequest, raw: &str) -> Result<Decision> {
    let text = parse::strip_think(raw);
    let mut decision = Decision::default();

    match &request.task {
        Task::Discuss | Task::LastWords => {
            if request.task == Task::Discuss {
                let (accusations, defenses) = parse::parse_stances(&text, &request.targets);
                decision.accusations = accusations;
                decision.defenses = defenses;
            }
            decision.text = parse::sanitize(&text, &request.name, &request.alive, true);
            if decision.text.is_empty() {
                return Err(GameError::MalformedDecision("empty response".to_string()));
            }
        },
        Task::Vote | Task::NightKill | Task::NightProtect => {
            let (parsed, marker) = match request.task {
                Task::Vote => (parse::parse_vote(&text, &request.targets), "VOTE:"),
                Task::NightKill => (parse::parse_kill(&text, &request.targets), "ACTION: Kill"),
                _ => (parse::parse_protect(&text, &request.targets), "ACTION: Protect"),
            };
            decision.target = Some(match parsed {
                Parsed::Target(id) => id,
                Parsed::Illegal(name) => {
                    return Err(GameError::MalformedDecision(format!(
                        "'{name}' is not a valid target"
                    )))
                },
                Parsed::Missing => {
                    return Err(GameError::MalformedDecision(format!("missing {marker} line")))
                },
            });
            decision.text = parse::sanitize(&text, &request.name, &request.alive, false);
        },
        Task::Confirm { .. } => {
            decision.agree = parse::parse_confirmation(&text).ok_or_else(|| {
                GameError::MalformedDecision("answer was neither AGREE nor DISAGREE".to_string())
            })?;
            decision.text = parse::sanitize(&text, &request.name, &request.alive, false);
        },
    }

    Ok(decision)
}

fn fallback<R: Rng>(request: &DecisionRequest, rng: &mut R, failures: Vec<DecodingFailure>) -> Decision {
    let target = if request.task.needs_target() {
        request.targets.choose(rng).map(|t| t.id)
    } else {
        None
    };

    Decision {
        target,
        attempts: failures.len() as u32,
        fallback: true,
        failures,
        ..Decision::default()
    }
}
