//! In-process model client.
//!
//! Used by tests to drive exact decisions and by `--dry-run` to play full
//! games without a serving endpoint. The heuristic mode reads the
//! `Valid targets:` and `Format:` lines that every decision prompt ends with.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::FutureExt;

use super::{CompletionFuture, CompletionRequest, ModelClient};
use crate::error::{GameError, Result};

type Responder = dyn Fn(&CompletionRequest, usize) -> Result<String> + Send + Sync;

/// Scripted model client
pub struct ScriptedClient {
    responder: Box<Responder>,
    calls: AtomicUsize,
    delay: Option<Duration>,
    log: Mutex<Vec<CompletionRequest>>,
}

impl std::fmt::Debug for ScriptedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedClient")
            .field("calls", &self.calls())
            .field("delay", &self.delay)
            .finish()
    }
}

impl ScriptedClient {
    /// Answer with `responder(request, call_number)`
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&CompletionRequest, usize) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            delay: None,
            log: Mutex::new(Vec::new()),
        }
    }

    /// Answer with `responses` in order, then fail every further call
    pub fn queue<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let responses: Vec<String> = responses.into_iter().map(Into::into).collect();
        Self::new(move |_, call| {
            responses
                .get(call)
                .cloned()
                .ok_or_else(|| GameError::Upstream("script exhausted".to_string()))
        })
    }

    /// Answer every call with the same text
    pub fn repeat(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_, _| Ok(text.clone()))
    }

    /// Plausible well-formed answers picked deterministically from the prompt
    pub fn heuristic(seed: u64) -> Self {
        Self::new(move |request, _| Ok(heuristic_answer(seed, &request.prompt)))
    }

    /// Sleep before every answer
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Calls made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    async fn answer(&self, request: &CompletionRequest) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut log) = self.log.lock() {
            log.push(request.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.responder)(request, call)
    }
}

impl ModelClient for ScriptedClient {
    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> CompletionFuture<'a> {
        self.answer(request).boxed()
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

// FNV-1a; stable across platforms and runs
fn fnv1a(seed: u64, text: &str) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64 ^ seed;
    for byte in text.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

fn last_line_value<'a>(prompt: &'a str, prefix: &str) -> Option<&'a str> {
    prompt
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix(prefix))
        .map(str::trim)
}

fn heuristic_answer(seed: u64, prompt: &str) -> String {
    let hash = fnv1a(seed, prompt);
    let targets: Vec<&str> = last_line_value(prompt, "Valid targets:")
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .collect()
        })
        .unwrap_or_default();
    let target = (!targets.is_empty()).then(|| targets[(hash % targets.len() as u64) as usize]);
    let format = last_line_value(prompt, "Format:").unwrap_or_default();

    match (format, target) {
        (f, Some(t)) if f.starts_with("VOTE") => {
            format!("{t} has been deflecting all day.\nVOTE: {t}")
        },
        (f, Some(t)) if f.starts_with("ACTION: Kill") => format!("ACTION: Kill {t}"),
        (f, Some(t)) if f.starts_with("ACTION: Protect") => format!("ACTION: Protect {t}"),
        (f, Some(t)) if f.starts_with("ACCUSE") => {
            if hash % 3 == 0 {
                format!("I believe {t} is telling the truth.\nDEFEND: {t}")
            } else {
                format!("Something about {t} feels off to me.\nACCUSE: {t}")
            }
        },
        (f, _) if f.starts_with("AGREE") => {
            if hash % 4 == 0 {
                "DISAGREE".to_string()
            } else {
                "AGREE".to_string()
            }
        },
        (f, _) if f.starts_with("JSON") => serde_json::json!({
            "title": "A Game of Whispers",
            "content": "The town argued in circles while the night kept its secrets.",
            "one_liner": "Suspicion travelled faster than evidence."
        })
        .to_string(),
        _ => "I have nothing more to add.".to_string(),
    }
}
