//! Token counting implementation.
//!
//! Uses tiktoken-rs for BPE token counting with lazy-loaded encoders.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tiktoken_rs::{cl100k_base, o200k_base, CoreBPE};

// Lazy-loaded tokenizer instances; `None` if the encoder failed to load
static CL100K: OnceLock<Option<CoreBPE>> = OnceLock::new();
static O200K: OnceLock<Option<CoreBPE>> = OnceLock::new();

fn get_cl100k() -> Option<&'static CoreBPE> {
    CL100K
        .get_or_init(|| match cl100k_base() {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                tracing::warn!("Failed to load cl100k_base tokenizer: {e}");
                None
            },
        })
        .as_ref()
}

fn get_o200k() -> Option<&'static CoreBPE> {
    O200K
        .get_or_init(|| match o200k_base() {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                tracing::warn!("Failed to load o200k_base tokenizer: {e}");
                None
            },
        })
        .as_ref()
}

/// Tokenizer used for budget accounting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEncoding {
    /// OpenAI cl100k_base (GPT-3.5, GPT-4)
    Cl100kBase,
    /// OpenAI o200k_base (GPT-4o, o1, o3)
    O200kBase,
    /// ~4 characters per token
    #[default]
    Heuristic,
}

impl TokenEncoding {
    /// Infer encoding from a model identity
    pub fn infer_from_id(id: &str) -> Self {
        let id_lower = id.to_lowercase();

        if id_lower.contains("gpt-4o") || id_lower.contains("/o1") || id_lower.contains("/o3") {
            return TokenEncoding::O200kBase;
        }
        if id_lower.contains("gpt-3") || id_lower.contains("gpt-4") {
            return TokenEncoding::Cl100kBase;
        }
        TokenEncoding::Heuristic
    }
}

/// Count tokens with a specific encoding
pub fn count_tokens(text: &str, encoding: TokenEncoding) -> usize {
    let bpe = match encoding {
        TokenEncoding::Cl100kBase => get_cl100k(),
        TokenEncoding::O200kBase => get_o200k(),
        TokenEncoding::Heuristic => None,
    };
    match bpe {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => heuristic_count(text),
    }
}

/// Count tokens for a model identity
pub fn count_tokens_for_model(text: &str, model: &str) -> usize {
    count_tokens(text, TokenEncoding::infer_from_id(model))
}

/// Rounds up so that short strings never count as zero tokens
fn heuristic_count(text: &str) -> usize {
    text.len().div_ceil(4)
}
