//! Token counting for prompt budgets.
//!
//! Graph fragments injected into prompts can be budgeted in characters or in
//! tokens. Token budgets use tiktoken encodings for OpenAI-style models and a
//! ~4 characters per token heuristic for everything else (Llama, Mistral,
//! Qwen and other locally served models).
//!
//! # Example
//!
//! ```
//! use mafia_graph::tokenizer::{count_tokens, TokenEncoding};
//!
//! let tokens = count_tokens("Alex -> accuses -> Bailey (+1.00)", TokenEncoding::Heuristic);
//! assert_eq!(tokens, 9);
//! ```

mod counter;

pub use counter::{count_tokens, count_tokens_for_model, TokenEncoding};
