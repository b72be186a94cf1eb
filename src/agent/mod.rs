//! Player agents.
//!
//! An [`AgentSession`] turns a [`DecisionRequest`] into a prompt, calls the
//! player's model through a [`ModelClient`](crate::inference::ModelClient)
//! and decodes the answer into a [`Decision`].

pub mod parse;
pub mod prompt;
mod session;

pub use parse::Target;
pub use session::{decode, AgentSession, Decision, DecisionRequest, DecodingFailure, Task};
