//! Completion service boundary.
//!
//! Every stage talks to the language model through [`CompletionService`], a
//! plain `prompt -> text` contract. Replies are treated as unstructured text
//! regardless of any formatting instructions embedded in the prompt.

mod client;
mod types;

pub use client::*;
pub use types::*;

use async_trait::async_trait;

use crate::error::CompletionResult;

/// Opaque text-completion service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Generate a completion for a single prompt.
    async fn generate(&self, prompt: &str) -> CompletionResult<String>;
}
