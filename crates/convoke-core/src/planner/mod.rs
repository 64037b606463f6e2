//! Planner service interface -- the LLM seam of the core.
//!
//! The engine consumes an LLM twice: once to decompose the user request
//! into a task plan, and once (optionally) to aggregate multiple task
//! results. Both go through the [`Planner`] trait, which hides the
//! concrete backend behind a plain chat call.

pub mod decompose;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::plan::TokenUsage;

pub use decompose::decompose;

// ---------------------------------------------------------------------------
// Conversation message types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One completed chat call: the response text plus whatever token counters
/// the backend reported (zeroed when the backend reports none).
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub text: String,
    pub usage: TokenUsage,
}

/// The LLM backend the decomposer and aggregator call.
///
/// Implementations wrap a concrete provider (an HTTP chat-completion API, a
/// local model, a scripted stub in tests). `cancel` is the cooperative
/// cancellation signal; implementors should abort the call when it fires.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn chat(&self, cancel: CancellationToken, messages: &[Message])
    -> Result<ChatResponse>;
}

// Compile-time assertion: Planner must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Planner) {}
};
