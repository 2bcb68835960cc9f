//! Agent System
//!
//! The chatbot answers through a single tool-using agent:
//!
//! ```text
//! User Message
//!      │
//!      ▼
//! ┌─────────────┐   tool calls   ┌──────────────┐
//! │    AGENT    │ ─────────────▶ │    TOOLS     │  → keyword search over
//! │ (model turn)│ ◀───────────── │ (SearchTools)│    the knowledge base
//! └─────────────┘    results     └──────────────┘
//!      │
//!      ▼
//!  User Response
//! ```
//!
//! - [`executor`]: the AGENT/TOOLS state machine, blocking and streaming
//! - [`prompts`]: system instructions for each [`AnswerPolicy`]
//! - [`memory`]: per-thread history checkpoints

pub mod executor;
pub mod memory;
pub mod prompts;

pub use executor::{AgentEvent, AgentLoop, AgentRunResult, AgentState, SharedAgent};
pub use memory::ConversationMemory;

use serde::{Deserialize, Serialize};

/// How the agent treats questions the knowledge base cannot answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerPolicy {
    /// Refuse anything not backed by a tool result
    #[default]
    Strict,
    /// Fall back to general knowledge, flagged as such
    Permissive,
}

impl std::fmt::Display for AnswerPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnswerPolicy::Strict => write!(f, "strict"),
            AnswerPolicy::Permissive => write!(f, "permissive"),
        }
    }
}

impl std::str::FromStr for AnswerPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" => Ok(AnswerPolicy::Strict),
            "permissive" => Ok(AnswerPolicy::Permissive),
            other => Err(format!(
                "Unknown answer policy '{}'. Expected strict or permissive",
                other
            )),
        }
    }
}
