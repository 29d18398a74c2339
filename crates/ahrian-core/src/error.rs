use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{AgentKind, ConversationStatus, MediaKind};

#[derive(Debug, Error)]
pub enum AhrianError {
    // Planning errors
    #[error("Planning failed: {0}")]
    Planning(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Invalid clarification: {0}")]
    InvalidClarification(String),

    #[error("Planning timed out after {0}s")]
    PlanningTimeout(u64),

    // Step errors
    #[error("Agent failed: {0}")]
    Agent(String),

    #[error("Step {step} ({agent}) timed out after {timeout_secs}s")]
    StepTimeout {
        step: u32,
        agent: AgentKind,
        timeout_secs: u64,
    },

    #[error("No executor registered for agent kind: {0}")]
    ExecutorNotRegistered(AgentKind),

    #[error("Agent {agent} requires an attached {media}")]
    MissingAttachment { agent: AgentKind, media: MediaKind },

    // Engine misuse
    #[error("Conversation {id} is {status}; cannot {action}")]
    InvalidState {
        id: String,
        status: ConversationStatus,
        action: &'static str,
    },

    #[error("Unknown clarification option: {0}")]
    UnknownOption(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    #[error("Conversation not found: {0}")]
    NotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AhrianError>;

/// Machine-readable classification of a terminal conversation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    PlanningFailed,
    ClarificationFailed,
    StepFailed,
    StepTimeout,
    ExecutorNotRegistered,
    MissingAttachment,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlanningFailed => "planning_failed",
            Self::ClarificationFailed => "clarification_failed",
            Self::StepFailed => "step_failed",
            Self::StepTimeout => "step_timeout",
            Self::ExecutorNotRegistered => "executor_not_registered",
            Self::MissingAttachment => "missing_attachment",
        }
    }

    /// Code for an error raised while dispatching a step.
    pub fn for_step(err: &AhrianError) -> Self {
        match err {
            AhrianError::StepTimeout { .. } => Self::StepTimeout,
            AhrianError::ExecutorNotRegistered(_) => Self::ExecutorNotRegistered,
            AhrianError::MissingAttachment { .. } => Self::MissingAttachment,
            _ => Self::StepFailed,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
