//! Error types for CVE triage

use thiserror::Error;

use super::AttemptRecord;

/// Error building the triage prompt
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Attempt number {0} is outside 1..=3")]
    InvalidAttempt(u32),

    #[error("Failed to format prompt: {0}")]
    Format(#[from] std::fmt::Error),
}

/// Error type for the triage loop
#[derive(Debug, Error)]
pub enum TriageError {
    #[error("Prompt could not be built: {0}")]
    Prompt(#[from] PromptError),

    #[error("No acceptable reply after {} attempts", attempts.len())]
    Exhausted { attempts: Vec<AttemptRecord> },
}
