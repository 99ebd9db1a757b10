use thiserror::Error;

use probe_common::report::ReportParseError;
use probe_streaming::StreamingError;

/// Enumeration of errors surfaced to user step code through the DSL.
#[derive(Error, Debug)]
pub enum DslError {
    #[error("dsl is not initialized; no test is currently executing")]
    NotInitialized,
    #[error(transparent)]
    Streaming(#[from] StreamingError),
}

impl DslError {
    pub fn kind(&self) -> &'static str {
        match self {
            DslError::NotInitialized => "DslNotInitialized",
            DslError::Streaming(e) => e.kind(),
        }
    }
}

/// Enumeration of errors for the runner adapter itself. Scenario failures
/// are not errors; they come back in the run result.
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("runner filesystem error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Report(#[from] ReportParseError),
    #[error("cucumber execution failed: {0}")]
    Execution(String),
}

impl RunnerError {
    pub fn kind(&self) -> &'static str {
        "CucumberError"
    }
}
