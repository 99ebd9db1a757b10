use thiserror::Error;

/// Enumeration of errors across the vault pipeline stages. Transient kinds
/// are retried once with backoff; everything else fails the test.
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("vault rejected the request with status {0}")]
    Auth(u16),
    #[error("vault has no credentials for this principal")]
    NotFound,
    #[error("vault rate limit exceeded")]
    RateLimit,
    #[error("vault unavailable, status {0}")]
    ServiceUnavailable(u16),
    #[error("vault request timed out")]
    Timeout,
    #[error("vault returned unexpected status {0}")]
    UpstreamStatus(u16),
    #[error("failed to reach vault: {0}")]
    Transport(reqwest::Error),
    #[error("vault mapping failed: {0}")]
    Mapping(String),
    #[error("invalid rosetta configuration: {0}")]
    Configuration(String),
    #[error("invalid request template: {0}")]
    InvalidTemplate(String),
}

impl VaultError {
    /// Transient errors are worth one retry; the rest are final.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            VaultError::RateLimit
                | VaultError::ServiceUnavailable(_)
                | VaultError::Timeout
                | VaultError::Transport(_)
        )
    }

    /// Machine-readable kind string surfaced in terminal test status.
    pub fn kind(&self) -> &'static str {
        match self {
            VaultError::Auth(_) => "VaultAuth",
            VaultError::NotFound => "VaultNotFound",
            VaultError::RateLimit => "VaultRateLimit",
            VaultError::ServiceUnavailable(_) => "VaultServiceUnavailable",
            VaultError::Timeout | VaultError::Transport(_) => "VaultTimeout",
            VaultError::UpstreamStatus(_) => "VaultServiceError",
            VaultError::Mapping(_) => "VaultMapping",
            VaultError::Configuration(_) => "VaultConfiguration",
            VaultError::InvalidTemplate(_) => "InvalidTemplate",
        }
    }
}
