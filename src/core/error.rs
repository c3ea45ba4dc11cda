use thiserror::Error;

/// Component-level error taxonomy.
///
/// Almost nothing here aborts a run: `NotFound`/`Timeout` are retried or
/// skipped by the caller, `Service` degrades to the next tier, and only
/// `Precondition` and exhausted `Navigation` surface as terminal statuses.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("missing required fields: {0}")]
    Precondition(String),

    #[error("element not found: {0}")]
    NotFound(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("external service error: {0}")]
    Service(String),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Evidence-counter key for this error kind.
    pub fn category(&self) -> &'static str {
        match self {
            EngineError::Precondition(_) => "precondition",
            EngineError::NotFound(_) => "not_found",
            EngineError::Timeout(_) => "timeout",
            EngineError::Navigation(_) => "navigation",
            EngineError::Service(_) => "service",
            EngineError::Browser(_) => "browser",
            EngineError::Fatal(_) => "fatal",
        }
    }
}

impl From<chromiumoxide::error::CdpError> for EngineError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        EngineError::Browser(e.to_string())
    }
}
