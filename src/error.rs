use thiserror::Error;

/// Failures that end a batch phase.
///
/// Malformed input is not an error here: it is skipped and counted where it
/// is found. Conflicting flag proposals are resolved by the flag store.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Ledger or flag table unreachable. The phase commits nothing.
    #[error("{source_name} unavailable: {detail}")]
    DataSourceUnavailable { source_name: String, detail: String },

    #[error("wallet not found: {0}")]
    UnknownWallet(String),

    #[error("classifier unavailable: {0}")]
    ClassifierUnavailable(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("worker task failed: {0}")]
    Worker(String),
}

impl EngineError {
    pub fn unavailable(source_name: impl Into<String>, detail: impl ToString) -> Self {
        EngineError::DataSourceUnavailable {
            source_name: source_name.into(),
            detail: detail.to_string(),
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::unavailable("sqlite", e)
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(e: tokio::task::JoinError) -> Self {
        EngineError::Worker(e.to_string())
    }
}
