use thiserror::Error;

/// Errors that can occur within the timer subsystem.
#[derive(Debug, Error)]
pub enum TimerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Connection-level I/O failure talking to the store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The payload could not be encoded or decoded as JSON.
    #[error("Payload error: {0}")]
    Payload(#[from] serde_json::Error),

    /// A stored timestamp column failed to parse as RFC 3339.
    #[error("Corrupt timestamp in column {column}: {value}")]
    CorruptTimestamp {
        column: &'static str,
        value: String,
    },
}

impl TimerError {
    /// Whether the dispatch loop should treat this as a transient
    /// infrastructure failure and restart its pass, rather than stop.
    pub fn is_transient(&self) -> bool {
        matches!(self, TimerError::Store(_) | TimerError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, TimerError>;
