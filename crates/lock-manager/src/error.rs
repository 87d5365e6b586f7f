use thiserror::Error;

/// Errors that can occur when acquiring or releasing a lease.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lease stayed held for every attempt.
    #[error("Failed to acquire lock {key} after {attempts} attempts")]
    Contended { key: String, attempts: u32 },

    /// The lock backend could not be reached or rejected the command.
    #[error("Lock backend error: {0}")]
    Backend(#[from] redis::RedisError),

    /// A failure injected by a test double.
    #[error("Injected failure: {0}")]
    Injected(&'static str),
}

/// Result type for lock operations.
pub type Result<T> = std::result::Result<T, LockError>;
