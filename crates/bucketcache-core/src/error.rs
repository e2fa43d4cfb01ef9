//! Error types for bucketcache-core.
//!
//! Each variant corresponds to one of the error kinds in the design's
//! error table: most propagate to the caller, but `StoreWriteError` is
//! swallowed by the engine and only ever reaches a log line.

use thiserror::Error;

/// The main error type for bucketcache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A store operation was attempted before `setup_client` ran.
    #[error("no store client configured; call setup_client() first")]
    MissingClient,

    /// The supplied client failed to satisfy the store contract (e.g. a bad connection string).
    #[error("invalid store client: {0}")]
    InvalidClient(String),

    /// Registration-time validation failure (missing timestamp/tz argument,
    /// invalid lookup_name, missing tz_lookup argument, double registration).
    #[error("invalid registration: {0}")]
    InvalidRegistration(String),

    /// A timestamp argument could not be parsed or coerced to an aware datetime.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// A delta mixed a sub-day component with a >= 1 day component.
    #[error("invalid delta: {0}")]
    InvalidDelta(String),

    /// A custom bucket rule never changed its label within the probe bounds.
    #[error("could not detect a bucket boundary within probe bounds")]
    BucketNotDetected,

    /// Transport/protocol error while reading from the store. Propagates to the caller.
    #[error("store read error: {0}")]
    StoreReadError(String),

    /// Transport/protocol error while writing to the store. Swallowed and logged
    /// by the engine; never propagated to a foreground caller.
    #[error("store write error: {0}")]
    StoreWriteError(String),

    /// A cached payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for bucketcache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    /// True for the one error kind the engine must swallow rather than propagate (see
    /// the error-handling design: write errors are logged, read errors surface).
    pub fn is_write_error(&self) -> bool {
        matches!(self, CacheError::StoreWriteError(_))
    }
}
