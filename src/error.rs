//! Top-level error types for the patch-watch pipeline.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Store (repository) errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to connect to SQLite: {0}")]
    Connect(#[from] sqlx::Error),

    #[error("schema setup failed: {0}")]
    Schema(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Feed fetch and parse errors. See spec §7 for the kinds this maps to.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Connect/read timeout, 5xx, or 429 after retries exhausted.
    #[error("transient network failure fetching {url}: {source}")]
    Transient {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    /// 404, or any other terminal 4xx, or parser bozo with zero entries.
    #[error("feed unavailable for {subsystem}: {reason}")]
    Unavailable { subsystem: String, reason: String },

    /// The Atom XML itself could not be parsed.
    #[error("failed to parse feed XML for {subsystem}: {source}")]
    Malformed {
        subsystem: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Filter rule parsing/evaluation errors (e.g. malformed regex pattern).
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("invalid pattern in filter '{filter_name}' field '{field}': {source}")]
    InvalidPattern {
        filter_name: String,
        field: String,
        #[source]
        source: regex::Error,
    },

    #[error("unknown filter field: {0}")]
    UnknownField(String),
}

/// Platform send/update/thread-create failures. Never roll back a
/// FeedMessage write; see spec §7 PlatformError semantics.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("{platform}: send failed: {reason}")]
    SendFailed { platform: String, reason: String },

    #[error("{platform}: thread create failed: {reason}")]
    ThreadCreateFailed { platform: String, reason: String },

    #[error("{platform}: rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        platform: String,
        retry_after_secs: u64,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
