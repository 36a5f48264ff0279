//! Error taxonomy for the ingestion pipeline.
//!
//! Each pipeline stage has its own error type so the orchestrator can tell
//! run-fatal failures (configuration, authentication, fetch) apart from
//! failures that only affect a single message (parse, store, notify).

use thiserror::Error;

/// Invalid or incomplete configuration. Always detected before any network call.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for the expected shape.
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// One or more required values are absent.
    #[error("Missing required configuration: {}", .0.join(", "))]
    Missing(Vec<String>),

    /// A value is present but unusable.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Login to the portal failed.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Could not extract RequestVerificationToken from login page")]
    MissingToken,

    #[error("Login rejected with HTTP {status}: {snippet}")]
    Rejected { status: u16, snippet: String },

    #[error("Login failed: {0}")]
    Denied(String),

    #[error("Login failed with unexpected status {0}")]
    UnexpectedStatus(u16),

    #[error("Login request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid portal URL: {0}")]
    Url(String),
}

/// Both the BFF API and the HTML fallback failed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Not authenticated: redirected to login page while loading messages")]
    NotAuthenticated,

    #[error("Message page returned HTTP {0}")]
    Status(u16),

    #[error("Message request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid portal URL: {0}")]
    Url(String),
}

/// A message could not be matched against any known template.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("message body is empty")]
    Empty,

    #[error("message does not match any known consumption template")]
    UnrecognizedTemplate,
}

/// Persistence failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to encode parsed data: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Unsupported store URL '{0}': expected sqlite: or postgres://")]
    UnsupportedUrl(String),

    #[error("Failed to prepare database location: {0}")]
    Io(#[from] std::io::Error),
}

/// Mail composition or delivery failure.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Invalid mail address '{address}': {reason}")]
    Address { address: String, reason: String },

    #[error("Failed to build email: {0}")]
    Build(String),

    #[error("SMTP delivery failed: {0}")]
    Transport(String),
}

/// Run-level failure: the reason the orchestrator ended in `Failed`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Fetching messages failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Store failed: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Short stage label used in logs and the run report.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Config(_) => "config",
            PipelineError::Auth(_) => "auth",
            PipelineError::Fetch(_) => "fetch",
            PipelineError::Store(_) => "store",
        }
    }
}
