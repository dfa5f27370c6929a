//! Application error types and their retry/recovery classification.

use thiserror::Error;

/// Application-level errors for the migration engine.
#[derive(Error, Debug)]
pub enum AppError {
    // Configuration errors (fatal, reported before any I/O)
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    // Network errors
    #[error("HTTP {status} from {url}: {body}")]
    Http {
        status: u16,
        url: String,
        body: String,
    },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    // Relational source errors
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),

    // Local errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Domain errors
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Backend '{backend}' unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True for HTTP 429 responses; the only errors the retry policy retries.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AppError::Http { status: 429, .. })
    }

    /// True when a create failed because the entity already exists.
    ///
    /// Backends disagree on how they report this: some return 409, others a
    /// 400/422 whose body mentions a duplicate key.
    pub fn is_conflict(&self) -> bool {
        match self {
            AppError::Http { status: 409, .. } => true,
            AppError::Http { status, body, .. } if (400..500).contains(status) => {
                mentions_duplicate(body)
            }
            AppError::Validation(msg) => mentions_duplicate(msg),
            _ => false,
        }
    }

    /// Errors that abort the whole run instead of a single entity.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AppError::Config(_) | AppError::MissingCredentials(_))
    }

    /// Raw payload worth printing in verbose mode.
    pub fn payload(&self) -> Option<&str> {
        match self {
            AppError::Http { body, .. } if !body.is_empty() => Some(body),
            _ => None,
        }
    }
}

fn mentions_duplicate(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("already exists") || lower.contains("duplicate")
}

impl From<deadpool_postgres::PoolError> for AppError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        AppError::Pool(err.to_string())
    }
}
