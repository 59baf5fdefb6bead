//! Error types for the lsac-watch application.
//!
//! Uses `thiserror` for library-style errors with automatic `Display` and `Error` implementations.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level application error type.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Portal error: {0}")]
    Portal(#[from] PortalError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration problems. All of these abort a run before any portal request.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing credential: set {0}")]
    MissingCredential(&'static str),

    #[error("Schools file not found: {}", .0.display())]
    SchoolsFileNotFound(PathBuf),

    #[error("Failed to read schools file {}: {source}", .path.display())]
    SchoolsFileUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No schools configured in {}", .0.display())]
    NoSchools(PathBuf),

    #[error("Line {line}: link has no guid parameter")]
    MissingGuid { line: usize },

    #[error("Invalid application GUID '{guid}': {reason}")]
    InvalidGuid { guid: String, reason: String },

    #[error("Duplicate application GUID '{guid}' for '{first}' and '{second}'")]
    DuplicateIdentifier {
        guid: String,
        first: String,
        second: String,
    },

    #[error("{0}")]
    Invalid(String),
}

/// Login collaborator errors.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Login failed: {0}")]
    LoginFailed(String),

    #[error("Failed to start login helper '{program}': {source}")]
    HelperSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("User cancelled authentication")]
    UserCancelled,
}

/// Status portal errors, as seen by a single fetch.
#[derive(Error, Debug)]
pub enum PortalError {
    #[error("Unauthorized: token rejected by the portal")]
    AuthRejected,

    #[error("Invalid or unknown application identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Invalid API response: {0}")]
    InvalidResponse(String),
}

impl PortalError {
    /// Returns a user-friendly message for the run report.
    pub fn user_message(&self) -> &str {
        match self {
            Self::AuthRejected => "Session rejected by the portal. Try signing in again.",
            Self::InvalidIdentifier(_) => "Invalid GUID. Check the link in your schools file.",
            Self::Transient(_) => "Network error. Check your connection.",
            Self::InvalidResponse(_) => "Unexpected response from the portal.",
        }
    }

    /// Returns true if the same request may succeed when repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Returns true if this error should trigger a fresh login.
    pub fn requires_login(&self) -> bool {
        matches!(self, Self::AuthRejected)
    }
}

/// Local state persistence errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl AppError {
    /// Returns a user-friendly message for console output.
    pub fn user_message(&self) -> &str {
        match self {
            Self::Config(ConfigError::MissingCredential(_)) => {
                "Missing credentials. Set LSAC_USERNAME and LSAC_PASSWORD."
            }
            Self::Config(ConfigError::SchoolsFileNotFound(_)) => {
                "Schools file not found. Create one with a status checker link per line."
            }
            Self::Config(_) => "Configuration error. Please check settings.",
            Self::Auth(AuthError::UserCancelled) => "Sign-in was cancelled.",
            Self::Auth(_) => "Sign-in failed. Check your credentials and login helper.",
            Self::Portal(e) => e.user_message(),
            Self::Store(_) => "Failed to save local state.",
        }
    }

    /// Returns true if this error stops the whole run rather than one application.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Auth(_))
    }
}
