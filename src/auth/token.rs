//! Portal bearer token with a 24-hour lifetime and its on-disk cache.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::error::StoreError;
use crate::settings;

/// Token TTL in hours.
pub const TOKEN_TTL_HOURS: i64 = 24;

/// Bearer token captured from a portal login, with the time it was acquired.
///
/// Tokens are replaced, never modified. The token string is cleared from memory on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    token: String,
    acquired_at: DateTime<Utc>,
}

impl AuthToken {
    pub fn new(token: impl Into<String>, acquired_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            acquired_at,
        }
    }

    /// Token acquired right now.
    pub fn fresh(token: impl Into<String>) -> Self {
        Self::new(token, Utc::now())
    }

    /// The raw bearer value, for the `Authorization` header only.
    pub fn secret(&self) -> &str {
        &self.token
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.acquired_at + Duration::hours(TOKEN_TTL_HOURS)
    }

    /// Check if the token can still be used at `now`.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        is_valid(self, now)
    }
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("token", &"[REDACTED]")
            .field("acquired_at", &self.acquired_at)
            .finish()
    }
}

impl Drop for AuthToken {
    fn drop(&mut self) {
        self.token.zeroize();
    }
}

/// A token is valid while it is non-empty and younger than [`TOKEN_TTL_HOURS`].
pub fn is_valid(token: &AuthToken, now: DateTime<Utc>) -> bool {
    !token.token.trim().is_empty() && now - token.acquired_at < Duration::hours(TOKEN_TTL_HOURS)
}

/// File-backed cache for a single [`AuthToken`].
#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Cache stored as `token.json` inside `state_dir`.
    pub fn in_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join(settings::TOKEN_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cached token.
    ///
    /// Missing, unreadable or malformed files are a cache miss, never an error.
    pub fn load(&self) -> Option<AuthToken> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No cached token at {:?}", self.path);
                return None;
            }
            Err(e) => {
                warn!("Failed to read cached token: {}, ignoring cache", e);
                return None;
            }
        };

        match serde_json::from_str::<AuthToken>(&content) {
            Ok(token) => {
                debug!("Loaded cached token acquired at {}", token.acquired_at);
                Some(token)
            }
            Err(e) => {
                warn!("Cached token is corrupt: {}, ignoring cache", e);
                None
            }
        }
    }

    /// Replace the cached token.
    pub fn save(&self, token: &AuthToken) -> Result<(), StoreError> {
        let content = serde_json::to_vec_pretty(token)?;
        settings::write_atomic(&self.path, &content)?;
        info!(
            "Saved authentication token (valid for {})",
            format_duration(token.expires_at() - Utc::now())
        );
        Ok(())
    }

    /// Remove the cached token, if any.
    pub fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Format duration as human-readable string (e.g., "45 min", "1 hour").
pub fn format_duration(duration: Duration) -> String {
    let total_minutes = duration.num_minutes();

    if total_minutes < 1 {
        "< 1 min".to_string()
    } else if total_minutes < 60 {
        format!("{} min", total_minutes)
    } else {
        let hours = total_minutes / 60;
        let mins = total_minutes % 60;
        if mins == 0 {
            format!("{} hour{}", hours, if hours == 1 { "" } else { "s" })
        } else {
            format!("{}h {}m", hours, mins)
        }
    }
}
