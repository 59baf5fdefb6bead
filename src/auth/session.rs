//! Token lifecycle for one run: cache hit, fresh login, and re-login after rejection.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::login::{Authenticator, Credentials};
use super::token::{format_duration, AuthToken, TokenCache};
use crate::error::AuthError;

/// Holds the current token and knows how to replace it.
pub struct Session {
    cache: TokenCache,
    authenticator: Arc<dyn Authenticator>,
    credentials: Credentials,
    current: Option<AuthToken>,
    logins: u32,
}

impl Session {
    /// Create a session seeded from the token cache.
    pub fn new(
        cache: TokenCache,
        authenticator: Arc<dyn Authenticator>,
        credentials: Credentials,
    ) -> Self {
        let current = cache.load();
        Self {
            cache,
            authenticator,
            credentials,
            current,
            logins: 0,
        }
    }

    /// Ignore whatever token the cache held.
    pub fn discard_cached_token(mut self) -> Self {
        self.current = None;
        self
    }

    /// Return a usable token, signing in if the cached one is missing or expired.
    pub async fn token(&mut self, now: DateTime<Utc>) -> Result<AuthToken, AuthError> {
        match &self.current {
            Some(token) if token.is_valid(now) => {
                debug!(
                    "Using cached token from {} (expires in {})",
                    token.acquired_at().format("%Y-%m-%d %H:%M UTC"),
                    format_duration(token.expires_at() - now)
                );
                return Ok(token.clone());
            }
            Some(_) => info!("Cached token expired, signing in again"),
            None => info!("No cached token, signing in"),
        }

        self.login().await
    }

    /// Drop the rejected token and sign in once more.
    pub async fn relogin(&mut self) -> Result<AuthToken, AuthError> {
        warn!("Token rejected by the portal, signing in again");
        self.current = None;
        if let Err(e) = self.cache.clear() {
            warn!("Failed to clear rejected token: {}", e);
        }
        self.login().await
    }

    /// Number of logins performed by this session.
    pub fn logins(&self) -> u32 {
        self.logins
    }

    /// The token the session ended with, if any.
    pub fn into_token(self) -> Option<AuthToken> {
        self.current
    }

    async fn login(&mut self) -> Result<AuthToken, AuthError> {
        let token = self.authenticator.login(&self.credentials).await?;
        self.logins += 1;

        // An unsaved token still works for this run.
        if let Err(e) = self.cache.save(&token) {
            warn!("Failed to cache token: {}", e);
        }

        self.current = Some(token.clone());
        Ok(token)
    }
}
