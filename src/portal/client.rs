//! LSAC application status API client.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::models::{parse_status, ApplicationIdentifier, ParseOutcome, StatusRecord};
use crate::auth::AuthToken;
use crate::config::PortalConfig;
use crate::error::PortalError;

/// Status endpoint path below the API base URL.
const STATUS_PATH: &str = "/Schools/000/ApplicationStatus/0";

/// Fetches the current status of one application.
#[async_trait]
pub trait PortalClient: Send + Sync {
    async fn fetch_status(
        &self,
        id: &ApplicationIdentifier,
        token: &AuthToken,
    ) -> Result<StatusRecord, PortalError>;
}

/// reqwest-backed client for the status API.
pub struct LsacClient {
    http_client: Client,
    api_base_url: String,
    subscription_key: String,
}

impl LsacClient {
    /// Create a new client from the portal configuration.
    pub fn new(config: &PortalConfig) -> Result<Self, PortalError> {
        let http_client = Client::builder()
            .timeout(StdDuration::from_secs(config.timeout_seconds))
            .connect_timeout(StdDuration::from_secs(config.connect_timeout_seconds))
            .build()
            .map_err(|e| PortalError::Transient(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            subscription_key: config.subscription_key.clone(),
        })
    }

    /// Get the raw status payload for an application.
    pub async fn get_status(
        &self,
        id: &ApplicationIdentifier,
        token: &AuthToken,
    ) -> Result<Value, PortalError> {
        let url = format!("{}{}", self.api_base_url, STATUS_PATH);

        debug!("Fetching status for guid {}", id);

        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("guid", id.as_str()),
                ("subscription-key", self.subscription_key.as_str()),
            ])
            .header("Authorization", format!("bearer {}", token.secret()))
            .header("Ocp-Apim-Subscription-Key", &self.subscription_key)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        match status.as_u16() {
            200 => response
                .json::<Value>()
                .await
                .map_err(|e| PortalError::InvalidResponse(e.to_string())),
            401 | 403 => Err(PortalError::AuthRejected),
            400 | 404 => {
                let body = response.text().await.unwrap_or_default();
                warn!("Portal rejected guid {}: HTTP {} - {}", id, status, body);
                Err(PortalError::InvalidIdentifier(format!("HTTP {}", status)))
            }
            408 | 429 | 500..=599 => Err(PortalError::Transient(format!("HTTP {}", status))),
            _ => {
                let body = response.text().await.unwrap_or_default();
                error!("Unexpected status response: HTTP {} - {}", status, body);
                Err(PortalError::InvalidResponse(format!("HTTP {}", status)))
            }
        }
    }
}

#[async_trait]
impl PortalClient for LsacClient {
    async fn fetch_status(
        &self,
        id: &ApplicationIdentifier,
        token: &AuthToken,
    ) -> Result<StatusRecord, PortalError> {
        let payload = self.get_status(id, token).await?;
        match parse_status(payload, Utc::now()) {
            ParseOutcome::Parsed(record) => Ok(record),
            ParseOutcome::Malformed(reason) => Err(PortalError::InvalidResponse(reason)),
        }
    }
}

fn classify_send_error(e: reqwest::Error) -> PortalError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        PortalError::Transient(e.to_string())
    } else {
        PortalError::InvalidResponse(e.to_string())
    }
}
