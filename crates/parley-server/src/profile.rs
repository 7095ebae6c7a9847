//! HTTP client for the external profile service.

use crate::config::ProfileConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use parley_core::{ProfileError, ProfileSource, UserProfile};
use parley_protocol::UserId;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::trace;

/// Fetches profiles with `GET {base_url}/profileData?userID=<id>`.
#[derive(Clone)]
pub struct HttpProfileSource {
    client: reqwest::Client,
    url: String,
}

impl HttpProfileSource {
    /// Create a client for the configured service.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &ProfileConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("Failed to create profile client")?;

        let url = format!("{}/profileData", config.base_url.trim_end_matches('/'));

        Ok(Self { client, url })
    }
}

#[async_trait]
impl ProfileSource for HttpProfileSource {
    async fn profile(&self, user: UserId) -> Result<UserProfile, ProfileError> {
        trace!(user = %user, "Fetching profile");

        let response = self
            .client
            .get(&self.url)
            .query(&[("userID", user.to_string())])
            .send()
            .await
            .map_err(|e| ProfileError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(ProfileError::NotFound(user)),
            status if !status.is_success() => {
                return Err(ProfileError::Unavailable(format!(
                    "profile service answered {status}"
                )));
            }
            _ => {}
        }

        response
            .json::<UserProfile>()
            .await
            .map_err(|e| ProfileError::Malformed(e.to_string()))
    }
}
