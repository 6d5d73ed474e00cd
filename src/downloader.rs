// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{sync::Arc, time::Duration};

use reqwest::{
    header::{self, HeaderValue},
    Client,
};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, Jitter, RetryTransientMiddleware};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF: u64 = 1000;
pub const DEFAULT_TIMEOUT: u64 = 30000;

#[derive(Error, Debug)]
pub enum CreationError {
    #[error("Invalid HTTP header value: {0}")]
    InvalidHeader(#[from] header::InvalidHeaderValue),
    #[error("Failed to create the HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    /// Number of retries for a single request,
    /// after the initial attempt.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Fixed wait between two attempts in milliseconds (ms)
    #[serde(default = "default_backoff")]
    pub backoff: u64,
    /// Total timeout per request in milliseconds (ms)
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

const fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

const fn default_backoff() -> u64 {
    DEFAULT_BACKOFF
}

const fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            backoff: DEFAULT_BACKOFF,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Creates a new [`reqwest::Client`] with the supplied retry and timeout settings.
///
/// Transient failures (connection problems, 5xx, 429) are retried
/// after always the same delay.
/// Once the retries are used up, the last response is handed out as is,
/// or the last transport error is returned.
pub fn create_downloader(
    retry: &RetrySettings,
    user_agent: &str,
) -> Result<Arc<ClientWithMiddleware>, CreationError> {
    let backoff = Duration::from_millis(retry.backoff);
    let retry_policy = ExponentialBackoff::builder()
        .retry_bounds(backoff, backoff)
        .jitter(Jitter::None)
        .base(1)
        .build_with_max_retries(retry.retries);

    let mut headers = header::HeaderMap::new();
    headers.insert(header::USER_AGENT, HeaderValue::from_str(user_agent)?);
    let client = Client::builder()
        .timeout(Duration::from_millis(retry.timeout))
        .default_headers(headers)
        .build()?;

    Ok(Arc::new(
        ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in_missing_keys() {
        let retry: RetrySettings = serde_json::from_str(r#"{"retries": 5}"#).unwrap();
        assert_eq!(
            retry,
            RetrySettings {
                retries: 5,
                ..RetrySettings::default()
            }
        );
    }

    #[test]
    fn rejects_invalid_user_agents() {
        assert!(matches!(
            create_downloader(&RetrySettings::default(), "bad\nagent"),
            Err(CreationError::InvalidHeader(_))
        ));
        assert!(create_downloader(&RetrySettings::default(), crate::tools::USER_AGENT_DEFAULT).is_ok());
    }
}
