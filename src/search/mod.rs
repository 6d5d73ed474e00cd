// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Web search engines, used to find the internet domain of an organization,
//! given only its (free-text) name.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoEnumIterator};
use thiserror::Error;
use url::Url;

use crate::tools;

pub mod bing;
pub mod duckduckgo;
pub mod google;

pub type RL = governor::RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::QuantaClock,
    governor::middleware::NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Thrown when a single query to a single search engine failed.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Network/Internet download failed: '{0}'")]
    DownloadError(#[from] reqwest::Error),
    #[error("Network/Internet download failed: '{0}'")]
    DownloadMiddlewareError(#[from] reqwest_middleware::Error),
    #[error("Search engine {0} answered with unexpected HTTP status {1}")]
    UnexpectedStatus(&'static str, reqwest::StatusCode),
    #[error("Failed to parse the result page of {0}: {1}")]
    Parse(&'static str, String),
}

/// The supported search engines, in the order they are tried.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter,
)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    Bing,
    Google,
    DuckDuckGo,
}

impl EngineKind {
    #[must_use]
    pub const fn to_str(self) -> &'static str {
        match self {
            Self::Bing => "bing",
            Self::Google => "google",
            Self::DuckDuckGo => "duckduckgo",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.to_str().fmt(f)
    }
}

/// The first localized result of a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    /// Host name of the result, without any leading `www.`.
    pub domain: String,
    pub path: String,
}

#[async_trait]
pub trait SearchEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Issues a single query,
    /// returning the first result within the configured country,
    /// or `None` if there was none.
    async fn lookup(&self, query: &str) -> Result<Option<SearchHit>, SearchError>;
}

/// What all our HTML scraping search engines share.
pub struct EngineBase {
    client: Arc<ClientWithMiddleware>,
    rate_limiter: Arc<RL>,
    country_suffix: String,
}

impl EngineBase {
    #[must_use]
    pub fn new(
        client: Arc<ClientWithMiddleware>,
        rate_limiter: Arc<RL>,
        country_suffix: String,
    ) -> Self {
        Self {
            client,
            rate_limiter,
            country_suffix,
        }
    }

    async fn fetch(&self, engine: &'static str, url: &str) -> Result<String, SearchError> {
        self.rate_limiter.until_ready().await;
        tracing::trace!("Querying {engine}: {url}");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SearchError::UnexpectedStatus(engine, status));
        }
        Ok(response.text().await?)
    }

    fn first_localized(&self, candidates: impl IntoIterator<Item = Url>) -> Option<SearchHit> {
        first_localized(candidates, &self.country_suffix)
    }
}

/// Picks the first candidate whose host lies within the country
/// identified by its top-level domain (e.g. `.br`).
pub fn first_localized(
    candidates: impl IntoIterator<Item = Url>,
    country_suffix: &str,
) -> Option<SearchHit> {
    candidates.into_iter().find_map(|url| {
        let host = tools::strip_www(url.host_str()?).to_lowercase();
        host.ends_with(country_suffix).then(|| SearchHit {
            domain: host,
            path: url.path().to_owned(),
        })
    })
}

/// Creates a rate limiter allowing one request per `interval`,
/// shared by all engines, as they all go out from the same network address.
#[must_use]
pub fn create_rate_limiter(interval: Duration) -> Arc<RL> {
    let quota = Quota::with_period(interval)
        .unwrap_or_else(|| Quota::per_second(std::num::NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Parses `raw` as an absolute URL,
/// or relative to `base`.
/// If the resulting URL carries the real target in the query parameter `param`
/// (a redirect link), that one is returned instead.
fn unwrap_redirect(raw: &str, base: &Url, param: &str) -> Option<Url> {
    let url = Url::parse(raw).or_else(|_err| base.join(raw)).ok()?;
    let target = url
        .query_pairs()
        .find(|(key, _)| key == param)
        .and_then(|(_, value)| Url::parse(&value).ok());
    Some(target.unwrap_or(url))
}

/// The default search engine chain: Bing, then Google, then DuckDuckGo.
#[must_use]
pub fn default_chain(
    client: &Arc<ClientWithMiddleware>,
    rate_limiter: &Arc<RL>,
    country_suffix: &str,
) -> Vec<Box<dyn SearchEngine>> {
    EngineKind::iter()
        .map(|kind| {
            let base = EngineBase::new(
                Arc::clone(client),
                Arc::clone(rate_limiter),
                country_suffix.to_owned(),
            );
            let engine: Box<dyn SearchEngine> = match kind {
                EngineKind::Bing => Box::new(bing::Bing::new(base)),
                EngineKind::Google => Box::new(google::Google::new(base)),
                EngineKind::DuckDuckGo => Box::new(duckduckgo::DuckDuckGo::new(base)),
            };
            engine
        })
        .collect()
}
