// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Ties one source adapter to the cache and the query engine.
//!
//! Per domain, the cache moves from "no dataset"
//! to "committed under fingerprint F",
//! and from there only ever to "committed under fingerprint F'".
//! A failed ingest leaves the previous state in place.
//! A dataset committed with unresolved organizations is materialized again
//! on every refresh, until all of them resolve.

use std::sync::Arc;

use thiserror::Error;

use crate::{
    adapters::{AdapterError, Registry, SourceAdapter},
    cache::{CacheError, CacheManager, LiveDataset, VersionIds},
    freshness::FreshnessChecker,
    model::{CompensationMatch, DigestSummary},
    query::{EmailQuery, QueryError},
};

#[derive(Error, Debug)]
pub enum PortalError {
    #[error("Adapter for '{0}' reported no version identifiers")]
    NoVersionIds(String),
    #[error("No adapter responsible for e-mail domain '{0}'")]
    NoAdapter(String),
    #[error("No dataset committed yet for '{0}'")]
    NoDigest(String),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Query(#[from] QueryError),
}

/// Outcome of a successful lookup.
/// Failures to determine the answer are reported as [`PortalError`] instead.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found(Vec<CompensationMatch>),
    /// The current dataset was searched, and holds nobody matching.
    Absent,
    /// Nobody matched, but the dataset lacks the staff of these organizations,
    /// as their domains could not be resolved.
    Incomplete(Vec<String>),
}

pub struct Portal {
    adapter: Arc<dyn SourceAdapter>,
    cache: Arc<CacheManager>,
    max_age_days: u64,
}

impl Portal {
    #[must_use]
    pub fn new(adapter: Arc<dyn SourceAdapter>, cache: Arc<CacheManager>, max_age_days: u64) -> Self {
        Self {
            adapter,
            cache,
            max_age_days,
        }
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.adapter.info().domain
    }

    /// Makes sure the cache holds a dataset of the newest upstream snapshot,
    /// materializing and committing it if not.
    pub async fn refresh(&self) -> Result<LiveDataset, PortalError> {
        let domain = self.domain();
        let ids = VersionIds::from(self.adapter.latest_version_ids().await?);
        if ids.is_empty() {
            return Err(PortalError::NoVersionIds(domain.to_owned()));
        }
        let fingerprint = ids.fingerprint();

        let _guard = self.cache.lock_domain(domain).await?;
        let Some(live) = self.cache.lookup(domain, &fingerprint).await? else {
            tracing::info!("[{domain}] New snapshot {fingerprint}, materializing ...");
            return self.ingest(&ids).await;
        };
        tracing::debug!("[{domain}] Cache hit for fingerprint {fingerprint}.");
        // leftovers of an interrupted commit
        if let Err(err) = self.cache.purge(domain, &fingerprint).await {
            tracing::warn!("[{domain}] Failed to purge superseded datasets: {err}");
        }
        let unresolved = self
            .cache
            .read_digest(domain)
            .await?
            .map(|digest| digest.unresolved)
            .unwrap_or_default();
        if unresolved.is_empty() {
            return Ok(live);
        }
        tracing::info!(
            "[{domain}] Dataset {fingerprint} lacks {} unresolved organizations, \
materializing again ...",
            unresolved.len()
        );
        match self.ingest(&ids).await {
            Ok(completed) => Ok(completed),
            Err(err) => {
                tracing::warn!("[{domain}] Keeping the incomplete dataset: {err}");
                Ok(live)
            }
        }
    }

    /// Materializes the snapshot and commits it; the caller holds the ingest lock.
    async fn ingest(&self, ids: &VersionIds) -> Result<LiveDataset, PortalError> {
        let table = self.adapter.materialize(ids.as_slice()).await?;
        Ok(self
            .cache
            .commit(
                self.domain(),
                &ids.fingerprint(),
                &table,
                &self.adapter.info().provenance(),
            )
            .await?)
    }

    /// Returns all records matching the e-mail address,
    /// each carrying that address.
    pub async fn run(&self, email: &str) -> Result<Vec<CompensationMatch>, PortalError> {
        let query = EmailQuery::parse(email)?;
        let live = self.refresh().await?;
        let records = self.cache.load(&live).await?;
        let matches = query.filter(&records);
        tracing::debug!(
            "[{}] {} of {} records match '{}'.",
            self.domain(),
            matches.len(),
            records.len(),
            query.email()
        );
        Ok(matches)
    }

    pub async fn get_compensation(&self, email: &str) -> Result<Lookup, PortalError> {
        let matches = self.run(email).await?;
        if !matches.is_empty() {
            return Ok(Lookup::Found(matches));
        }
        let unresolved = self
            .cache
            .read_digest(self.domain())
            .await?
            .map(|digest| digest.unresolved)
            .unwrap_or_default();
        if unresolved.is_empty() {
            Ok(Lookup::Absent)
        } else {
            Ok(Lookup::Incomplete(unresolved))
        }
    }

    /// Whether the cached dataset is recent enough.
    /// No dataset at all counts as not healthy.
    pub async fn health_check(&self) -> bool {
        let checker = FreshnessChecker::new(&self.cache, self.max_age_days);
        match checker.inspect(self.domain()).await {
            Ok(freshness) => freshness.is_fresh(),
            Err(err) => {
                tracing::warn!("[{}] Failed to check cache freshness: {err}", self.domain());
                false
            }
        }
    }

    /// The manifest of the current dataset, with its freshness filled in.
    pub async fn list_subdomains(&self) -> Result<DigestSummary, PortalError> {
        let mut digest = self
            .cache
            .read_digest(self.domain())
            .await?
            .ok_or_else(|| PortalError::NoDigest(self.domain().to_owned()))?;
        digest.refreshed = Some(self.health_check().await);
        Ok(digest)
    }
}

/// All portals of a run, picked by e-mail domain.
pub struct Portals {
    registry: Registry,
    cache: Arc<CacheManager>,
    max_age_days: u64,
}

impl Portals {
    #[must_use]
    pub const fn new(registry: Registry, cache: Arc<CacheManager>, max_age_days: u64) -> Self {
        Self {
            registry,
            cache,
            max_age_days,
        }
    }

    /// The portal responsible for the domain of the given e-mail address.
    pub fn for_email(&self, email: &str) -> Result<Portal, PortalError> {
        let query = EmailQuery::parse(email)?;
        let adapter = self
            .registry
            .find(query.domain())
            .ok_or_else(|| PortalError::NoAdapter(query.domain().to_owned()))?;
        Ok(Portal::new(adapter, Arc::clone(&self.cache), self.max_age_days))
    }

    pub async fn get_compensation(&self, email: &str) -> Result<Lookup, PortalError> {
        self.for_email(email)?.get_compensation(email).await
    }
}
