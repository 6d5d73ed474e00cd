// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Resolves free-text organization names to internet domains,
//! by asking a chain of web search engines.
//!
//! All resolved names end up in one store, shared by all portal domains.
//! The whole read-resolve-write cycle runs under one lock,
//! which serializes resolution across all portal domains.

pub mod store;

use std::{collections::HashSet, fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::{
    model::OrganizationDomainMapping,
    search::{SearchEngine, SearchHit},
};
use store::{MappingBackend, StoreError};

/// What to do once a name could not be resolved by any engine.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Stop resolving the remaining names of this call.
    #[default]
    Stop,
    /// Continue with the next name.
    Skip,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ResolverSettings {
    /// How long to wait for the store lock, in milliseconds.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout: u64,
    /// How long the whole engine chain may take for a single name, in milliseconds.
    #[serde(default = "default_lookup_timeout")]
    pub lookup_timeout: u64,
    #[serde(default)]
    pub exhaustion: ExhaustionPolicy,
}

const fn default_lock_timeout() -> u64 {
    10 * 60 * 1000
}

const fn default_lookup_timeout() -> u64 {
    2 * 60 * 1000
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            lock_timeout: default_lock_timeout(),
            lookup_timeout: default_lookup_timeout(),
            exhaustion: ExhaustionPolicy::default(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Timed out waiting for the organization store lock")]
    LockTimeout,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How a single engine fared with a single name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutcome {
    NoResult,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineAttempt {
    pub engine: String,
    pub outcome: EngineOutcome,
}

impl fmt::Display for EngineAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            EngineOutcome::NoResult => write!(f, "{}: no localized result", self.engine),
            EngineOutcome::Failed(reason) => write!(f, "{}: {reason}", self.engine),
        }
    }
}

/// Why a single organization name could not be resolved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("All search engines failed: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Exhausted(Vec<EngineAttempt>),
    #[error("Search engine chain did not finish within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupFailure {
    pub name: String,
    pub error: LookupError,
}

/// Result of one [`DomainResolver::resolve`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ResolveReport {
    /// All stored mappings of the requested parent domain,
    /// including those resolved in earlier calls.
    pub mappings: Vec<OrganizationDomainMapping>,
    pub failures: Vec<LookupFailure>,
    /// Names not even tried, because of [`ExhaustionPolicy::Stop`].
    pub unattempted: Vec<String>,
}

impl ResolveReport {
    /// The mapping for the given organization name, if it was resolved.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&OrganizationDomainMapping> {
        self.mappings.iter().find(|mapping| mapping.name == name)
    }
}

/// Makes a name friendlier to search engines.
///
/// ```
/// # use monetometro::resolver::normalize_name;
/// assert_eq!(normalize_name(r#"SEC.EST.DA "SAUDE""#), "SEC. EST. DA  SAUDE ");
/// ```
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.replace('.', ". ").replace('"', " ")
}

pub struct DomainResolver {
    engines: Vec<Box<dyn SearchEngine>>,
    backend: Arc<dyn MappingBackend>,
    lock: Mutex<()>,
    settings: ResolverSettings,
}

impl DomainResolver {
    #[must_use]
    pub fn new(
        engines: Vec<Box<dyn SearchEngine>>,
        backend: Arc<dyn MappingBackend>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            engines,
            backend,
            lock: Mutex::new(()),
            settings,
        }
    }

    /// Resolves all the given organization names that are not yet known
    /// under `parent_domain`, and returns all known mappings of `parent_domain`.
    ///
    /// The store is rewritten after every newly resolved name,
    /// so progress survives a crash in the middle of a long list.
    pub async fn resolve<S: AsRef<str>>(
        &self,
        names: &[S],
        parent_domain: &str,
    ) -> Result<ResolveReport, ResolveError> {
        let lock_timeout = Duration::from_millis(self.settings.lock_timeout);
        let _guard = tokio::time::timeout(lock_timeout, self.lock.lock())
            .await
            .map_err(|_elapsed| ResolveError::LockTimeout)?;
        let _store_lock = self.backend.acquire(lock_timeout).await?;

        let mut mappings = self.backend.load().await?;
        let mut seen = HashSet::new();
        let missing: Vec<&str> = names
            .iter()
            .map(|name| name.as_ref().trim())
            .filter(|name| !name.is_empty())
            .filter(|name| seen.insert(*name))
            .filter(|name| !mappings.iter().any(|known| known.is_for(name, parent_domain)))
            .collect();
        if !missing.is_empty() {
            tracing::info!(
                "[{parent_domain}] Resolving the domains of {} organizations ...",
                missing.len()
            );
        }

        let mut report = ResolveReport::default();
        for (idx, name) in missing.iter().enumerate() {
            match self.resolve_one(name, parent_domain).await {
                Ok(mapping) => {
                    tracing::debug!("[{parent_domain}] '{name}' -> {}", mapping.domain);
                    mappings.push(mapping);
                    self.backend.save(&mappings).await?;
                }
                Err(error) => {
                    tracing::warn!("[{parent_domain}] Failed to resolve '{name}': {error}");
                    report.failures.push(LookupFailure {
                        name: (*name).to_owned(),
                        error,
                    });
                    if self.settings.exhaustion == ExhaustionPolicy::Stop {
                        report.unattempted = missing[idx + 1..]
                            .iter()
                            .map(|name| (*name).to_owned())
                            .collect();
                        if !report.unattempted.is_empty() {
                            tracing::warn!(
                                "[{parent_domain}] Not resolving the remaining {} organizations.",
                                report.unattempted.len()
                            );
                        }
                        break;
                    }
                }
            }
        }

        report.mappings = mappings
            .into_iter()
            .filter(|mapping| mapping.parent_domain == parent_domain)
            .collect();
        Ok(report)
    }

    async fn resolve_one(
        &self,
        name: &str,
        parent_domain: &str,
    ) -> Result<OrganizationDomainMapping, LookupError> {
        let lookup_timeout = Duration::from_millis(self.settings.lookup_timeout);
        let hit = tokio::time::timeout(lookup_timeout, self.search(name, parent_domain))
            .await
            .map_err(|_elapsed| LookupError::Timeout(lookup_timeout))??;
        Ok(OrganizationDomainMapping::from_resolved(
            name,
            &hit.domain,
            parent_domain,
        ))
    }

    /// Asks one engine after the other, stopping at the first hit.
    async fn search(&self, name: &str, parent_domain: &str) -> Result<SearchHit, LookupError> {
        let query = format!("{} {parent_domain}", normalize_name(name));
        let mut attempts = Vec::with_capacity(self.engines.len());
        for engine in &self.engines {
            let outcome = match engine.lookup(&query).await {
                Ok(Some(hit)) => return Ok(hit),
                Ok(None) => EngineOutcome::NoResult,
                Err(err) => {
                    tracing::debug!("Search engine {} failed for '{query}': {err}", engine.name());
                    EngineOutcome::Failed(err.to_string())
                }
            };
            attempts.push(EngineAttempt {
                engine: engine.name().to_owned(),
                outcome,
            });
        }
        Err(LookupError::Exhausted(attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SearchError;
    use async_trait::async_trait;
    use std::{collections::HashMap, sync::Mutex as SyncMutex};
    use store::MemoryBackend;

    /// Answers from a fixed table, keyed by organization name, and counts queries.
    struct FakeEngine {
        name: &'static str,
        answers: HashMap<&'static str, &'static str>,
        queries: SyncMutex<Vec<String>>,
    }

    impl FakeEngine {
        fn new(name: &'static str, answers: &[(&'static str, &'static str)]) -> Self {
            Self {
                name,
                answers: answers.iter().copied().collect(),
                queries: SyncMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SearchEngine for FakeEngine {
        fn name(&self) -> &str {
            self.name
        }

        async fn lookup(&self, query: &str) -> Result<Option<SearchHit>, SearchError> {
            self.queries.lock().unwrap().push(query.to_owned());
            if query.starts_with("BROKEN") {
                return Err(SearchError::Parse("fake", "garbage".to_owned()));
            }
            Ok(self
                .answers
                .iter()
                .find(|(name, _)| query.starts_with(*name))
                .map(|(_, domain)| SearchHit {
                    domain: (*domain).to_owned(),
                    path: "/".to_owned(),
                }))
        }
    }

    fn resolver(
        engines: Vec<Box<dyn SearchEngine>>,
        backend: Arc<MemoryBackend>,
        exhaustion: ExhaustionPolicy,
    ) -> DomainResolver {
        DomainResolver::new(
            engines,
            backend,
            ResolverSettings {
                exhaustion,
                ..ResolverSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn falls_back_to_later_engines() {
        let backend = Arc::new(MemoryBackend::default());
        let resolver = resolver(
            vec![
                Box::new(FakeEngine::new("a", &[])),
                Box::new(FakeEngine::new("b", &[])),
                Box::new(FakeEngine::new("c", &[("IEMA", "iema.es.gov.br")])),
            ],
            Arc::clone(&backend),
            ExhaustionPolicy::Stop,
        );
        let report = resolver.resolve(&["IEMA"], "es.gov.br").await.unwrap();
        assert_eq!(report.get("IEMA").unwrap().domain, "iema.es.gov.br");
        assert_eq!(report.get("IEMA").unwrap().abbreviation, "iema");
        assert!(report.failures.is_empty());
        assert_eq!(backend.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn stop_policy_leaves_the_rest_unattempted() {
        let backend = Arc::new(MemoryBackend::default());
        let resolver = resolver(
            vec![Box::new(FakeEngine::new(
                "a",
                &[("IEMA", "iema.es.gov.br"), ("DETRAN", "detran.es.gov.br")],
            ))],
            Arc::clone(&backend),
            ExhaustionPolicy::Stop,
        );
        let report = resolver
            .resolve(&["IEMA", "UNKNOWN", "DETRAN"], "es.gov.br")
            .await
            .unwrap();
        assert_eq!(report.mappings.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].name, "UNKNOWN");
        assert_eq!(report.unattempted, vec!["DETRAN".to_owned()]);
        assert_eq!(backend.saves(), 1);
    }

    #[tokio::test]
    async fn skip_policy_continues() {
        let backend = Arc::new(MemoryBackend::default());
        let resolver = resolver(
            vec![Box::new(FakeEngine::new(
                "a",
                &[("IEMA", "iema.es.gov.br"), ("DETRAN", "detran.es.gov.br")],
            ))],
            Arc::clone(&backend),
            ExhaustionPolicy::Skip,
        );
        let report = resolver
            .resolve(&["IEMA", "BROKEN", "DETRAN"], "es.gov.br")
            .await
            .unwrap();
        assert_eq!(report.mappings.len(), 2);
        assert!(report.unattempted.is_empty());
        assert!(matches!(
            &report.failures[0].error,
            LookupError::Exhausted(attempts)
                if matches!(attempts[0].outcome, EngineOutcome::Failed(_))
        ));
        // one checkpoint per resolved name
        assert_eq!(backend.saves(), 2);
    }

    #[tokio::test]
    async fn known_names_are_not_searched_again() {
        let backend = Arc::new(MemoryBackend::with(vec![
            OrganizationDomainMapping::from_resolved("IEMA", "iema.es.gov.br", "es.gov.br"),
            OrganizationDomainMapping::from_resolved("IEMA", "iema.mg.gov.br", "mg.gov.br"),
        ]));
        let resolver = resolver(
            vec![Box::new(FakeEngine::new("a", &[]))],
            Arc::clone(&backend),
            ExhaustionPolicy::Stop,
        );
        let report = resolver.resolve(&["IEMA", "IEMA"], "es.gov.br").await.unwrap();
        assert_eq!(
            report.mappings,
            vec![OrganizationDomainMapping::from_resolved(
                "IEMA",
                "iema.es.gov.br",
                "es.gov.br"
            )]
        );
        assert!(report.failures.is_empty());
        assert_eq!(backend.saves(), 0);
    }
}
