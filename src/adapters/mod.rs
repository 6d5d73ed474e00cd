// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde_json::Value;
use thiserror::Error;

use crate::{
    model::{Provenance, Table},
    resolver::{DomainResolver, ResolveError},
    tools,
};

pub mod csv_portal;

/// Thrown when creating a new [`SourceAdapter`] failed.
#[derive(Error, Debug)]
pub enum CreationError {
    #[error("Unknown adapter type: '{0}'")]
    UnknownAdapterType(String),
    #[error("Invalid config for adapter type '{0}': {1}")]
    InvalidConfig(String, String),
}

/// Thrown when an adapter failed to find or fetch the current snapshot of its portal.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Network/Internet download failed: '{0}'")]
    DownloadError(#[from] reqwest::Error),
    #[error("Network/Internet download failed: '{0}'")]
    DownloadMiddlewareError(#[from] reqwest_middleware::Error),
    #[error("Portal answered with unexpected HTTP status {1} for '{0}'")]
    UnexpectedStatus(String, reqwest::StatusCode),
    #[error("Failed to read a downloaded table: {0}")]
    Csv(#[from] csv_async::Error),
    #[error("Failed to parse portal content: {0}")]
    Parse(String),
    #[error("Portal lists no downloadable snapshot: '{0}'")]
    NoSnapshot(String),
    #[error("Failed to resolve organization domains: {0}")]
    Resolve(#[from] ResolveError),
}

/// What a concrete adapter tells about the portal it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    /// Parent domain of all organizations on this portal, e.g. `es.gov.br`.
    pub domain: String,
    pub federative_unit: String,
    pub portal_url: String,
}

impl AdapterInfo {
    #[must_use]
    pub fn provenance(&self) -> Provenance {
        Provenance {
            federative_unit: self.federative_unit.clone(),
            portal_url: self.portal_url.clone(),
        }
    }
}

/// Knows where and how to fetch the compensation data of one portal.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn info(&self) -> &AdapterInfo;

    /// Identifiers of the newest upstream snapshot,
    /// e.g. the ids of the files of the most recent month.
    /// Cheap compared to [`Self::materialize`].
    async fn latest_version_ids(&self) -> Result<Vec<String>, AdapterError>;

    /// Downloads and normalizes the snapshot identified by `version_ids`
    /// into a table with the columns of [`crate::model::REQUIRED_COLUMNS`].
    async fn materialize(&self, version_ids: &[String]) -> Result<Table, AdapterError>;
}

impl fmt::Display for dyn SourceAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-adapter", self.info().domain)
    }
}

/// Contains descriptive data about a type of adapter.
pub struct TypeInfo {
    /// Machine-readable name/id of this type of adapter.
    /// It should be in "kebab-case".
    pub name: &'static str,

    /// Human-readable description of this type of adapter.
    pub description: &'static str,
}

/// What all adapters of a run share.
pub struct Shared {
    pub downloader: Arc<ClientWithMiddleware>,
    pub resolver: Arc<DomainResolver>,
}

/// Creates instances of adapters of a specific type.
pub trait Factory {
    /// Info about the type of adapters produced by this factory.
    fn info(&self) -> &'static TypeInfo;

    /// Creates a new instance of this type of adapter,
    /// following the supplied configuration.
    fn create(
        &self,
        shared: Arc<Shared>,
        config_adapter: Value,
    ) -> Result<Arc<dyn SourceAdapter>, CreationError>;
}

#[must_use]
pub fn assemble_factories() -> HashMap<String, Box<dyn Factory>> {
    let factories: Vec<Box<dyn Factory>> = vec![Box::new(csv_portal::AdapterFactory)];
    factories
        .into_iter()
        .map(|f| (f.info().name.to_string(), f))
        .collect()
}

/// All configured adapters, looked up by e-mail domain.
#[derive(Default, Clone)]
pub struct Registry {
    adapters: Vec<Arc<dyn SourceAdapter>>,
}

impl Registry {
    #[must_use]
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>) -> Self {
        Self { adapters }
    }

    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.push(adapter);
    }

    #[must_use]
    pub fn adapters(&self) -> &[Arc<dyn SourceAdapter>] {
        &self.adapters
    }

    /// The adapter responsible for the given e-mail domain:
    /// the one with the longest domain that the e-mail domain lies within.
    #[must_use]
    pub fn find(&self, email_domain: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters
            .iter()
            .filter(|adapter| tools::is_domain_suffix(email_domain, &adapter.info().domain))
            .max_by_key(|adapter| adapter.info().domain.len())
            .map(Arc::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy(AdapterInfo);

    #[async_trait]
    impl SourceAdapter for Dummy {
        fn info(&self) -> &AdapterInfo {
            &self.0
        }

        async fn latest_version_ids(&self) -> Result<Vec<String>, AdapterError> {
            Ok(Vec::new())
        }

        async fn materialize(&self, _version_ids: &[String]) -> Result<Table, AdapterError> {
            Ok(Table::default())
        }
    }

    fn dummy(domain: &str) -> Arc<dyn SourceAdapter> {
        Arc::new(Dummy(AdapterInfo {
            domain: domain.to_owned(),
            federative_unit: "Espirito Santo".to_owned(),
            portal_url: format!("https://transparencia.{domain}"),
        }))
    }

    #[test]
    fn longest_suffix_wins() {
        let registry = Registry::new(vec![dummy("es.gov.br"), dummy("al.es.gov.br"), dummy("mg.gov.br")]);
        let found = |domain: &str| registry.find(domain).map(|a| a.info().domain.clone());
        assert_eq!(found("iema.es.gov.br"), Some("es.gov.br".to_owned()));
        assert_eq!(found("al.es.gov.br"), Some("al.es.gov.br".to_owned()));
        assert_eq!(found("x.al.es.gov.br"), Some("al.es.gov.br".to_owned()));
        assert_eq!(found("tces.gov.br"), None);
        assert_eq!(found("gmail.com"), None);
    }

    #[test]
    fn factories_are_named() {
        assert!(assemble_factories().contains_key("csv-portal"));
    }
}
