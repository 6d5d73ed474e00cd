// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use typed_builder::TypedBuilder;

use crate::{
    adapters::{self, Registry, Shared},
    cache::CacheManager,
    downloader::{self, RetrySettings},
    freshness::DEFAULT_MAX_AGE_DAYS,
    resolver::{store::JsonFileBackend, DomainResolver, ResolverSettings},
    search, tools,
};

pub const ENV_PREFIX: &str = "MONETOMETRO";
pub const CONFIG_FILE: &str = "config.yml";
pub const STORE_FILE_NAME: &str = "organizations.json";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to load the basic/low-level configuration data: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to create an adapter from the basic/low-level configuration data: {0}")]
    AdapterCreation(#[from] adapters::CreationError),
    #[error("Failed to create the downloader: {0}")]
    Downloader(#[from] downloader::CreationError),
    #[error("Adapter section '{0}' requires a string property 'adapter_type'")]
    MissingAdapterType(String),
    #[error("Failed to prepare the cache directory: {0}")]
    IOError(#[from] std::io::Error),
}

fn default_user_agent() -> String {
    tools::USER_AGENT_DEFAULT.to_owned()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}

const fn default_max_age_days() -> u64 {
    DEFAULT_MAX_AGE_DAYS
}

fn default_country_suffix() -> String {
    ".br".to_owned()
}

const fn default_search_interval() -> u64 {
    2000
}

const fn default_cache_lock_timeout() -> u64 {
    5 * 60 * 1000
}

#[derive(Serialize, Deserialize, Debug)]
pub struct IntermediateSettings {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Cached datasets older than this many whole days are stale.
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u64,
    /// Only search results within this top-level domain count.
    #[serde(default = "default_country_suffix")]
    pub country_suffix: String,
    /// Minimal time between two search engine queries in milliseconds (ms)
    #[serde(default = "default_search_interval")]
    pub search_interval: u64,
    /// How long to wait for another ingest of the same domain in milliseconds (ms)
    #[serde(default = "default_cache_lock_timeout")]
    pub cache_lock_timeout: u64,
    #[serde(default)]
    pub download: RetrySettings,
    #[serde(default)]
    pub resolver: ResolverSettings,
    #[serde(default)]
    pub adapters: HashMap<String, HashMap<String, Value>>,
}

#[derive(TypedBuilder)]
pub struct Settings {
    pub cache_dir: PathBuf,
    pub max_age_days: u64,
    pub cache_lock_timeout: Duration,
    pub resolver: Arc<DomainResolver>,
    pub registry: Registry,
}

impl Settings {
    /// Opens (and if necessary creates) the cache directory.
    pub async fn open_cache(&self) -> Result<Arc<CacheManager>, SettingsError> {
        Ok(Arc::new(
            CacheManager::new(self.cache_dir.clone(), self.cache_lock_timeout).await?,
        ))
    }
}

impl IntermediateSettings {
    pub fn finalize(self) -> Result<Settings, SettingsError> {
        let downloader = downloader::create_downloader(&self.download, &self.user_agent)?;
        let rate_limiter =
            search::create_rate_limiter(Duration::from_millis(self.search_interval));
        let engines = search::default_chain(&downloader, &rate_limiter, &self.country_suffix);
        let backend = Arc::new(JsonFileBackend::new(self.cache_dir.join(STORE_FILE_NAME)));
        let resolver = Arc::new(DomainResolver::new(engines, backend, self.resolver));
        let shared = Arc::new(Shared {
            downloader,
            resolver: Arc::clone(&resolver),
        });

        let factories = adapters::assemble_factories();
        let mut registry = Registry::default();
        let mut adapter_ids: Vec<&String> = self.adapters.keys().collect();
        adapter_ids.sort();
        for adapter_id in adapter_ids {
            let properties = &self.adapters[adapter_id];
            let adapter_type = properties
                .get("adapter_type")
                .and_then(Value::as_str)
                .ok_or_else(|| SettingsError::MissingAdapterType(adapter_id.clone()))?;
            tracing::debug!("Adapter '{adapter_id}' has type: '{adapter_type}' - parsing ...");
            let factory = factories.get(adapter_type).ok_or_else(|| {
                adapters::CreationError::UnknownAdapterType(adapter_type.to_owned())
            })?;
            let adapter = factory.create(
                Arc::clone(&shared),
                properties.get("config").cloned().unwrap_or(Value::Null),
            )?;
            registry.register(adapter);
        }

        Ok(Settings::builder()
            .cache_dir(self.cache_dir)
            .max_age_days(self.max_age_days)
            .cache_lock_timeout(Duration::from_millis(self.cache_lock_timeout))
            .resolver(resolver)
            .registry(registry)
            .build())
    }
}

fn deserialize(settings_loader: &Config) -> Result<IntermediateSettings, SettingsError> {
    let intermediate_settings = settings_loader
        .clone()
        .try_deserialize::<IntermediateSettings>()?;
    tracing::debug!("{intermediate_settings:#?}");
    Ok(intermediate_settings)
}

/// # Errors
///
/// - the config loader fails to build
/// - settings failed to load and deserialize into intermediate settings
/// - the intermediate settings fail to finalize into the final settings
pub fn load() -> Result<Settings, SettingsError> {
    let settings_loader = Config::builder()
        .add_source(config::File::with_name(CONFIG_FILE).required(false))
        // E.g. `MONETOMETRO_RESOLVER__EXHAUSTION=skip monetometro ...`
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    deserialize(&settings_loader)?.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ExhaustionPolicy;
    use config::FileFormat;

    fn parse(yaml: &str) -> IntermediateSettings {
        let loader = Config::builder()
            .add_source(config::File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap();
        deserialize(&loader).unwrap()
    }

    #[test]
    fn defaults() {
        let settings = parse("{}");
        assert_eq!(settings.cache_dir, PathBuf::from("cache"));
        assert_eq!(settings.max_age_days, 31);
        assert_eq!(settings.country_suffix, ".br");
        assert_eq!(settings.download, RetrySettings::default());
        assert_eq!(settings.resolver.exhaustion, ExhaustionPolicy::Stop);
        assert!(settings.adapters.is_empty());
    }

    #[test]
    fn adapters_are_created_from_config() {
        let settings = parse(
            r#"
resolver:
  exhaustion: skip
adapters:
  es:
    adapter_type: csv-portal
    config:
      domain: es.gov.br
      federative_unit: Espirito Santo
      portal_url: https://transparencia.es.gov.br/servidores
      link_pattern: 'remuneracao_(?P<year>\d{4})(?P<month>\d{2})\.csv'
      download_url: https://transparencia.es.gov.br/files/{id}
      columns:
        organization: Orgao
        person_name: Nome
        amount: Valor
"#,
        );
        assert_eq!(settings.resolver.exhaustion, ExhaustionPolicy::Skip);
        let settings = settings.finalize().unwrap();
        let adapter = settings.registry.find("iema.es.gov.br").unwrap();
        assert_eq!(adapter.info().federative_unit, "Espirito Santo");
    }

    #[test]
    fn unknown_adapter_types_fail() {
        let settings = parse(
            r"
adapters:
  x:
    adapter_type: ftp
",
        );
        assert!(matches!(
            settings.finalize(),
            Err(SettingsError::AdapterCreation(
                adapters::CreationError::UnknownAdapterType(_)
            ))
        ));
    }
}
