// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! On-disc store of normalized datasets, one live dataset per portal domain.
//!
//! A dataset is stored as `<domain>-<fingerprint>.csv`,
//! next to its manifest `<domain>.digest`.
//! New files are always written to a temporary file first,
//! and then renamed into place,
//! so readers never see a partially written dataset.
//! Superseded datasets of the same domain are purged only after that rename.
//! If the process dies in between, two datasets remain;
//! [`CacheManager::locate_live`] then picks the most recently modified one,
//! and the next cache hit purges the other.

pub mod fingerprint;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex as SyncMutex, PoisonError},
    time::{Duration, SystemTime},
};

use async_std::{
    fs, io,
    path::{Path, PathBuf},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub use fingerprint::{Fingerprint, VersionIds};

use crate::model::{CompensationRecord, DigestSummary, Provenance, Table, ValidationError};

pub const DATASET_EXT: &str = "csv";
pub const DIGEST_EXT: &str = "digest";
const TEMP_EXT: &str = "temp";

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Dataset failed validation: {0}")]
    Validation(#[from] ValidationError),
    #[error("Some I/O problem: '{0}'")]
    IOError(#[from] std::io::Error),
    #[error("Failed to read or write a cached dataset: {0}")]
    Csv(#[from] csv_async::Error),
    #[error("Failed to (de-)serialize the digest: {0}")]
    Digest(#[from] serde_json::Error),
    #[error("Not usable as a domain in a cache file name: '{0}'")]
    InvalidDomain(String),
    #[error("Timed out waiting for the ingest lock of domain '{0}'")]
    LockTimeout(String),
}

/// The dataset currently considered authoritative for a domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveDataset {
    pub domain: String,
    pub fingerprint: Fingerprint,
    pub path: PathBuf,
    pub modified: SystemTime,
}

/// One row of a dataset file on disc.
#[derive(Serialize, Deserialize, Debug)]
struct CachedRow {
    #[serde(rename = "_id")]
    id: usize,
    organization: String,
    person_name: String,
    monthly_average_compensation: f64,
    abbreviation: String,
    domain: String,
}

impl From<CachedRow> for CompensationRecord {
    fn from(row: CachedRow) -> Self {
        Self {
            organization: row.organization,
            person_name: row.person_name,
            monthly_average_compensation: row.monthly_average_compensation,
            abbreviation: row.abbreviation,
            domain: row.domain,
        }
    }
}

async fn ensure_dir_exists<P: AsRef<Path>>(dir: P) -> io::Result<()> {
    if !dir.as_ref().exists().await {
        fs::create_dir_all(dir.as_ref()).await?;
    }
    Ok(())
}

fn temp_path(file: &Path) -> PathBuf {
    let mut name = file.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{TEMP_EXT}"));
    file.with_file_name(name)
}

async fn sync_file(file: &Path) -> io::Result<()> {
    fs::File::open(file).await?.sync_all().await
}

/// Removes a file left behind by an aborted write.
async fn discard(file: &Path) {
    if let Err(err) = fs::remove_file(file).await {
        tracing::debug!("Failed to remove '{}': {err}", file.display());
    }
}

/// Writes the records to a durable temporary file next to `path`,
/// returning the temporary file.
async fn stage_dataset(
    path: &Path,
    records: &[CompensationRecord],
) -> Result<PathBuf, CacheError> {
    let temp_file_path = temp_path(path);
    let written: Result<(), CacheError> = async {
        let mut writer =
            csv_async::AsyncSerializer::from_writer(fs::File::create(&temp_file_path).await?);
        for (id, record) in records.iter().enumerate() {
            writer
                .serialize(CachedRow {
                    id: id + 1,
                    organization: record.organization.clone(),
                    person_name: record.person_name.clone(),
                    monthly_average_compensation: record.monthly_average_compensation,
                    abbreviation: record.abbreviation.clone(),
                    domain: record.domain.clone(),
                })
                .await?;
        }
        writer.flush().await?;
        drop(writer);
        sync_file(&temp_file_path).await?;
        Ok(())
    }
    .await;
    match written {
        Ok(()) => Ok(temp_file_path),
        Err(err) => {
            discard(&temp_file_path).await;
            Err(err)
        }
    }
}

/// Writes the digest to a durable temporary file next to `path`,
/// returning the temporary file.
async fn stage_digest(path: &Path, digest: &DigestSummary) -> Result<PathBuf, CacheError> {
    let content = serde_json::to_vec_pretty(digest)?;
    let temp_file_path = temp_path(path);
    let written = async {
        fs::write(&temp_file_path, content).await?;
        sync_file(&temp_file_path).await
    }
    .await;
    if let Err(err) = written {
        discard(&temp_file_path).await;
        return Err(err.into());
    }
    Ok(temp_file_path)
}

/// Splits a dataset file name into its domain and fingerprint parts.
///
/// Domains may contain `-`, fingerprints never do,
/// so we split at the last one.
fn parse_dataset_file_name(file_name: &str) -> Option<(&str, Fingerprint)> {
    let stem = file_name.strip_suffix(&format!(".{DATASET_EXT}"))?;
    let (domain, fingerprint) = stem.rsplit_once('-')?;
    Some((domain, Fingerprint::parse(fingerprint)?))
}

fn check_domain(domain: &str) -> Result<(), CacheError> {
    if domain.is_empty()
        || domain.starts_with('.')
        || domain.contains(['/', '\\'])
        || domain.chars().any(char::is_whitespace)
    {
        return Err(CacheError::InvalidDomain(domain.to_owned()));
    }
    Ok(())
}

pub struct CacheManager {
    dir: PathBuf,
    lock_timeout: Duration,
    ingest_locks: SyncMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CacheManager {
    pub async fn new<P: Into<PathBuf>>(dir: P, lock_timeout: Duration) -> io::Result<Self> {
        let dir = dir.into();
        ensure_dir_exists(&dir).await?;
        Ok(Self {
            dir,
            lock_timeout,
            ingest_locks: SyncMutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn dataset_path(&self, domain: &str, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{domain}-{fingerprint}.{DATASET_EXT}"))
    }

    fn digest_path(&self, domain: &str) -> PathBuf {
        self.dir.join(format!("{domain}.{DIGEST_EXT}"))
    }

    /// Serializes ingestion (check, materialize, commit) per domain
    /// within this process.
    pub async fn lock_domain(&self, domain: &str) -> Result<OwnedMutexGuard<()>, CacheError> {
        let lock = {
            let mut locks = self
                .ingest_locks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(domain.to_owned()).or_default())
        };
        tokio::time::timeout(self.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_elapsed| CacheError::LockTimeout(domain.to_owned()))
    }

    /// Lists all (complete) dataset files of the given domain.
    async fn datasets_of(&self, domain: &str) -> Result<Vec<LiveDataset>, CacheError> {
        check_domain(domain)?;
        let mut datasets = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next().await {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some((file_domain, fingerprint)) = parse_dataset_file_name(file_name) else {
                continue;
            };
            if !file_domain.eq_ignore_ascii_case(domain) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            datasets.push(LiveDataset {
                domain: domain.to_owned(),
                fingerprint,
                path: entry.path(),
                modified: metadata.modified()?,
            });
        }
        Ok(datasets)
    }

    /// The most recently modified dataset of the domain, if any.
    pub async fn locate_live(&self, domain: &str) -> Result<Option<LiveDataset>, CacheError> {
        Ok(self
            .datasets_of(domain)
            .await?
            .into_iter()
            .max_by_key(|dataset| dataset.modified))
    }

    /// The live dataset of the domain, but only if it was built
    /// from the snapshot with the given fingerprint.
    pub async fn lookup(
        &self,
        domain: &str,
        fingerprint: &Fingerprint,
    ) -> Result<Option<LiveDataset>, CacheError> {
        Ok(self
            .locate_live(domain)
            .await?
            .filter(|live| &live.fingerprint == fingerprint))
    }

    /// Validates and stores a freshly materialized table as the live dataset of the domain,
    /// writes its digest, and purges all superseded datasets of the domain.
    ///
    /// Both files are fully written to temporary files before either is renamed into place.
    /// If validation or any write fails, the previous dataset and digest stay live.
    pub async fn commit(
        &self,
        domain: &str,
        fingerprint: &Fingerprint,
        table: &Table,
        provenance: &Provenance,
    ) -> Result<LiveDataset, CacheError> {
        check_domain(domain)?;
        let records = table.to_records()?;
        tracing::debug!(
            "[{domain}] Committing {} records under fingerprint {fingerprint} ...",
            records.len()
        );

        let path = self.dataset_path(domain, fingerprint);
        let digest_path = self.digest_path(domain);
        let mut digest = DigestSummary::summarize(provenance, domain, &records);
        digest.unresolved.clone_from(&table.unresolved);

        let dataset_temp = stage_dataset(&path, &records).await?;
        let digest_temp = match stage_digest(&digest_path, &digest).await {
            Ok(temp) => temp,
            Err(err) => {
                discard(&dataset_temp).await;
                return Err(err);
            }
        };

        let replaces_same_snapshot = path.exists().await;
        if let Err(err) = fs::rename(&dataset_temp, &path).await {
            discard(&dataset_temp).await;
            discard(&digest_temp).await;
            return Err(err.into());
        }
        if let Err(err) = fs::rename(&digest_temp, &digest_path).await {
            discard(&digest_temp).await;
            if !replaces_same_snapshot {
                // the previous dataset becomes live again
                discard(&path).await;
            }
            return Err(err.into());
        }

        if let Err(err) = self.purge(domain, fingerprint).await {
            tracing::warn!("[{domain}] Failed to purge superseded datasets: {err}");
        }

        let modified = fs::metadata(&path).await?.modified()?;
        tracing::info!(
            "[{domain}] Committed {} records as '{}'.",
            records.len(),
            path.display()
        );
        if !table.unresolved.is_empty() {
            tracing::warn!(
                "[{domain}] Dataset is incomplete, {} organizations are unresolved.",
                table.unresolved.len()
            );
        }
        Ok(LiveDataset {
            domain: domain.to_owned(),
            fingerprint: fingerprint.clone(),
            path,
            modified,
        })
    }

    /// Deletes every dataset of the domain not built from `keep`.
    pub async fn purge(&self, domain: &str, keep: &Fingerprint) -> Result<(), CacheError> {
        for stale in self.datasets_of(domain).await? {
            if &stale.fingerprint != keep {
                tracing::debug!("[{domain}] Removing stale dataset '{}' ...", stale.path.display());
                fs::remove_file(&stale.path).await?;
            }
        }
        Ok(())
    }

    /// Reads all records of a dataset.
    pub async fn load(&self, dataset: &LiveDataset) -> Result<Vec<CompensationRecord>, CacheError> {
        let mut reader =
            csv_async::AsyncDeserializer::from_reader(fs::File::open(&dataset.path).await?);
        let mut rows = reader.deserialize::<CachedRow>();
        let mut records = Vec::new();
        while let Some(row) = rows.next().await {
            records.push(row?.into());
        }
        Ok(records)
    }

    /// Reads the manifest of the last commit of the domain, if any.
    pub async fn read_digest(&self, domain: &str) -> Result<Option<DigestSummary>, CacheError> {
        check_domain(domain)?;
        let path = self.digest_path(domain);
        if !path.exists().await {
            return Ok(None);
        }
        let raw = fs::read(&path).await?;
        Ok(Some(serde_json::from_slice(&raw)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::REQUIRED_COLUMNS;

    fn provenance() -> Provenance {
        Provenance {
            federative_unit: "Espirito Santo".to_owned(),
            portal_url: "https://dados.es.gov.br".to_owned(),
        }
    }

    fn table(rows: &[[&str; 5]]) -> Table {
        let mut table = Table::new(REQUIRED_COLUMNS);
        table.rows = rows
            .iter()
            .map(|row| row.iter().map(ToString::to_string).collect())
            .collect();
        table
    }

    async fn manager(dir: &tempfile::TempDir) -> CacheManager {
        CacheManager::new(dir.path().to_path_buf(), Duration::from_secs(5))
            .await
            .unwrap()
    }

    #[test]
    fn parses_dataset_file_names() {
        let fingerprint = VersionIds::from("x").fingerprint();
        let name = format!("al.es.gov.br-{fingerprint}.csv");
        assert_eq!(
            parse_dataset_file_name(&name),
            Some(("al.es.gov.br", fingerprint.clone()))
        );
        let name = format!("my-portal.gov.br-{fingerprint}.csv");
        assert_eq!(
            parse_dataset_file_name(&name),
            Some(("my-portal.gov.br", fingerprint.clone()))
        );
        assert_eq!(parse_dataset_file_name(&format!("{name}.temp")), None);
        assert_eq!(parse_dataset_file_name("es.gov.br.digest"), None);
    }

    #[tokio::test]
    async fn commit_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = manager(&dir).await;
        let fingerprint = VersionIds::from("0924").fingerprint();
        let table = table(&[
            ["IEMA", "MARIA SILVA", "1000.5", "iema", "iema.es.gov.br"],
            ["DETRAN", "JOAO SOUZA", "2000", "detran", "detran.es.gov.br"],
        ]);
        let live = cache
            .commit("es.gov.br", &fingerprint, &table, &provenance())
            .await
            .unwrap();
        assert_eq!(live.fingerprint, fingerprint);

        let records = cache.load(&live).await.unwrap();
        assert_eq!(records, table.to_records().unwrap());

        let found = cache.lookup("es.gov.br", &fingerprint).await.unwrap();
        assert_eq!(found.map(|live| live.path), Some(live.path));

        let digest = cache.read_digest("es.gov.br").await.unwrap().unwrap();
        assert_eq!(digest.subdomains.len(), 2);
        assert_eq!(digest.parent_domain, "es.gov.br");
    }

    #[tokio::test]
    async fn other_domains_are_not_live_for_us() {
        let dir = tempfile::tempdir().unwrap();
        let cache = manager(&dir).await;
        let fingerprint = VersionIds::from("0924").fingerprint();
        let table = table(&[["ALES", "ANA", "1", "al", "al.es.gov.br"]]);
        cache
            .commit("al.es.gov.br", &fingerprint, &table, &provenance())
            .await
            .unwrap();
        assert_eq!(cache.locate_live("es.gov.br").await.unwrap(), None);
        assert!(cache.locate_live("al.es.gov.br").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_validation_keeps_previous_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let cache = manager(&dir).await;
        let old = VersionIds::from("0824").fingerprint();
        let good = table(&[["IEMA", "MARIA SILVA", "1000", "iema", "iema.es.gov.br"]]);
        cache
            .commit("es.gov.br", &old, &good, &provenance())
            .await
            .unwrap();

        let new = VersionIds::from("0924").fingerprint();
        let bad = Table::new(["organization", "person_name"]);
        let res = cache.commit("es.gov.br", &new, &bad, &provenance()).await;
        assert!(matches!(res, Err(CacheError::Validation(_))));

        let live = cache.locate_live("es.gov.br").await.unwrap().unwrap();
        assert_eq!(live.fingerprint, old);
    }

    fn file_names(dir: &tempfile::TempDir) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.unwrap().file_name().into_string().ok())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn failed_digest_write_keeps_previous_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let cache = manager(&dir).await;
        let old = VersionIds::from("0824").fingerprint();
        let good = table(&[["IEMA", "MARIA SILVA", "1000", "iema", "iema.es.gov.br"]]);
        cache
            .commit("es.gov.br", &old, &good, &provenance())
            .await
            .unwrap();

        // a directory in place of the digest makes renaming onto it fail
        let digest_path = dir.path().join("es.gov.br.digest");
        std::fs::remove_file(&digest_path).unwrap();
        std::fs::create_dir(&digest_path).unwrap();
        std::fs::write(digest_path.join("occupied"), "").unwrap();

        let new = VersionIds::from("0924").fingerprint();
        let res = cache.commit("es.gov.br", &new, &good, &provenance()).await;
        assert!(matches!(res, Err(CacheError::IOError(_))));

        let live = cache.locate_live("es.gov.br").await.unwrap().unwrap();
        assert_eq!(live.fingerprint, old);
        assert_eq!(
            file_names(&dir),
            vec![format!("es.gov.br-{old}.csv"), "es.gov.br.digest".to_owned()]
        );
    }

    #[tokio::test]
    async fn unresolved_organizations_are_listed_in_the_digest() {
        let dir = tempfile::tempdir().unwrap();
        let cache = manager(&dir).await;
        let fingerprint = VersionIds::from("0924").fingerprint();
        let mut partial = table(&[["IEMA", "MARIA SILVA", "1000", "iema", "iema.es.gov.br"]]);
        partial.unresolved = vec!["SECRETARIA DE CULTURA".to_owned()];
        cache
            .commit("es.gov.br", &fingerprint, &partial, &provenance())
            .await
            .unwrap();
        let digest = cache.read_digest("es.gov.br").await.unwrap().unwrap();
        assert_eq!(digest.unresolved, vec!["SECRETARIA DE CULTURA".to_owned()]);

        // committing the same snapshot again, now complete, replaces it in place
        let complete = table(&[["IEMA", "MARIA SILVA", "1000", "iema", "iema.es.gov.br"]]);
        cache
            .commit("es.gov.br", &fingerprint, &complete, &provenance())
            .await
            .unwrap();
        let digest = cache.read_digest("es.gov.br").await.unwrap().unwrap();
        assert!(digest.unresolved.is_empty());
        assert_eq!(
            file_names(&dir),
            vec![format!("es.gov.br-{fingerprint}.csv"), "es.gov.br.digest".to_owned()]
        );
    }

    #[tokio::test]
    async fn rejects_domains_unfit_for_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let cache = manager(&dir).await;
        assert!(matches!(
            cache.locate_live("../etc").await,
            Err(CacheError::InvalidDomain(_))
        ));
    }
}
