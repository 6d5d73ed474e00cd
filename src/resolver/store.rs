// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use async_std::{
    fs::{self, File},
    path::PathBuf,
};
use async_trait::async_trait;
use fs4::async_std::AsyncFileExt;
use thiserror::Error;
use tokio::time::Instant;

use crate::model::OrganizationDomainMapping;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Some I/O problem: '{0}'")]
    IOError(#[from] std::io::Error),
    #[error("Failed to serialize the organization store: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Timed out waiting for the lock on '{}'", .0.display())]
    LockTimeout(PathBuf),
}

/// Exclusive ownership of a store, released when dropped.
#[derive(Default)]
pub struct StoreLock {
    file: Option<(PathBuf, File)>,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Some((path, file)) = &self.file {
            tracing::trace!("Releasing lock on file '{}' ...", path.display());
            if let Err(err) = file.unlock() {
                tracing::warn!("Failed to release lock on file '{}': {err}", path.display());
            }
        }
    }
}

/// Where the organization to domain mappings are kept.
///
/// All portal domains share one store.
#[async_trait]
pub trait MappingBackend: Send + Sync {
    /// Takes exclusive ownership of the store,
    /// also against other processes, if the backend supports that.
    async fn acquire(&self, timeout: Duration) -> Result<StoreLock, StoreError> {
        Ok(StoreLock::default())
    }

    async fn load(&self) -> Result<Vec<OrganizationDomainMapping>, StoreError>;

    async fn save(&self, mappings: &[OrganizationDomainMapping]) -> Result<(), StoreError>;
}

/// Stores all mappings as one JSON array in a file,
/// guarded by an advisory lock on a sibling lock file.
pub struct JsonFileBackend {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonFileBackend {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        Self { path, lock_path }
    }

    fn temp_path(&self) -> PathBuf {
        self.path.with_extension("json.temp")
    }
}

#[async_trait]
impl MappingBackend for JsonFileBackend {
    async fn acquire(&self, timeout: Duration) -> Result<StoreLock, StoreError> {
        if !self.lock_path.exists().await {
            File::create(&self.lock_path).await?;
        }
        tracing::debug!("Preparing to lock file '{}' ...", self.lock_path.display());
        let lock_file = File::open(&self.lock_path).await?;
        let deadline = Instant::now() + timeout;
        while !lock_file.try_lock_exclusive()? {
            if Instant::now() >= deadline {
                return Err(StoreError::LockTimeout(self.lock_path.clone()));
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
        tracing::debug!("Obtained lock on file '{}'.", self.lock_path.display());
        Ok(StoreLock {
            file: Some((self.lock_path.clone(), lock_file)),
        })
    }

    async fn load(&self) -> Result<Vec<OrganizationDomainMapping>, StoreError> {
        if !self.path.exists().await {
            return Ok(Vec::new());
        }
        let raw = fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&raw).unwrap_or_else(|err| {
            tracing::error!(
                "Failed to deserialize the organization store '{}'; \
its content may be corrupt, starting from scratch: {err}",
                self.path.display()
            );
            Vec::new()
        }))
    }

    async fn save(&self, mappings: &[OrganizationDomainMapping]) -> Result<(), StoreError> {
        let content = serde_json::to_vec_pretty(mappings)?;
        let temp_file_path = self.temp_path();
        let written = async {
            fs::write(&temp_file_path, content).await?;
            File::open(&temp_file_path).await?.sync_all().await?;
            fs::rename(&temp_file_path, &self.path).await
        }
        .await;
        if let Err(err) = written {
            if let Err(rm_err) = fs::remove_file(&temp_file_path).await {
                tracing::debug!(
                    "Failed to remove temporary file '{}': {rm_err}",
                    temp_file_path.display()
                );
            }
            return Err(err.into());
        }
        Ok(())
    }
}

/// Keeps the mappings in memory only.
#[derive(Default)]
pub struct MemoryBackend {
    mappings: Mutex<Vec<OrganizationDomainMapping>>,
    saves: Mutex<usize>,
}

impl MemoryBackend {
    #[must_use]
    pub fn with(mappings: Vec<OrganizationDomainMapping>) -> Self {
        Self {
            mappings: Mutex::new(mappings),
            saves: Mutex::new(0),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<OrganizationDomainMapping> {
        self.mappings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many times the store was written.
    #[must_use]
    pub fn saves(&self) -> usize {
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MappingBackend for MemoryBackend {
    async fn load(&self) -> Result<Vec<OrganizationDomainMapping>, StoreError> {
        Ok(self.snapshot())
    }

    async fn save(&self, mappings: &[OrganizationDomainMapping]) -> Result<(), StoreError> {
        mappings.clone_into(
            &mut self
                .mappings
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> OrganizationDomainMapping {
        OrganizationDomainMapping::from_resolved("IEMA", "iema.es.gov.br", "es.gov.br")
    }

    #[tokio::test]
    async fn json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFileBackend::new(dir.path().join("organizations.json"));
        assert!(backend.load().await.unwrap().is_empty());
        backend.save(&[mapping()]).await.unwrap();
        assert_eq!(backend.load().await.unwrap(), vec![mapping()]);
    }

    #[tokio::test]
    async fn failed_save_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("organizations.json");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("occupied"), "").unwrap();
        let backend = JsonFileBackend::new(path);
        assert!(matches!(
            backend.save(&[mapping()]).await,
            Err(StoreError::IOError(_))
        ));
        assert!(!dir.path().join("organizations.json.temp").exists());
    }

    #[test]
    fn lock_timeout_names_the_lock_file() {
        let err = StoreError::LockTimeout(PathBuf::from("cache/organizations.lock"));
        assert_eq!(
            err.to_string(),
            "Timed out waiting for the lock on 'cache/organizations.lock'"
        );
    }

    #[tokio::test]
    async fn corrupt_file_counts_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("organizations.json");
        std::fs::write(&path, "[{ not json").unwrap();
        let backend = JsonFileBackend::new(path);
        assert!(backend.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("organizations.json");
        let first = JsonFileBackend::new(path.clone());
        let second = JsonFileBackend::new(path);
        let guard = first.acquire(Duration::from_secs(1)).await.unwrap();
        assert!(matches!(
            second.acquire(Duration::from_millis(120)).await,
            Err(StoreError::LockTimeout(_))
        ));
        drop(guard);
        assert!(second.acquire(Duration::from_secs(1)).await.is_ok());
    }
}
