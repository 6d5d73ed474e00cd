// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::fmt;

use sha2::{Digest, Sha256};

pub const FINGERPRINT_LEN: usize = 64;

/// Opaque tokens naming one upstream snapshot,
/// e.g. file names, period codes or URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionIds(Vec<String>);

impl VersionIds {
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(self)
    }
}

impl From<&str> for VersionIds {
    fn from(value: &str) -> Self {
        Self(vec![value.to_owned()])
    }
}

impl From<String> for VersionIds {
    fn from(value: String) -> Self {
        Self(vec![value])
    }
}

impl From<Vec<String>> for VersionIds {
    fn from(value: Vec<String>) -> Self {
        Self(value)
    }
}

impl<S: AsRef<str>> From<&[S]> for VersionIds {
    fn from(value: &[S]) -> Self {
        Self(value.iter().map(|id| id.as_ref().to_owned()).collect())
    }
}

impl<S: AsRef<str>, const N: usize> From<[S; N]> for VersionIds {
    fn from(value: [S; N]) -> Self {
        Self(value.iter().map(|id| id.as_ref().to_owned()).collect())
    }
}

/// Cache key of a dataset: the hex encoded SHA-256
/// of the lower-cased and sorted version identifiers,
/// each prefixed by its byte length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    #[must_use]
    pub fn compute(ids: &VersionIds) -> Self {
        let mut canonical: Vec<String> = ids.0.iter().map(|id| id.to_lowercase()).collect();
        canonical.sort_unstable();
        let mut hasher = Sha256::new();
        for id in &canonical {
            hasher.update((id.len() as u64).to_le_bytes());
            hasher.update(id.as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// Accepts a previously computed fingerprint,
    /// e.g. one parsed from a cache file name.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        (raw.len() == FINGERPRINT_LEN && raw.bytes().all(|byte| byte.is_ascii_hexdigit()))
            .then(|| Self(raw.to_ascii_lowercase()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
