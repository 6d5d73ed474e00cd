// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::time::{Duration, SystemTime};

use crate::cache::{CacheError, CacheManager};

pub const DEFAULT_MAX_AGE_DAYS: u64 = 31;
const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// How old the live dataset of a domain is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh { age_days: u64 },
    Stale { age_days: u64 },
    Missing,
}

impl Freshness {
    /// Classifies a dataset last modified at `modified`.
    /// Age is counted in whole elapsed days,
    /// and a dataset exactly `max_age_days` old is still fresh.
    /// Modification times in the future count as age zero.
    #[must_use]
    pub fn classify(modified: SystemTime, now: SystemTime, max_age_days: u64) -> Self {
        let age_days = now
            .duration_since(modified)
            .unwrap_or(Duration::ZERO)
            .as_secs()
            / SECONDS_PER_DAY;
        if age_days <= max_age_days {
            Self::Fresh { age_days }
        } else {
            Self::Stale { age_days }
        }
    }

    #[must_use]
    pub const fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh { .. })
    }
}

/// Checks the age of the cached datasets. Never changes anything on disc.
pub struct FreshnessChecker<'a> {
    cache: &'a CacheManager,
    max_age_days: u64,
}

impl<'a> FreshnessChecker<'a> {
    #[must_use]
    pub const fn new(cache: &'a CacheManager, max_age_days: u64) -> Self {
        Self {
            cache,
            max_age_days,
        }
    }

    pub async fn inspect(&self, domain: &str) -> Result<Freshness, CacheError> {
        self.inspect_at(domain, SystemTime::now()).await
    }

    pub async fn inspect_at(&self, domain: &str, now: SystemTime) -> Result<Freshness, CacheError> {
        let freshness = match self.cache.locate_live(domain).await? {
            Some(live) => Freshness::classify(live.modified, now, self.max_age_days),
            None => Freshness::Missing,
        };
        tracing::debug!("[{domain}] Cache freshness: {freshness:?}");
        Ok(freshness)
    }
}
