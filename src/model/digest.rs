// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::CompensationRecord;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SubdomainCount {
    pub domain: String,
    pub record_count: usize,
}

/// Manifest of a committed dataset,
/// stored next to it as `<domain>.digest`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DigestSummary {
    pub federative_unit: String,
    pub portal_url: String,
    pub parent_domain: String,
    pub subdomains: Vec<SubdomainCount>,
    /// Organizations of the snapshot left out of the dataset,
    /// as their domain could not be resolved.
    /// A dataset listing any is incomplete.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<String>,
    /// Whether the dataset is fresh;
    /// only filled in when reporting, never stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refreshed: Option<bool>,
}

/// Where a dataset came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub federative_unit: String,
    pub portal_url: String,
}

impl DigestSummary {
    /// Summarizes the given records, counting them per organization domain.
    #[must_use]
    pub fn summarize(
        provenance: &Provenance,
        parent_domain: &str,
        records: &[CompensationRecord],
    ) -> Self {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for record in records {
            *counts.entry(record.domain.as_str()).or_default() += 1;
        }
        Self {
            federative_unit: provenance.federative_unit.clone(),
            portal_url: provenance.portal_url.clone(),
            parent_domain: parent_domain.to_owned(),
            subdomains: counts
                .into_iter()
                .map(|(domain, record_count)| SubdomainCount {
                    domain: domain.to_owned(),
                    record_count,
                })
                .collect(),
            unresolved: Vec::new(),
            refreshed: None,
        }
    }
}
