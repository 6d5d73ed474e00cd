// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use serde::{Deserialize, Serialize};

/// One person's normalized, average monthly pay at one organization.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CompensationRecord {
    /// Free-text name of the organization, as published by the portal.
    pub organization: String,
    pub person_name: String,
    /// Average monthly compensation,
    /// including the proportional shares of 13th salary and vacation bonus.
    pub monthly_average_compensation: f64,
    /// Short name of the organization, usually the first label of its domain.
    pub abbreviation: String,
    /// Internet domain of the organization.
    pub domain: String,
}

impl CompensationRecord {
    /// The domain people of this organization are most likely to have e-mail addresses at.
    ///
    /// ```
    /// # use monetometro::model::CompensationRecord;
    /// let mut record = CompensationRecord {
    ///     organization: "Instituto Estadual de Meio Ambiente".to_owned(),
    ///     person_name: "Maria Silva".to_owned(),
    ///     monthly_average_compensation: 1000.0,
    ///     abbreviation: "iema".to_owned(),
    ///     domain: "es.gov.br".to_owned(),
    /// };
    /// assert_eq!(record.organization_domain(), "iema.es.gov.br");
    /// record.domain = "iema.es.gov.br".to_owned();
    /// assert_eq!(record.organization_domain(), "iema.es.gov.br");
    /// ```
    #[must_use]
    pub fn organization_domain(&self) -> String {
        if self.abbreviation.is_empty() || self.domain.contains(&self.abbreviation) {
            self.domain.clone()
        } else {
            format!("{}.{}", self.abbreviation, self.domain)
        }
    }
}

/// A record that matched a query, together with the e-mail address it was found for.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CompensationMatch {
    #[serde(flatten)]
    pub record: CompensationRecord,
    pub email: String,
    pub organization_domain: String,
}

impl CompensationMatch {
    #[must_use]
    pub fn new(record: CompensationRecord, email: &str) -> Self {
        let organization_domain = record.organization_domain();
        Self {
            record,
            email: email.to_owned(),
            organization_domain,
        }
    }
}
