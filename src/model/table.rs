// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use thiserror::Error;

use super::CompensationRecord;

pub const COL_ORGANIZATION: &str = "organization";
pub const COL_PERSON_NAME: &str = "person_name";
pub const COL_COMPENSATION: &str = "monthly_average_compensation";
pub const COL_ABBREVIATION: &str = "abbreviation";
pub const COL_DOMAIN: &str = "domain";

/// Columns every table handed to the cache has to contain
/// (compared case-insensitively).
pub const REQUIRED_COLUMNS: [&str; 5] = [
    COL_ORGANIZATION,
    COL_PERSON_NAME,
    COL_COMPENSATION,
    COL_ABBREVIATION,
    COL_DOMAIN,
];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required columns missing: {0:?}")]
    MissingColumns(Vec<&'static str>),
    #[error("Row {row} has {found} cells, but the header has {expected}")]
    RaggedRow {
        row: usize,
        found: usize,
        expected: usize,
    },
    #[error("Row {row} has an empty value in required column '{column}'")]
    EmptyValue { row: usize, column: &'static str },
    #[error("Row {row} has a non-numeric or non-finite compensation: '{value}'")]
    NotANumber { row: usize, value: String },
}

/// A loosely typed table, as materialized by a source adapter.
///
/// Adapters may deliver extra columns;
/// only the required ones make it into the cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Organizations of the source whose rows were left out,
    /// because no domain could be determined for them.
    pub unresolved: Vec<String>,
}

struct ColumnIndices {
    organization: usize,
    person_name: usize,
    compensation: usize,
    abbreviation: usize,
    domain: usize,
}

impl Table {
    #[must_use]
    pub fn new<S: Into<String>>(headers: impl IntoIterator<Item = S>) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
            unresolved: Vec::new(),
        }
    }

    /// Builds a table holding exactly the required columns.
    #[must_use]
    pub fn from_records(records: &[CompensationRecord]) -> Self {
        let mut table = Self::new(REQUIRED_COLUMNS);
        table.rows = records
            .iter()
            .map(|record| {
                vec![
                    record.organization.clone(),
                    record.person_name.clone(),
                    record.monthly_average_compensation.to_string(),
                    record.abbreviation.clone(),
                    record.domain.clone(),
                ]
            })
            .collect();
        table
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Index of the column with the given name, ignoring case.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|header| header.trim().eq_ignore_ascii_case(name))
    }

    /// Appends the rows of `other`, re-ordering its cells to match our header.
    /// Columns we do not have are dropped, columns `other` lacks stay empty.
    pub fn append(&mut self, other: Self) {
        if self.headers.is_empty() {
            *self = other;
            return;
        }
        let mapping: Vec<Option<usize>> = self
            .headers
            .iter()
            .map(|header| other.column(header))
            .collect();
        for row in other.rows {
            self.rows.push(
                mapping
                    .iter()
                    .map(|idx| idx.and_then(|idx| row.get(idx).cloned()).unwrap_or_default())
                    .collect(),
            );
        }
        for organization in other.unresolved {
            if !self.unresolved.contains(&organization) {
                self.unresolved.push(organization);
            }
        }
    }

    fn required_indices(&self) -> Result<ColumnIndices, ValidationError> {
        let missing: Vec<&'static str> = REQUIRED_COLUMNS
            .into_iter()
            .filter(|col| self.column(col).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingColumns(missing));
        }
        let idx = |col| self.column(col).unwrap_or_default();
        Ok(ColumnIndices {
            organization: idx(COL_ORGANIZATION),
            person_name: idx(COL_PERSON_NAME),
            compensation: idx(COL_COMPENSATION),
            abbreviation: idx(COL_ABBREVIATION),
            domain: idx(COL_DOMAIN),
        })
    }

    /// Checks the required columns without looking at the rows.
    pub fn validate_columns(&self) -> Result<(), ValidationError> {
        self.required_indices().map(|_| ())
    }

    /// Validates the table and converts it into typed records.
    ///
    /// The abbreviation is the only required value that may be empty,
    /// as organizations living directly on the portal domain have none.
    pub fn to_records(&self) -> Result<Vec<CompensationRecord>, ValidationError> {
        let indices = self.required_indices()?;
        let expected = self.headers.len();
        let mut records = Vec::with_capacity(self.rows.len());
        for (row_idx, row) in self.rows.iter().enumerate() {
            if row.len() != expected {
                return Err(ValidationError::RaggedRow {
                    row: row_idx,
                    found: row.len(),
                    expected,
                });
            }
            let cell = |idx: usize, column: &'static str| {
                let value = row[idx].trim();
                if value.is_empty() {
                    Err(ValidationError::EmptyValue {
                        row: row_idx,
                        column,
                    })
                } else {
                    Ok(value.to_owned())
                }
            };
            let compensation_raw = cell(indices.compensation, COL_COMPENSATION)?;
            let monthly_average_compensation =
                compensation_raw
                    .parse::<f64>()
                    .ok()
                    .filter(|value| value.is_finite())
                    .ok_or_else(|| ValidationError::NotANumber {
                        row: row_idx,
                        value: compensation_raw.clone(),
                    })?;
            records.push(CompensationRecord {
                organization: cell(indices.organization, COL_ORGANIZATION)?,
                person_name: cell(indices.person_name, COL_PERSON_NAME)?,
                monthly_average_compensation,
                abbreviation: row[indices.abbreviation].trim().to_owned(),
                domain: cell(indices.domain, COL_DOMAIN)?,
            });
        }
        Ok(records)
    }
}
