// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Finds the compensation records that likely belong to an e-mail address.
//!
//! Government e-mail addresses usually follow the pattern
//! `first.last@abbreviation.state.gov.br`,
//! so the local part is matched against person names,
//! and the domain part against organization domains.

use thiserror::Error;

use crate::{
    model::{CompensationMatch, CompensationRecord},
    tools,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Not a usable e-mail address: '{0}'")]
    MalformedEmail(String),
}

/// A parsed e-mail address, ready for matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailQuery {
    email: String,
    tokens: Vec<String>,
    domain: String,
}

impl EmailQuery {
    /// Splits the address into its lower-cased name tokens
    /// (the dot separated parts of the local part) and its domain.
    ///
    /// ```
    /// # use monetometro::query::EmailQuery;
    /// let query = EmailQuery::parse("Maria.Silva@IEMA.es.gov.br").unwrap();
    /// assert_eq!(query.tokens(), ["maria", "silva"]);
    /// assert_eq!(query.domain(), "iema.es.gov.br");
    /// assert!(EmailQuery::parse("no-at-sign").is_err());
    /// ```
    pub fn parse(email: &str) -> Result<Self, QueryError> {
        let malformed = || QueryError::MalformedEmail(email.to_owned());
        let trimmed = email.trim();
        let (local, domain) = trimmed.split_once('@').ok_or_else(malformed)?;
        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return Err(malformed());
        }
        let tokens: Vec<String> = local
            .split('.')
            .filter(|token| !token.is_empty())
            .map(str::to_lowercase)
            .collect();
        if tokens.is_empty() {
            return Err(malformed());
        }
        Ok(Self {
            email: trimmed.to_owned(),
            tokens,
            domain: domain.to_lowercase(),
        })
    }

    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    #[must_use]
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Whether the person name contains all tokens, in order,
    /// either as is, or with all spaces removed
    /// (then the name has to start with the first token).
    #[must_use]
    pub fn matches_name(&self, person_name: &str) -> bool {
        let name = person_name.to_lowercase();
        let squashed = name.replace(' ', "");
        contains_in_order(&name, &self.tokens, false)
            || contains_in_order(&squashed, &self.tokens, true)
    }

    /// Whether the e-mail domain is the organization domain of the record,
    /// or a parent domain of it.
    #[must_use]
    pub fn matches_domain(&self, record: &CompensationRecord) -> bool {
        let full = (!record.abbreviation.is_empty())
            .then(|| format!("{}.{}", record.abbreviation, record.domain));
        full.iter()
            .map(String::as_str)
            .chain(std::iter::once(record.domain.as_str()))
            .any(|candidate| tools::is_domain_suffix(candidate, &self.domain))
    }

    #[must_use]
    pub fn matches(&self, record: &CompensationRecord) -> bool {
        self.matches_domain(record) && self.matches_name(&record.person_name)
    }

    /// Returns every distinct matching record, in dataset order.
    #[must_use]
    pub fn filter(&self, records: &[CompensationRecord]) -> Vec<CompensationMatch> {
        let mut matches: Vec<CompensationMatch> = Vec::new();
        for record in records.iter().filter(|record| self.matches(record)) {
            if !matches.iter().any(|known| &known.record == record) {
                matches.push(CompensationMatch::new(record.clone(), &self.email));
            }
        }
        matches
    }
}

fn contains_in_order(haystack: &str, tokens: &[String], anchored: bool) -> bool {
    let mut rest = haystack;
    for (idx, token) in tokens.iter().enumerate() {
        if idx == 0 && anchored {
            let Some(after) = rest.strip_prefix(token.as_str()) else {
                return false;
            };
            rest = after;
            continue;
        }
        let Some(pos) = rest.find(token.as_str()) else {
            return false;
        };
        rest = &rest[pos + token.len()..];
    }
    true
}
