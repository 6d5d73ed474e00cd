// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use serde::{Deserialize, Serialize};

/// A free-text organization name, resolved to its internet domain.
///
/// Entries are unique per (`name`, `parent_domain`),
/// because the same name (e.g. "Secretaria de Saude")
/// exists in many states.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OrganizationDomainMapping {
    pub name: String,
    pub domain: String,
    pub abbreviation: String,
    /// The portal domain the organization was found under, e.g. `es.gov.br`.
    pub parent_domain: String,
}

impl OrganizationDomainMapping {
    /// Creates a mapping, deriving the abbreviation from the resolved domain.
    ///
    /// ```
    /// # use monetometro::model::OrganizationDomainMapping;
    /// let mapping = OrganizationDomainMapping::from_resolved(
    ///     "Instituto Estadual de Meio Ambiente", "iema.es.gov.br", "es.gov.br");
    /// assert_eq!(mapping.abbreviation, "iema");
    /// let mapping = OrganizationDomainMapping::from_resolved(
    ///     "Governo do Estado", "es.gov.br", "es.gov.br");
    /// assert_eq!(mapping.abbreviation, "");
    /// ```
    #[must_use]
    pub fn from_resolved(name: &str, domain: &str, parent_domain: &str) -> Self {
        let abbreviation = domain
            .replace(parent_domain, "")
            .split('.')
            .next()
            .unwrap_or_default()
            .to_owned();
        Self {
            name: name.to_owned(),
            domain: domain.to_owned(),
            abbreviation,
            parent_domain: parent_domain.to_owned(),
        }
    }

    #[must_use]
    pub fn is_for(&self, name: &str, parent_domain: &str) -> bool {
        self.name == name && self.parent_domain == parent_domain
    }
}
