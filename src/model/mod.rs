// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

pub mod digest;
pub mod organization;
pub mod record;
pub mod table;

pub use digest::{DigestSummary, Provenance, SubdomainCount};
pub use organization::OrganizationDomainMapping;
pub use record::{CompensationMatch, CompensationRecord};
pub use table::{Table, ValidationError, REQUIRED_COLUMNS};
