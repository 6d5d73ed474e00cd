// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use urlencoding::encode;

pub const USER_AGENT_DEFAULT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:124.0) Gecko/20100101 Firefox/124.0";

static WWW_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[wW]{2,3}\d*\.").expect("Programmer error: invalid www-prefix regex")
});

/// URL-encodes a single query component.
///
/// ```
/// # use monetometro::tools::url_encode;
/// assert_eq!(url_encode(r#"Hello World"#), "Hello%20World");
/// ```
#[must_use]
pub fn url_encode(input: &str) -> Cow<str> {
    encode(input)
}

/// Removes a leading `www.`, `ww.`, `www2.` (and alike) label from a host name.
///
/// ```
/// # use monetometro::tools::strip_www;
/// assert_eq!(strip_www("www.iema.es.gov.br"), "iema.es.gov.br");
/// assert_eq!(strip_www("WWW3.detran.es.gov.br"), "detran.es.gov.br");
/// assert_eq!(strip_www("wiki.es.gov.br"), "wiki.es.gov.br");
/// ```
#[must_use]
pub fn strip_www(host: &str) -> Cow<str> {
    WWW_PREFIX.replace(host, "")
}

/// Whether `domain` is `suffix` itself,
/// or a sub-domain of it (label aware: `s.gov.br` is no suffix of `es.gov.br`).
///
/// Both are compared case-insensitively.
///
/// ```
/// # use monetometro::tools::is_domain_suffix;
/// assert!(is_domain_suffix("iema.es.gov.br", "es.gov.br"));
/// assert!(is_domain_suffix("ES.gov.br", "es.gov.br"));
/// assert!(!is_domain_suffix("tces.gov.br", "es.gov.br"));
/// ```
#[must_use]
pub fn is_domain_suffix(domain: &str, suffix: &str) -> bool {
    let domain = domain.to_lowercase();
    let suffix = suffix.to_lowercase();
    if suffix.is_empty() {
        return false;
    }
    domain == suffix || domain.ends_with(&format!(".{suffix}"))
}
