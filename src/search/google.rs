// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::LazyLock;

use async_trait::async_trait;
use scraper::{Html, Selector};
use url::Url;

use super::{unwrap_redirect, EngineBase, EngineKind, SearchEngine, SearchError, SearchHit};
use crate::tools;

const SEARCH_URL: &str = "https://www.google.com/search?q=";
const NAME: &str = EngineKind::Google.to_str();

static BASE_URL: LazyLock<Url> =
    LazyLock::new(|| Url::parse("https://www.google.com/").expect("Programmer error: bad URL"));
static LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("Programmer error: bad selector"));
static HEADING: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h3").expect("Programmer error: bad selector"));

pub struct Google {
    base: EngineBase,
}

impl Google {
    #[must_use]
    pub const fn new(base: EngineBase) -> Self {
        Self { base }
    }
}

/// Result links are the ones carrying a heading;
/// without JavaScript, Google wraps them in `/url?q=<target>` redirects.
fn candidates(html: &str) -> Vec<Url> {
    let document = Html::parse_document(html);
    document
        .select(&LINK)
        .filter(|link| link.select(&HEADING).next().is_some())
        .filter_map(|link| link.value().attr("href"))
        .filter_map(|href| unwrap_redirect(href, &BASE_URL, "q"))
        .collect()
}

#[async_trait]
impl SearchEngine for Google {
    fn name(&self) -> &str {
        NAME
    }

    async fn lookup(&self, query: &str) -> Result<Option<SearchHit>, SearchError> {
        let url = format!("{SEARCH_URL}{}", tools::url_encode(query));
        let page = self.base.fetch(NAME, &url).await?;
        Ok(self.base.first_localized(candidates(&page)))
    }
}
