// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::LazyLock;

use async_trait::async_trait;
use scraper::{Html, Selector};
use url::Url;

use super::{unwrap_redirect, EngineBase, EngineKind, SearchEngine, SearchError, SearchHit};
use crate::tools;

/// The JavaScript free version of DuckDuckGo,
/// restricted to the Brazilian region.
const SEARCH_URL: &str = "https://html.duckduckgo.com/html/?kl=br-pt&q=";
const NAME: &str = EngineKind::DuckDuckGo.to_str();

static BASE_URL: LazyLock<Url> = LazyLock::new(|| {
    Url::parse("https://html.duckduckgo.com/").expect("Programmer error: bad URL")
});
static RESULT_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.result__a[href]").expect("Programmer error: bad selector"));

pub struct DuckDuckGo {
    base: EngineBase,
}

impl DuckDuckGo {
    #[must_use]
    pub const fn new(base: EngineBase) -> Self {
        Self { base }
    }
}

/// Result links point to `//duckduckgo.com/l/?uddg=<target>`.
fn candidates(html: &str) -> Vec<Url> {
    let document = Html::parse_document(html);
    document
        .select(&RESULT_LINK)
        .filter_map(|link| link.value().attr("href"))
        .filter_map(|href| unwrap_redirect(href, &BASE_URL, "uddg"))
        .collect()
}

#[async_trait]
impl SearchEngine for DuckDuckGo {
    fn name(&self) -> &str {
        NAME
    }

    async fn lookup(&self, query: &str) -> Result<Option<SearchHit>, SearchError> {
        let url = format!("{SEARCH_URL}{}", tools::url_encode(query));
        let page = self.base.fetch(NAME, &url).await?;
        Ok(self.base.first_localized(candidates(&page)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwraps_uddg_links() {
        let page = r#"<html><body><div class="results">
<a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.sejus.es.gov.br%2Fcontato&amp;rut=abc">SEJUS</a>
</div></body></html>"#;
        let urls = candidates(page);
        assert_eq!(urls.len(), 1);
        assert_eq!(urls[0].as_str(), "https://www.sejus.es.gov.br/contato");
    }
}
