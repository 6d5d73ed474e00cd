// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::LazyLock;

use async_trait::async_trait;
use scraper::{Html, Selector};
use url::Url;

use super::{EngineBase, EngineKind, SearchEngine, SearchError, SearchHit};
use crate::tools;

const SEARCH_URL: &str = "https://www.bing.com/search?q=";
const NAME: &str = EngineKind::Bing.to_str();

static CITE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".tptxt cite").expect("Programmer error: bad selector"));
static RESULT_LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("li.b_algo h2 a[href]").expect("Programmer error: bad selector"));

pub struct Bing {
    base: EngineBase,
}

impl Bing {
    #[must_use]
    pub const fn new(base: EngineBase) -> Self {
        Self { base }
    }
}

/// Bing shows the target of a result as plain text,
/// e.g. "https://iema.es.gov.br › Institucional".
fn parse_cite(text: &str) -> Option<Url> {
    let raw = text.split(['›', ' ']).find(|part| !part.is_empty())?;
    if raw.contains("://") {
        Url::parse(raw).ok()
    } else {
        Url::parse(&format!("https://{raw}")).ok()
    }
}

/// Extracts the result URLs of a result page, in order of appearance.
fn candidates(html: &str) -> Vec<Url> {
    let document = Html::parse_document(html);
    let mut urls: Vec<Url> = document
        .select(&CITE)
        .filter_map(|cite| parse_cite(&cite.text().collect::<String>()))
        .collect();
    urls.extend(
        document
            .select(&RESULT_LINK)
            .filter_map(|link| link.value().attr("href"))
            .filter_map(|href| Url::parse(href).ok()),
    );
    urls
}

#[async_trait]
impl SearchEngine for Bing {
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

    const PAGE: &str = r#"<html><body><ol id="b_results">
<li class="b_algo"><div class="tptxt"><cite>https://pt.wikipedia.org › wiki › IEMA</cite></div>
  <h2><a href="https://pt.wikipedia.org/wiki/IEMA">IEMA</a></h2></li>
<li class="b_algo"><div class="tptxt"><cite>https://www.iema.es.gov.br › Institucional</cite></div>
  <h2><a href="https://www.iema.es.gov.br/Institucional">IEMA ES</a></h2></li>
</ol></body></html>"#;

    #[test]
    fn cites_come_first() {
        let urls = candidates(PAGE);
        assert_eq!(urls[0].host_str(), Some("pt.wikipedia.org"));
        assert_eq!(urls[1].host_str(), Some("www.iema.es.gov.br"));
        assert_eq!(
            super::super::first_localized(urls, ".br").map(|hit| hit.domain),
            Some("iema.es.gov.br".to_owned())
        );
    }

    #[test]
    fn cites_without_scheme() {
        assert_eq!(
            parse_cite("detran.es.gov.br › servicos").and_then(|url| url.host_str().map(ToOwned::to_owned)),
            Some("detran.es.gov.br".to_owned())
        );
    }
}
