// SPDX-FileCopyrightText: 2025 Robin Vobruba <hoijui.quaero@gmail.com>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! A configurable adapter for the most common kind of transparency portal:
//! a listing page linking to one delimited text file per month.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, LazyLock},
};

use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    AdapterError, AdapterInfo, CreationError, Factory as IAdapterFactory, Shared,
    SourceAdapter as ISourceAdapter, TypeInfo,
};
use crate::{
    model::{Table, REQUIRED_COLUMNS},
    resolver::DomainResolver,
};

pub static ADAPTER_TYPE: TypeInfo = TypeInfo {
    name: "csv-portal",
    description: "Scans a portal page for links to monthly compensation tables,
and downloads and aggregates the newest ones.",
};

const ID_PLACEHOLDER: &str = "{id}";

static LINK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("Programmer error: bad selector"));

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RowFilter {
    pub column: String,
    pub value: String,
}

/// Names of the source columns we read.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Columns {
    pub organization: String,
    pub person_name: String,
    pub amount: String,
    /// Only rows with this value (ignoring case) in this column are used,
    /// e.g. only active employees.
    #[serde(default)]
    pub filter: Option<RowFilter>,
}

const fn default_delimiter() -> char {
    ';'
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub domain: String,
    pub federative_unit: String,
    pub portal_url: String,
    /// Matched against every link on the portal page.
    /// Named groups `year` and `month` date a file,
    /// the named group `id` identifies it (the whole match, if missing).
    pub link_pattern: String,
    /// Where to download a file from;
    /// `{id}` gets replaced with its identifier.
    pub download_url: String,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Amounts are written like `1.234,56`.
    #[serde(default)]
    pub decimal_comma: bool,
    /// Lines to skip before the header line.
    #[serde(default)]
    pub skip_rows: usize,
    pub columns: Columns,
    /// Add the proportional shares of the 13th salary and the vacation bonus
    /// to the published monthly amount.
    #[serde(default)]
    pub annualize: bool,
}

pub struct AdapterFactory;

impl IAdapterFactory for AdapterFactory {
    fn info(&self) -> &'static TypeInfo {
        &ADAPTER_TYPE
    }

    fn create(
        &self,
        shared: Arc<Shared>,
        config_adapter: Value,
    ) -> Result<Arc<dyn ISourceAdapter>, CreationError> {
        let invalid = |msg: String| CreationError::InvalidConfig(ADAPTER_TYPE.name.to_owned(), msg);
        let config: Config =
            serde_json::from_value(config_adapter).map_err(|err| invalid(err.to_string()))?;
        Ok(Arc::new(
            CsvPortal::new(shared, config).map_err(|err| invalid(err.to_string()))?,
        ))
    }
}

pub struct CsvPortal {
    info: AdapterInfo,
    config: Config,
    link_pattern: Regex,
    delimiter: u8,
    shared: Arc<Shared>,
}

impl CsvPortal {
    pub fn new(shared: Arc<Shared>, config: Config) -> Result<Self, AdapterError> {
        let link_pattern = Regex::new(&config.link_pattern)
            .map_err(|err| AdapterError::Parse(format!("Invalid link pattern: {err}")))?;
        let delimiter = u8::try_from(config.delimiter).map_err(|_err| {
            AdapterError::Parse(format!("Delimiter is not ASCII: '{}'", config.delimiter))
        })?;
        Ok(Self {
            info: AdapterInfo {
                domain: config.domain.to_lowercase(),
                federative_unit: config.federative_unit.clone(),
                portal_url: config.portal_url.clone(),
            },
            config,
            link_pattern,
            delimiter,
            shared,
        })
    }

    async fn download(&self, url: &str) -> Result<String, AdapterError> {
        tracing::debug!("[{}] Downloading '{url}' ...", self.info.domain);
        let response = self.shared.downloader.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::UnexpectedStatus(url.to_owned(), status));
        }
        Ok(response.text().await?)
    }
}

/// Identifiers of all files of the most recent period linked from the page,
/// sorted and without duplicates.
fn newest_ids(html: &str, link_pattern: &Regex) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut by_period: HashMap<(u32, u32), BTreeSet<String>> = HashMap::new();
    for href in document.select(&LINK).filter_map(|link| link.value().attr("href")) {
        let Some(caps) = link_pattern.captures(href) else {
            continue;
        };
        let number = |group| {
            caps.name(group)
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .unwrap_or_default()
        };
        let id = caps
            .name("id")
            .or_else(|| caps.get(0))
            .map(|m| m.as_str().to_owned())
            .unwrap_or_default();
        by_period
            .entry((number("year"), number("month")))
            .or_default()
            .insert(id);
    }
    by_period
        .into_iter()
        .max_by_key(|(period, _)| *period)
        .map(|(_, ids)| ids.into_iter().collect())
        .unwrap_or_default()
}

/// Average monthly pay, including 1/12 of the 13th salary
/// and 1/12 of the one-third vacation bonus.
///
/// ```
/// # use monetometro::adapters::csv_portal::monthly_average;
/// assert!((monthly_average(1200.0) - 1333.333_333).abs() < 0.001);
/// ```
#[must_use]
pub fn monthly_average(monthly: f64) -> f64 {
    monthly + monthly / 12.0 + monthly / 3.0 / 12.0
}

/// Parses an amount like `1234.56`, `R$ 1.234,56` or an empty cell (zero).
fn parse_amount(raw: &str, decimal_comma: bool) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .trim_start_matches("R$")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return Some(0.0);
    }
    if decimal_comma {
        cleaned.replace('.', "").replace(',', ".").parse().ok()
    } else {
        cleaned.replace(',', "").parse().ok()
    }
}

/// Skips the first `count` lines.
fn skip_lines(text: &str, count: usize) -> &str {
    let mut rest = text;
    for _ in 0..count {
        match rest.split_once('\n') {
            Some((_, after)) => rest = after,
            None => return "",
        }
    }
    rest
}

/// Sums of the amounts per (organization, person), in order of first appearance.
#[derive(Debug, Default)]
struct Totals {
    index: HashMap<(String, String), usize>,
    entries: Vec<(String, String, f64)>,
}

impl Totals {
    fn add(&mut self, organization: &str, person_name: &str, amount: f64) {
        let key = (organization.to_owned(), person_name.to_owned());
        if let Some(&idx) = self.index.get(&key) {
            self.entries[idx].2 += amount;
        } else {
            self.index.insert(key, self.entries.len());
            self.entries
                .push((organization.to_owned(), person_name.to_owned(), amount));
        }
    }

    fn organizations(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.entries
            .iter()
            .map(|(organization, _, _)| organization.as_str())
            .filter(|organization| seen.insert(*organization))
            .collect()
    }
}

fn column_index(headers: &csv_async::StringRecord, name: &str) -> Result<usize, AdapterError> {
    headers
        .iter()
        .position(|header| {
            header
                .trim_start_matches('\u{feff}')
                .trim()
                .eq_ignore_ascii_case(name.trim())
        })
        .ok_or_else(|| AdapterError::Parse(format!("Missing column '{name}'")))
}

async fn parse_into(
    text: &str,
    config: &Config,
    delimiter: u8,
    totals: &mut Totals,
) -> Result<(), AdapterError> {
    let mut reader = csv_async::AsyncReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .create_reader(skip_lines(text, config.skip_rows).as_bytes());
    let headers = reader.headers().await?.clone();
    let columns = &config.columns;
    let organization = column_index(&headers, &columns.organization)?;
    let person_name = column_index(&headers, &columns.person_name)?;
    let amount = column_index(&headers, &columns.amount)?;
    let filter = columns
        .filter
        .as_ref()
        .map(|filter| column_index(&headers, &filter.column).map(|idx| (idx, filter.value.trim())))
        .transpose()?;

    let mut records = reader.records();
    while let Some(record) = records.next().await {
        let record = record?;
        if let Some((idx, value)) = filter {
            if !record
                .get(idx)
                .is_some_and(|cell| cell.trim().eq_ignore_ascii_case(value))
            {
                continue;
            }
        }
        let (Some(org), Some(person)) = (record.get(organization), record.get(person_name)) else {
            continue;
        };
        let (org, person) = (org.trim(), person.trim());
        if org.is_empty() || person.is_empty() {
            continue;
        }
        let raw_amount = record.get(amount).unwrap_or_default();
        let value = parse_amount(raw_amount, config.decimal_comma)
            .ok_or_else(|| AdapterError::Parse(format!("Not an amount: '{raw_amount}'")))?;
        totals.add(org, person, value);
    }
    Ok(())
}

#[async_trait]
impl ISourceAdapter for CsvPortal {
    fn info(&self) -> &AdapterInfo {
        &self.info
    }

    async fn latest_version_ids(&self) -> Result<Vec<String>, AdapterError> {
        let page = self.download(&self.config.portal_url).await?;
        let ids = newest_ids(&page, &self.link_pattern);
        if ids.is_empty() {
            return Err(AdapterError::NoSnapshot(self.config.portal_url.clone()));
        }
        tracing::debug!("[{}] Newest snapshot: {ids:?}", self.info.domain);
        Ok(ids)
    }

    async fn materialize(&self, version_ids: &[String]) -> Result<Table, AdapterError> {
        let mut totals = Totals::default();
        for id in version_ids {
            let url = self.config.download_url.replace(ID_PLACEHOLDER, id);
            let text = self.download(&url).await?;
            parse_into(&text, &self.config, self.delimiter, &mut totals).await?;
        }
        tracing::info!(
            "[{}] Read {} compensation entries.",
            self.info.domain,
            totals.entries.len()
        );

        tabulate(totals, &self.shared.resolver, &self.info.domain, self.config.annualize).await
    }
}

/// Resolves the organizations of `totals` to domains, and builds the final table.
///
/// Rows of organizations that could not be resolved are left out,
/// and the organizations listed in [`Table::unresolved`].
async fn tabulate(
    totals: Totals,
    resolver: &DomainResolver,
    domain: &str,
    annualize: bool,
) -> Result<Table, AdapterError> {
    let report = resolver.resolve(&totals.organizations(), domain).await?;

    let mut table = Table::new(REQUIRED_COLUMNS);
    let mut dropped = 0_usize;
    for (organization, person_name, total) in totals.entries {
        let Some(mapping) = report.get(&organization) else {
            dropped += 1;
            if !table.unresolved.contains(&organization) {
                table.unresolved.push(organization);
            }
            continue;
        };
        let amount = if annualize {
            monthly_average(total)
        } else {
            total
        };
        table.rows.push(vec![
            organization,
            person_name,
            amount.to_string(),
            mapping.abbreviation.clone(),
            mapping.domain.clone(),
        ]);
    }
    if dropped > 0 {
        tracing::warn!(
            "[{domain}] Left out {dropped} entries of {} organizations with unknown domain.",
            table.unresolved.len()
        );
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        resolver::{store::MemoryBackend, ExhaustionPolicy, ResolverSettings},
        search::{SearchEngine, SearchError, SearchHit},
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` queries, then answers from a fixed table.
    struct FlakyEngine {
        failures: usize,
        queries: AtomicUsize,
        answers: &'static [(&'static str, &'static str)],
    }

    #[async_trait]
    impl SearchEngine for FlakyEngine {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn lookup(&self, query: &str) -> Result<Option<SearchHit>, SearchError> {
            if self.queries.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(SearchError::Parse("flaky", "too many requests".to_owned()));
            }
            Ok(self
                .answers
                .iter()
                .find(|(name, _)| query.starts_with(name))
                .map(|(_, domain)| SearchHit {
                    domain: (*domain).to_owned(),
                    path: "/".to_owned(),
                }))
        }
    }

    fn config(filter: Option<RowFilter>) -> Config {
        serde_json::from_value(serde_json::json!({
            "domain": "es.gov.br",
            "federative_unit": "Espirito Santo",
            "portal_url": "https://transparencia.es.gov.br/servidores",
            "link_pattern": r"remuneracao_(?P<year>\d{4})(?P<month>\d{2})_(?P<id>\w+)\.csv",
            "download_url": "https://transparencia.es.gov.br/files/{id}.csv",
            "decimal_comma": true,
            "skip_rows": 1,
            "columns": {
                "organization": "Orgao",
                "person_name": "Nome",
                "amount": "Valor",
                "filter": filter,
            },
        }))
        .unwrap()
    }

    #[test]
    fn config_defaults() {
        let config = config(None);
        assert_eq!(config.delimiter, ';');
        assert!(!config.annualize);
        assert_eq!(config.columns.filter, None);
    }

    #[test]
    fn picks_the_newest_period() {
        let page = r#"<html><body>
<a href="/files/remuneracao_202408_a.csv">Aug</a>
<a href="/files/remuneracao_202409_b.csv">Sep</a>
<a href="/files/remuneracao_202409_a.csv">Sep</a>
<a href="/files/remuneracao_202312_z.csv">Dec</a>
<a href="/sobre">About</a>
</body></html>"#;
        let pattern = Regex::new(&config(None).link_pattern).unwrap();
        assert_eq!(newest_ids(page, &pattern), vec!["a", "b"]);
        assert!(newest_ids("<html></html>", &pattern).is_empty());
    }

    #[test]
    fn amounts() {
        assert_eq!(parse_amount("1.234,56", true), Some(1234.56));
        assert_eq!(parse_amount("R$ 1.234,56", true), Some(1234.56));
        assert_eq!(parse_amount("1,234.56", false), Some(1234.56));
        assert_eq!(parse_amount("  ", true), Some(0.0));
        assert_eq!(parse_amount("n/a", true), None);
    }

    #[test]
    fn skips_leading_lines() {
        assert_eq!(skip_lines("a\nb\nc", 0), "a\nb\nc");
        assert_eq!(skip_lines("a\nb\nc", 2), "c");
        assert_eq!(skip_lines("a", 3), "");
    }

    #[tokio::test]
    async fn sums_per_person_and_filters() {
        let text = "Relatorio gerado em 01/10/2024\n\
Orgao;Nome;Situacao;Valor\n\
IEMA;MARIA SILVA;ATIVO;1.000,00\n\
IEMA;MARIA SILVA;ATIVO;500,50\n\
DETRAN;JOAO SOUZA;INATIVO;9.999,00\n\
DETRAN;ANA LIMA;ativo;2.000,00\n";
        let config = config(Some(RowFilter {
            column: "situacao".to_owned(),
            value: "ATIVO".to_owned(),
        }));
        let mut totals = Totals::default();
        parse_into(text, &config, b';', &mut totals).await.unwrap();
        assert_eq!(
            totals.entries,
            vec![
                ("IEMA".to_owned(), "MARIA SILVA".to_owned(), 1500.5),
                ("DETRAN".to_owned(), "ANA LIMA".to_owned(), 2000.0),
            ]
        );
        assert_eq!(totals.organizations(), vec!["IEMA", "DETRAN"]);
    }

    #[tokio::test]
    async fn byte_order_mark_is_ignored_in_headers() {
        let text = "\u{feff}Orgao;Nome;Valor\nIEMA;MARIA;1.000,00\n";
        let mut config = config(None);
        config.skip_rows = 0;
        let mut totals = Totals::default();
        parse_into(text, &config, b';', &mut totals).await.unwrap();
        assert_eq!(
            totals.entries,
            vec![("IEMA".to_owned(), "MARIA".to_owned(), 1000.0)]
        );
    }

    #[tokio::test]
    async fn unresolved_organizations_are_reported_not_dropped() {
        let resolver = DomainResolver::new(
            vec![Box::new(FlakyEngine {
                failures: 1,
                queries: AtomicUsize::new(0),
                answers: &[("IEMA", "iema.es.gov.br"), ("DETRAN", "detran.es.gov.br")],
            })],
            Arc::new(MemoryBackend::default()),
            ResolverSettings {
                exhaustion: ExhaustionPolicy::Stop,
                ..ResolverSettings::default()
            },
        );
        let totals = || {
            let mut totals = Totals::default();
            totals.add("IEMA", "MARIA", 1000.0);
            totals.add("DETRAN", "JOAO", 2000.0);
            totals.add("IEMA", "ANA", 500.0);
            totals
        };

        // the first organization fails, the second is never tried
        let table = tabulate(totals(), &resolver, "es.gov.br", false).await.unwrap();
        assert!(table.is_empty());
        assert_eq!(table.unresolved, vec!["IEMA", "DETRAN"]);

        let table = tabulate(totals(), &resolver, "es.gov.br", false).await.unwrap();
        assert_eq!(table.len(), 3);
        assert!(table.unresolved.is_empty());
        assert_eq!(table.rows[1][4], "detran.es.gov.br");
    }

    #[tokio::test]
    async fn missing_columns_are_reported() {
        let text = "skipped\nA;B\n1;2\n";
        let mut totals = Totals::default();
        assert!(matches!(
            parse_into(text, &config(None), b';', &mut totals).await,
            Err(AdapterError::Parse(_))
        ));
    }
}
