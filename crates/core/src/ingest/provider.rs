use crate::config::{self, Settings};
use crate::ingest::types::{DocumentLocation, FilingIndex, FilingRef, SearchResponse};
use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use std::time::Duration;

const DEFAULT_SEARCH_BASE_URL: &str = "https://efts.sec.gov";
const DEFAULT_ARCHIVES_BASE_URL: &str = "https://www.sec.gov";
const SEARCH_PATH: &str = "/LATEST/search-index";
const FORM_TYPE: &str = "4";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: u32 = 3;

/// Upstream source of disclosure filings.
#[async_trait::async_trait]
pub trait FilingSource: Send + Sync {
    fn source_name(&self) -> &'static str;

    /// Filings within the lookback window. Failure here aborts ingestion.
    async fn query(&self, lookback_days: u32) -> Result<Vec<FilingRef>>;

    async fn resolve(&self, filing: &FilingRef) -> Result<DocumentLocation>;

    async fn fetch(&self, location: &DocumentLocation) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct EdgarClient {
    http: reqwest::Client,
    search_base_url: String,
    archives_base_url: String,
    user_agent: String,
    max_pages: u32,
    retries: u32,
}

impl EdgarClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let user_agent = settings.require_sec_user_agent()?.to_string();
        let search_base_url = std::env::var("SEC_SEARCH_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_SEARCH_BASE_URL.to_string());
        let archives_base_url = std::env::var("SEC_ARCHIVES_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_ARCHIVES_BASE_URL.to_string());

        let timeout_secs: u64 = config::parse_env("SEC_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?;
        let retries = config::parse_env::<u32>("SEC_RETRIES", DEFAULT_RETRIES)?.max(1);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build SEC http client")?;

        Ok(Self {
            http,
            search_base_url,
            archives_base_url,
            user_agent,
            max_pages: settings.ingest_max_pages.max(1),
            retries,
        })
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_str(&self.user_agent)?);
        Ok(headers)
    }

    async fn get_text(&self, url: &str, query: &[(&str, String)]) -> Result<String> {
        let res = self
            .http
            .get(url)
            .headers(self.headers()?)
            .query(query)
            .send()
            .await
            .with_context(|| format!("SEC request failed: {url}"))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read SEC response body")?;
        if !status.is_success() {
            anyhow::bail!("SEC HTTP {status} for {url}");
        }
        Ok(text)
    }

    async fn search_page(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        from: u64,
    ) -> Result<SearchResponse> {
        let url = format!("{}{}", self.search_base_url.trim_end_matches('/'), SEARCH_PATH);
        let query = [
            ("forms", FORM_TYPE.to_string()),
            ("dateRange", "custom".to_string()),
            ("startdt", start.to_string()),
            ("enddt", end.to_string()),
            ("from", from.to_string()),
        ];

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let res = self.get_text(&url, &query).await.and_then(|text| {
                serde_json::from_str::<SearchResponse>(&text)
                    .with_context(|| format!("SEC search response has unexpected shape: {text}"))
            });
            match res {
                Ok(parsed) => return Ok(parsed),
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(attempt, ?backoff, error = %err, "SEC search failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    fn archive_dir(&self, filing: &FilingRef) -> Result<String> {
        let cik = filing
            .archive_cik()
            .with_context(|| format!("filing {} has no CIK", filing.accession_number))?;
        Ok(format!(
            "{}/Archives/edgar/data/{}/{}",
            self.archives_base_url.trim_end_matches('/'),
            cik,
            filing.accession_path()
        ))
    }
}

#[async_trait::async_trait]
impl FilingSource for EdgarClient {
    fn source_name(&self) -> &'static str {
        "sec_edgar"
    }

    async fn query(&self, lookback_days: u32) -> Result<Vec<FilingRef>> {
        let (start, end) = search_window(Utc::now().date_naive(), lookback_days);

        let mut out = Vec::new();
        let mut from: u64 = 0;
        for page in 0..self.max_pages {
            let res = self.search_page(start, end, from).await?;
            let total = res.hits.total.as_ref().map(|t| t.value);
            let page_len = res.hits.hits.len() as u64;
            out.extend(
                res.hits
                    .hits
                    .into_iter()
                    .filter_map(|hit| hit.into_filing_ref()),
            );
            from += page_len;

            tracing::debug!(page, page_len, ?total, collected = out.len(), "SEC search page");
            if page_len == 0 || total.is_some_and(|t| from >= t) {
                break;
            }
        }

        // Hits are per document; a filing can surface more than once.
        let mut seen = std::collections::HashSet::new();
        out.retain(|f| seen.insert(f.accession_number.clone()));

        tracing::info!(%start, %end, filings = out.len(), "SEC search complete");
        Ok(out)
    }

    async fn resolve(&self, filing: &FilingRef) -> Result<DocumentLocation> {
        let dir = self.archive_dir(filing)?;
        if let Some(location) = embedded_location(&dir, filing) {
            return Ok(location);
        }

        let index_url = format!("{dir}/index.json");
        let text = self.get_text(&index_url, &[]).await?;
        let index = serde_json::from_str::<FilingIndex>(&text)
            .with_context(|| format!("unexpected filing index shape at {index_url}"))?;
        let name = index
            .directory
            .item
            .into_iter()
            .map(|i| i.name)
            .find(|n| is_raw_xml_name(n))
            .with_context(|| format!("no XML document in {index_url}"))?;

        Ok(DocumentLocation {
            url: format!("{dir}/{name}"),
        })
    }

    async fn fetch(&self, location: &DocumentLocation) -> Result<String> {
        self.get_text(&location.url, &[]).await
    }
}

/// Inclusive date range covering `lookback_days` days before `today` plus today.
pub fn search_window(today: NaiveDate, lookback_days: u32) -> (NaiveDate, NaiveDate) {
    let start = today - ChronoDuration::days(i64::from(lookback_days));
    (start, today)
}

/// Fast path: the search hit already names the XML document. Rendered copies
/// live under an `xsl*/` prefix; the raw XML sits next to it without the prefix.
pub fn embedded_location(archive_dir: &str, filing: &FilingRef) -> Option<DocumentLocation> {
    let file = filing.file_name.as_deref()?;
    let name = file.rsplit('/').next().unwrap_or(file);
    if !is_raw_xml_name(name) {
        return None;
    }
    Some(DocumentLocation {
        url: format!("{archive_dir}/{name}"),
    })
}

fn is_raw_xml_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".xml") && !lower.starts_with("filingsummary")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filing(file_name: Option<&str>) -> FilingRef {
        FilingRef {
            accession_number: "0001127602-26-001234".to_string(),
            ciks: vec!["0000320193".to_string(), "0001214156".to_string()],
            file_name: file_name.map(str::to_string),
            filed_on: None,
        }
    }

    #[test]
    fn window_spans_lookback_plus_today() {
        let today = NaiveDate::from_ymd_opt(2026, 1, 27).unwrap();
        assert_eq!(
            search_window(today, 1),
            (NaiveDate::from_ymd_opt(2026, 1, 26).unwrap(), today)
        );
        assert_eq!(search_window(today, 3).0, NaiveDate::from_ymd_opt(2026, 1, 24).unwrap());
    }

    #[test]
    fn parses_search_hits_into_filing_refs() {
        let v = json!({
            "hits": {
                "total": {"value": 2},
                "hits": [
                    {
                        "_id": "0001127602-26-001234:xslF345X05/wk-form4_1.xml",
                        "_source": {"adsh": "0001127602-26-001234", "ciks": ["0000320193"], "file_date": "2026-01-27"}
                    },
                    {
                        "_id": "0000950170-26-000001",
                        "_source": {"ciks": ["0000789019"]}
                    }
                ]
            }
        });
        let parsed: SearchResponse = serde_json::from_value(v).unwrap();
        let refs: Vec<FilingRef> = parsed
            .hits
            .hits
            .into_iter()
            .filter_map(|h| h.into_filing_ref())
            .collect();
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].file_name.as_deref(), Some("xslF345X05/wk-form4_1.xml"));
        assert_eq!(refs[0].filed_on, NaiveDate::from_ymd_opt(2026, 1, 27));
        assert_eq!(refs[1].accession_number, "0000950170-26-000001");
        assert_eq!(refs[1].file_name, None);
    }

    #[test]
    fn search_response_without_hits_is_a_shape_error() {
        let res = serde_json::from_value::<SearchResponse>(json!({"error": "rate limited"}));
        assert!(res.is_err());
    }

    #[test]
    fn fast_path_strips_stylesheet_prefix() {
        let f = filing(Some("xslF345X05/wk-form4_1.xml"));
        let dir = "https://www.sec.gov/Archives/edgar/data/320193/000112760226001234";
        let loc = embedded_location(dir, &f).unwrap();
        assert_eq!(loc.url, format!("{dir}/wk-form4_1.xml"));
        assert_eq!(f.archive_cik().as_deref(), Some("320193"));
    }

    #[test]
    fn fast_path_declines_non_xml_or_missing_names() {
        let dir = "https://example.test/dir";
        assert!(embedded_location(dir, &filing(None)).is_none());
        assert!(embedded_location(dir, &filing(Some("primary_doc.html"))).is_none());
    }

    #[test]
    fn filing_index_picks_first_raw_xml() {
        let v = json!({
            "directory": {
                "item": [
                    {"name": "0001127602-26-001234-index.htm"},
                    {"name": "FilingSummary.xml"},
                    {"name": "doc4.xml"}
                ]
            }
        });
        let index: FilingIndex = serde_json::from_value(v).unwrap();
        let name = index.directory.item.into_iter().map(|i| i.name).find(|n| is_raw_xml_name(n));
        assert_eq!(name.as_deref(), Some("doc4.xml"));
    }
}
