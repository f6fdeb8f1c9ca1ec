use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One search hit from the filing source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilingRef {
    pub accession_number: String,
    pub ciks: Vec<String>,
    /// Primary document name when the search hit carries it.
    pub file_name: Option<String>,
    pub filed_on: Option<NaiveDate>,
}

impl FilingRef {
    /// Accession number without dashes, as used in archive paths.
    pub fn accession_path(&self) -> String {
        self.accession_number.replace('-', "")
    }

    /// Archive paths accept any CIK attached to the filing; leading zeros are dropped.
    pub fn archive_cik(&self) -> Option<String> {
        self.ciks
            .iter()
            .map(|c| c.trim().trim_start_matches('0'))
            .find(|c| !c.is_empty())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLocation {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SearchResponse {
    pub hits: SearchHits,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SearchHits {
    #[serde(default)]
    pub total: Option<SearchTotal>,
    #[serde(default)]
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SearchTotal {
    pub value: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SearchHit {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_source")]
    pub source: SearchSource,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SearchSource {
    #[serde(default)]
    pub adsh: Option<String>,
    #[serde(default)]
    pub ciks: Vec<String>,
    #[serde(default)]
    pub file_date: Option<NaiveDate>,
}

impl SearchHit {
    pub fn into_filing_ref(self) -> Option<FilingRef> {
        let (id_accession, id_file) = match self.id.split_once(':') {
            Some((a, f)) => (a.to_string(), Some(f.to_string())),
            None => (self.id.clone(), None),
        };
        let accession_number = self
            .source
            .adsh
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(id_accession);
        if accession_number.trim().is_empty() {
            return None;
        }

        Some(FilingRef {
            accession_number,
            ciks: self.source.ciks,
            file_name: id_file.filter(|f| !f.trim().is_empty()),
            filed_on: self.source.file_date,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FilingIndex {
    pub directory: FilingIndexDirectory,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FilingIndexDirectory {
    #[serde(default)]
    pub item: Vec<FilingIndexItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FilingIndexItem {
    pub name: String,
}
