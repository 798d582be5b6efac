//! Article records and search queries.

use crate::error::{Result, ScholarError};
use serde::{Deserialize, Serialize};

/// Largest number of results a single search may request
pub const MAX_NUM_RESULTS: usize = 1000;

/// One publication scraped from a result listing.
///
/// Records are built by the parser and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleRecord {
    /// Article title, never empty
    pub title: String,
    /// Authors as rendered by the source (may be truncated there)
    pub authors: Option<String>,
    /// Journal/Conference venue
    pub venue: Option<String>,
    /// Publisher or hosting domain
    pub publisher: Option<String>,
    /// Publication year
    pub year: Option<i32>,
    /// Number of citations, 0 when the source shows no citation link
    pub citation_count: u32,
    /// `citation_count / max(1, current_year - year)`, 0 without a year
    pub citations_per_year: f64,
    /// Snippet or abstract fragment
    pub description: Option<String>,
    /// Link to the full item
    pub source_url: Option<String>,
    /// Direct PDF link shown next to the entry, when there is one
    pub pdf_url: Option<String>,
}

impl ArticleRecord {
    /// Identity used for deduplication: (title, source_url), or title alone
    /// when the record has no link.
    pub fn identity(&self) -> (String, Option<String>) {
        (self.title.clone(), self.source_url.clone())
    }
}

/// Citations per year since publication.
pub fn citations_per_year(citation_count: u32, year: Option<i32>, current_year: i32) -> f64 {
    match year {
        Some(y) => {
            let years = (current_year - y).max(1);
            f64::from(citation_count) / f64::from(years)
        }
        None => 0.0,
    }
}

/// Ordering requested from the source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Relevance,
    Date,
}

impl std::str::FromStr for SortOrder {
    type Err = ScholarError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "relevance" => Ok(SortOrder::Relevance),
            "date" => Ok(SortOrder::Date),
            other => Err(ScholarError::InvalidQuery(format!(
                "Unknown sort order '{}', expected 'relevance' or 'date'",
                other
            ))),
        }
    }
}

/// Search input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Search keywords
    pub keyword: String,
    /// Number of results wanted (1..=1000)
    #[serde(default = "default_num_results")]
    pub num_results: usize,
    /// Results published in or after this year
    #[serde(default)]
    pub start_year: Option<i32>,
    /// Results published in or before this year
    #[serde(default)]
    pub end_year: Option<i32>,
    #[serde(default)]
    pub sort_by: SortOrder,
}

fn default_num_results() -> usize {
    50
}

impl SearchQuery {
    pub fn new(keyword: impl Into<String>, num_results: usize) -> Self {
        Self {
            keyword: keyword.into(),
            num_results,
            start_year: None,
            end_year: None,
            sort_by: SortOrder::default(),
        }
    }

    /// Check the query before any request is made.
    ///
    /// # Errors
    ///
    /// Returns `ScholarError::InvalidQuery` for an empty keyword, a result
    /// count outside 1..=1000 or an inverted year range.
    pub fn validate(&self) -> Result<()> {
        if self.keyword.trim().is_empty() {
            return Err(ScholarError::InvalidQuery("keyword is empty".to_string()));
        }
        if self.num_results == 0 || self.num_results > MAX_NUM_RESULTS {
            return Err(ScholarError::InvalidQuery(format!(
                "num_results must be between 1 and {}, got {}",
                MAX_NUM_RESULTS, self.num_results
            )));
        }
        if let (Some(start), Some(end)) = (self.start_year, self.end_year) {
            if start > end {
                return Err(ScholarError::InvalidQuery(format!(
                    "start_year {} is after end_year {}",
                    start, end
                )));
            }
        }
        Ok(())
    }
}
