//! Paginated search against Google Scholar.
//!
//! One [`SearchOrchestrator`] runs one search, strictly page by page:
//!
//! ```text
//! Init -> Fetching -> Classifying -> Parsing -----> Accumulating -> Fetching | Done
//!                          |      \-> Escalating -/
//!                          \-> retry (transport) | Done (empty) | Done/Failed (exhausted)
//! ```
//!
//! Network failures are retried with exponential backoff; challenges go to
//! the browser fallback when it is enabled. Anything that stops the search
//! early yields the records gathered so far with `truncated = true`, or an
//! explicit [`SearchOutcome::Failed`] when nothing was gathered at all.

use crate::article::{ArticleRecord, SearchQuery, SortOrder, MAX_NUM_RESULTS};
use crate::browser::{BrowserFallback, ChallengeResolver};
use crate::challenge::PageOutcome;
use crate::config::ScraperConfig;
use crate::error::Result;
use crate::fetcher::{PageFetcher, PageState, PAGE_SIZE};
use crate::parser::ResultParser;
use crate::rate_limiter::RateLimiter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Records and metadata of a finished (possibly partial) search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResults {
    pub keyword: String,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
    pub sort_by: SortOrder,
    pub searched_at: DateTime<Utc>,
    /// Deduplicated records in the source's ranking order
    pub records: Vec<ArticleRecord>,
    /// The source's result estimate, or the record count when it shows none
    pub total_found: u64,
    /// The search stopped early because of a transport failure or challenge
    pub truncated: bool,
    pub pages_fetched: usize,
}

/// A search that produced no usable record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchFailure {
    pub keyword: String,
    pub reason: String,
    pub pages_fetched: usize,
}

/// Terminal state of a search
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SearchOutcome {
    Done(SearchResults),
    Failed(SearchFailure),
}

impl SearchOutcome {
    pub fn records(&self) -> &[ArticleRecord] {
        match self {
            SearchOutcome::Done(results) => &results.records,
            SearchOutcome::Failed(_) => &[],
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, SearchOutcome::Failed(_))
    }
}

enum State {
    Fetching,
    Classifying(PageState),
    Escalating(PageState),
    Parsing(String),
    Accumulating { has_next_page: bool },
    Done,
    Failed(String),
}

/// Accumulated progress of one search
struct Progress {
    records: Vec<ArticleRecord>,
    seen: HashSet<(String, Option<String>)>,
    offset: usize,
    attempt: u32,
    pages_fetched: usize,
    total_estimate: Option<u64>,
    truncated: bool,
}

/// Drives pagination for a single search
pub struct SearchOrchestrator {
    config: ScraperConfig,
    fetcher: PageFetcher,
    parser: ResultParser,
    limiter: RateLimiter,
    fallback: Option<Arc<dyn ChallengeResolver>>,
}

impl SearchOrchestrator {
    /// Create an orchestrator with its own fetcher and rate limiter.
    pub fn new(config: ScraperConfig) -> Result<Self> {
        let fetcher = PageFetcher::new(&config)?;
        Self::with_fetcher(config, fetcher)
    }

    /// Create an orchestrator around an existing fetcher.
    pub fn with_fetcher(config: ScraperConfig, fetcher: PageFetcher) -> Result<Self> {
        config.validate()?;
        let parser = ResultParser::new()?.with_base_url(&config.base_url)?;
        let limiter = RateLimiter::new(config.request_delay, config.request_jitter);
        let fallback: Option<Arc<dyn ChallengeResolver>> = if config.use_browser_fallback {
            Some(Arc::new(BrowserFallback::new(&config)?))
        } else {
            None
        };

        Ok(Self {
            config,
            fetcher,
            parser,
            limiter,
            fallback,
        })
    }

    /// Replace the challenge resolver. It is only consulted when
    /// `use_browser_fallback` is enabled.
    pub fn with_fallback(mut self, resolver: Arc<dyn ChallengeResolver>) -> Self {
        self.fallback = Some(resolver);
        self
    }

    /// Run the search to a terminal state.
    ///
    /// # Errors
    ///
    /// Only invalid queries and URL construction problems are errors; every
    /// network or challenge failure is folded into the returned outcome.
    pub async fn run(&mut self, query: &SearchQuery) -> Result<SearchOutcome> {
        query.validate()?;
        info!(
            keyword = %query.keyword,
            num_results = query.num_results,
            start_year = ?query.start_year,
            end_year = ?query.end_year,
            "Starting Google Scholar search"
        );

        let mut progress = Progress {
            records: Vec::with_capacity(query.num_results),
            seen: HashSet::new(),
            offset: 0,
            attempt: 0,
            pages_fetched: 0,
            total_estimate: None,
            truncated: false,
        };
        let mut current_url = String::new();
        let mut state = State::Fetching;

        loop {
            state = match state {
                State::Fetching => {
                    self.limiter.wait().await;
                    let url = self.fetcher.search_url(query, progress.offset)?;
                    current_url = url.to_string();
                    debug!(offset = progress.offset, attempt = progress.attempt, url = %url, "Fetching page");
                    let page = self.fetcher.fetch(&url).await;
                    progress.pages_fetched += 1;
                    State::Classifying(page)
                }

                State::Classifying(page) => match page.outcome {
                    PageOutcome::Results => State::Parsing(page.body),
                    PageOutcome::Empty => {
                        info!(offset = progress.offset, "Source reports no more results");
                        State::Done
                    }
                    PageOutcome::Challenged => State::Escalating(page),
                    PageOutcome::TransportError => {
                        let cause = page.error.unwrap_or_else(|| "transport error".to_string());
                        if progress.attempt < self.config.max_retries {
                            let backoff = self.config.retry_backoff * 2u32.saturating_pow(progress.attempt);
                            progress.attempt += 1;
                            warn!(
                                offset = progress.offset,
                                attempt = progress.attempt,
                                backoff_ms = backoff.as_millis() as u64,
                                error = %cause,
                                "Page fetch failed, retrying"
                            );
                            tokio::time::sleep(backoff).await;
                            State::Fetching
                        } else {
                            exhausted(&mut progress, format!("retries exhausted: {}", cause))
                        }
                    }
                },

                State::Escalating(page) => {
                    warn!(offset = progress.offset, status = ?page.status, "CAPTCHA detected");
                    match self.active_fallback() {
                        Some(resolver) => {
                            let resolved = resolver.resolve(&current_url).await;
                            match resolved.outcome {
                                PageOutcome::Results => State::Parsing(resolved.body),
                                PageOutcome::Empty => State::Done,
                                _ => exhausted(
                                    &mut progress,
                                    format!(
                                        "browser fallback failed: {}",
                                        resolved.error.unwrap_or_else(|| "still challenged".to_string())
                                    ),
                                ),
                            }
                        }
                        None => exhausted(
                            &mut progress,
                            "access challenged and browser fallback disabled".to_string(),
                        ),
                    }
                }

                State::Parsing(body) => {
                    let parsed = self.parser.parse(&body);
                    progress.attempt = 0;
                    if progress.total_estimate.is_none() {
                        progress.total_estimate = parsed.total_estimate;
                    }

                    let found = parsed.records.len();
                    let mut added = 0;
                    for record in parsed.records {
                        if progress.records.len() >= query.num_results {
                            break;
                        }
                        if progress.seen.insert(record.identity()) {
                            progress.records.push(record);
                            added += 1;
                        }
                    }
                    info!(
                        offset = progress.offset,
                        found,
                        added,
                        total = progress.records.len(),
                        "Parsed results"
                    );
                    State::Accumulating {
                        has_next_page: parsed.has_next_page,
                    }
                }

                State::Accumulating { has_next_page } => {
                    let next_offset = progress.offset + PAGE_SIZE;
                    if progress.records.len() >= query.num_results
                        || !has_next_page
                        || next_offset >= MAX_NUM_RESULTS
                    {
                        State::Done
                    } else {
                        progress.offset = next_offset;
                        State::Fetching
                    }
                }

                State::Done => {
                    let total_found = progress
                        .total_estimate
                        .unwrap_or(progress.records.len() as u64);
                    info!(
                        total = progress.records.len(),
                        truncated = progress.truncated,
                        pages = progress.pages_fetched,
                        "Search complete"
                    );
                    return Ok(SearchOutcome::Done(SearchResults {
                        keyword: query.keyword.clone(),
                        start_year: query.start_year,
                        end_year: query.end_year,
                        sort_by: query.sort_by,
                        searched_at: Utc::now(),
                        records: progress.records,
                        total_found,
                        truncated: progress.truncated,
                        pages_fetched: progress.pages_fetched,
                    }));
                }

                State::Failed(reason) => {
                    warn!(keyword = %query.keyword, reason = %reason, "Search failed");
                    return Ok(SearchOutcome::Failed(SearchFailure {
                        keyword: query.keyword.clone(),
                        reason,
                        pages_fetched: progress.pages_fetched,
                    }));
                }
            };
        }
    }

    fn active_fallback(&self) -> Option<Arc<dyn ChallengeResolver>> {
        if self.config.use_browser_fallback {
            self.fallback.clone()
        } else {
            None
        }
    }
}

/// Stop early: partial results if any were gathered, failure otherwise
fn exhausted(progress: &mut Progress, reason: String) -> State {
    if progress.records.is_empty() {
        State::Failed(reason)
    } else {
        warn!(kept = progress.records.len(), reason = %reason, "Returning partial results");
        progress.truncated = true;
        State::Done
    }
}

/// Run one search with a fresh orchestrator (and so a fresh rate limiter).
pub async fn perform_search(query: &SearchQuery, config: &ScraperConfig) -> Result<SearchOutcome> {
    SearchOrchestrator::new(config.clone())?.run(query).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookies::CookieManager;
    use crate::error::ScholarError;
    use crate::test_support::{challenge_page, empty_page, result_item, results_page};
    use async_trait::async_trait;
    use mockito::{Matcher, Mock, Server, ServerGuard};
    use std::time::Duration;

    fn test_config(base_url: String, max_retries: u32) -> ScraperConfig {
        ScraperConfig {
            base_url,
            request_delay: Duration::ZERO,
            request_jitter: Duration::ZERO,
            retry_backoff: Duration::from_millis(1),
            max_retries,
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    fn orchestrator(config: ScraperConfig) -> SearchOrchestrator {
        let cookies = CookieManager::with_path("/nonexistent/cookies.json".into());
        let fetcher = PageFetcher::with_cookies(&config, &cookies).expect("fetcher builds");
        SearchOrchestrator::with_fetcher(config, fetcher).expect("orchestrator builds")
    }

    async fn serve_page(server: &mut ServerGuard, start: usize, status: usize, body: String) -> Mock {
        server
            .mock("GET", "/scholar")
            .match_query(Matcher::UrlEncoded("start".into(), start.to_string()))
            .with_status(status)
            .with_header("content-type", "text/html")
            .with_body(body)
            .create_async()
            .await
    }

    fn done(outcome: SearchOutcome) -> SearchResults {
        match outcome {
            SearchOutcome::Done(results) => results,
            SearchOutcome::Failed(f) => panic!("search failed: {}", f.reason),
        }
    }

    fn assert_unique(records: &[ArticleRecord]) {
        let identities: HashSet<_> = records.iter().map(ArticleRecord::identity).collect();
        assert_eq!(identities.len(), records.len());
    }

    struct StaticResolver {
        body: String,
    }

    #[async_trait]
    impl ChallengeResolver for StaticResolver {
        async fn resolve(&self, url: &str) -> PageState {
            PageState {
                url: url.to_string(),
                status: None,
                body: self.body.clone(),
                outcome: crate::challenge::ChallengeDetector::new()
                    .expect("selectors compile")
                    .classify(&self.body),
                error: None,
            }
        }
    }

    #[tokio::test]
    async fn test_two_clean_pages() {
        let mut server = Server::new_async().await;
        let p1 = serve_page(&mut server, 0, 200, results_page(0..10, true)).await;
        let p2 = serve_page(&mut server, 10, 200, results_page(10..20, true)).await;

        let query = SearchQuery::new("graph neural networks", 20);
        let results = done(orchestrator(test_config(server.url(), 3)).run(&query).await.expect("valid query"));

        p1.assert_async().await;
        p2.assert_async().await;
        assert_eq!(results.records.len(), 20);
        assert!(!results.truncated);
        assert_eq!(results.total_found, 1230);
        assert_eq!(results.records[0].title, "Paper 0 on graph learning");
        assert_eq!(results.records[19].title, "Paper 19 on graph learning");
        assert_unique(&results.records);
    }

    #[tokio::test]
    async fn test_challenge_on_second_page_truncates() {
        let mut server = Server::new_async().await;
        serve_page(&mut server, 0, 200, results_page(0..10, true)).await;
        let p2 = server
            .mock("GET", "/scholar")
            .match_query(Matcher::UrlEncoded("start".into(), "10".into()))
            .with_status(200)
            .with_body(challenge_page())
            .expect_at_most(3)
            .create_async()
            .await;

        let query = SearchQuery::new("graph neural networks", 20);
        let results = done(orchestrator(test_config(server.url(), 2)).run(&query).await.expect("valid query"));

        p2.assert_async().await;
        assert_eq!(results.records.len(), 10);
        assert!(results.truncated);
    }

    #[tokio::test]
    async fn test_challenge_on_first_page_fails() {
        let mut server = Server::new_async().await;
        serve_page(&mut server, 0, 200, challenge_page()).await;

        let outcome = orchestrator(test_config(server.url(), 2))
            .run(&SearchQuery::new("x", 10))
            .await
            .expect("valid query");
        assert!(outcome.is_failed());
        assert!(outcome.records().is_empty());
    }

    #[tokio::test]
    async fn test_transport_errors_are_retried() {
        let mut server = Server::new_async().await;
        let failing = server
            .mock("GET", "/scholar")
            .match_query(Matcher::UrlEncoded("start".into(), "0".into()))
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let outcome = orchestrator(test_config(server.url(), 2))
            .run(&SearchQuery::new("x", 10))
            .await
            .expect("valid query");

        // One attempt plus two retries
        failing.assert_async().await;
        match outcome {
            SearchOutcome::Failed(f) => {
                assert!(f.reason.contains("retries exhausted"));
                assert_eq!(f.pages_fetched, 3);
            }
            SearchOutcome::Done(_) => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn test_transport_failure_after_records_is_partial() {
        let mut server = Server::new_async().await;
        serve_page(&mut server, 0, 200, results_page(0..10, true)).await;
        serve_page(&mut server, 10, 500, String::new()).await;

        let results = done(
            orchestrator(test_config(server.url(), 1))
                .run(&SearchQuery::new("x", 30))
                .await
                .expect("valid query"),
        );
        assert_eq!(results.records.len(), 10);
        assert!(results.truncated);
    }

    #[tokio::test]
    async fn test_empty_result_is_done_not_failed() {
        let mut server = Server::new_async().await;
        serve_page(&mut server, 0, 200, empty_page()).await;

        let results = done(
            orchestrator(test_config(server.url(), 2))
                .run(&SearchQuery::new("zzqxv", 10))
                .await
                .expect("valid query"),
        );
        assert!(results.records.is_empty());
        assert!(!results.truncated);
        assert_eq!(results.total_found, 0);
    }

    #[tokio::test]
    async fn test_output_capped_and_deduplicated() {
        let mut server = Server::new_async().await;
        // Page 2 repeats three entries of page 1 and the page itself repeats one
        let page2_items = format!(
            "{}{}{}{}",
            result_item(7),
            result_item(8),
            result_item(10),
            result_item(10)
        );
        let page2 = results_page(11..20, true).replace(
            r#"<div id="gs_res_ccl_mid">"#,
            &format!(r#"<div id="gs_res_ccl_mid">{}"#, page2_items),
        );
        serve_page(&mut server, 0, 200, results_page(0..10, true)).await;
        serve_page(&mut server, 10, 200, page2).await;

        let results = done(
            orchestrator(test_config(server.url(), 2))
                .run(&SearchQuery::new("x", 15))
                .await
                .expect("valid query"),
        );
        assert_eq!(results.records.len(), 15);
        assert_unique(&results.records);
        assert_eq!(results.records[10].title, "Paper 10 on graph learning");
        assert_eq!(results.records[11].title, "Paper 11 on graph learning");
        assert!(!results.truncated);
    }

    #[tokio::test]
    async fn test_stops_when_no_next_page() {
        let mut server = Server::new_async().await;
        serve_page(&mut server, 0, 200, results_page(0..6, false)).await;
        let never = serve_page(&mut server, 10, 200, results_page(10..20, false)).await;

        let results = done(
            orchestrator(test_config(server.url(), 2))
                .run(&SearchQuery::new("x", 50))
                .await
                .expect("valid query"),
        );
        assert_eq!(results.records.len(), 6);
        assert!(!results.truncated);
        assert!(!never.matched_async().await);
    }

    #[tokio::test]
    async fn test_fallback_recovers_challenged_page() {
        let mut server = Server::new_async().await;
        serve_page(&mut server, 0, 200, results_page(0..10, true)).await;
        serve_page(&mut server, 10, 429, challenge_page()).await;

        let mut config = test_config(server.url(), 2);
        config.use_browser_fallback = true;
        let resolver = Arc::new(StaticResolver {
            body: results_page(10..20, false),
        });

        let results = done(
            orchestrator(config)
                .with_fallback(resolver)
                .run(&SearchQuery::new("x", 20))
                .await
                .expect("valid query"),
        );
        assert_eq!(results.records.len(), 20);
        assert!(!results.truncated);
    }

    #[tokio::test]
    async fn test_fallback_ignored_when_flag_disabled() {
        let mut server = Server::new_async().await;
        serve_page(&mut server, 0, 200, challenge_page()).await;

        let resolver = Arc::new(StaticResolver {
            body: results_page(0..10, false),
        });
        let outcome = orchestrator(test_config(server.url(), 2))
            .with_fallback(resolver)
            .run(&SearchQuery::new("x", 10))
            .await
            .expect("valid query");
        assert!(outcome.is_failed());
    }

    #[tokio::test]
    async fn test_invalid_query_fails_fast() {
        let config = test_config("http://127.0.0.1:9".to_string(), 2);
        let err = perform_search(&SearchQuery::new("", 10), &config).await.err();
        assert!(matches!(err, Some(ScholarError::InvalidQuery(_))));
    }
}
