//! Listing page fetcher.
//!
//! Issues one GET per call with a rotating browser header profile and never
//! returns an error for network trouble: failures come back as a
//! [`PageState`] with [`PageOutcome::TransportError`] so the orchestrator can
//! decide whether to retry.

use crate::article::{SearchQuery, SortOrder};
use crate::challenge::{ChallengeDetector, PageOutcome};
use crate::config::ScraperConfig;
use crate::cookies::CookieManager;
use crate::error::{Result, ScholarError};
use rand::Rng;
use reqwest::StatusCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};
use url::Url;

/// Realistic browser identity sent with a listing request
#[derive(Debug, Clone, Copy)]
pub struct HeaderProfile {
    pub user_agent: &'static str,
    pub accept_language: &'static str,
}

/// Header profiles rotated across requests
pub const HEADER_PROFILES: &[HeaderProfile] = &[
    HeaderProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        accept_language: "en-US,en;q=0.9",
    },
    HeaderProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
        accept_language: "en-US,en;q=0.9,zh-CN;q=0.8,zh;q=0.7",
    },
    HeaderProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
        accept_language: "en-US,en;q=0.5",
    },
    HeaderProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
        accept_language: "en-GB,en;q=0.9",
    },
    HeaderProfile {
        user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        accept_language: "en-US,en;q=0.8",
    },
];

/// Listing results per page on the source
pub const PAGE_SIZE: usize = 10;

/// Source data type filter: articles, excluding patents
const AS_SDT: &str = "0,5";

/// Transient state of one fetch attempt
#[derive(Debug, Clone)]
pub struct PageState {
    pub url: String,
    /// HTTP status, absent when no response arrived
    pub status: Option<u16>,
    pub body: String,
    pub outcome: PageOutcome,
    /// Underlying cause for `TransportError`
    pub error: Option<String>,
}

impl PageState {
    pub fn transport_error(url: &str, status: Option<u16>, cause: impl Into<String>) -> Self {
        Self {
            url: url.to_string(),
            status,
            body: String::new(),
            outcome: PageOutcome::TransportError,
            error: Some(ScholarError::Transport(cause.into()).to_string()),
        }
    }
}

/// Issues listing requests against the search source
#[derive(Debug)]
pub struct PageFetcher {
    client: reqwest::Client,
    base_url: String,
    detector: ChallengeDetector,
    cookie_header: Option<String>,
    next_profile: AtomicUsize,
}

impl PageFetcher {
    /// Build a fetcher from configuration, loading stored cookies.
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        Self::with_cookies(config, &CookieManager::default())
    }

    /// Build a fetcher that takes its cookies from `cookies`.
    pub fn with_cookies(config: &ScraperConfig, cookies: &CookieManager) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let host = Url::parse(&base_url)
            .map_err(|e| ScholarError::Config(format!("Invalid base URL: {}", e)))?
            .host_str()
            .unwrap_or_default()
            .to_string();

        let cookie_header = cookies.header_for(&host);
        if cookie_header.is_none() {
            warn!("No cookies loaded. Run 'scholardock cookies import' to reduce CAPTCHA challenges.");
        }

        Ok(Self {
            client: build_http_client(config)?,
            base_url,
            detector: ChallengeDetector::new()?,
            cookie_header,
            next_profile: AtomicUsize::new(rand::thread_rng().gen_range(0..HEADER_PROFILES.len())),
        })
    }

    /// Build the listing URL for `query` starting at result `offset`.
    pub fn search_url(&self, query: &SearchQuery, offset: usize) -> Result<Url> {
        build_search_url(&self.base_url, query, offset)
    }

    /// Fetch one page and classify it.
    pub async fn fetch(&self, url: &Url) -> PageState {
        let profile = self.rotate_profile();
        debug!(url = %url, user_agent = profile.user_agent, "Fetching page");

        let mut request = self
            .client
            .get(url.as_str())
            .header(reqwest::header::USER_AGENT, profile.user_agent)
            .header(
                reqwest::header::ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
            )
            .header(reqwest::header::ACCEPT_LANGUAGE, profile.accept_language)
            .header("DNT", "1")
            .header("Sec-Fetch-Dest", "document")
            .header("Sec-Fetch-Mode", "navigate")
            .header("Sec-Fetch-Site", "none")
            .header("Sec-Fetch-User", "?1")
            .header("Upgrade-Insecure-Requests", "1");

        if let Some(ref cookie) = self.cookie_header {
            request = request.header(reqwest::header::COOKIE, cookie);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(url = %url, error = %e, "Request failed");
                return PageState::transport_error(url.as_str(), None, e.to_string());
            }
        };

        let status = response.status();
        // Verification pages arrive with 429/403 and still need classifying
        let carries_challenge =
            status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::FORBIDDEN;
        if !status.is_success() && !carries_challenge {
            warn!(url = %url, status = status.as_u16(), "Unexpected HTTP status");
            return PageState::transport_error(
                url.as_str(),
                Some(status.as_u16()),
                format!("HTTP error: {}", status),
            );
        }

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                return PageState::transport_error(url.as_str(), Some(status.as_u16()), e.to_string())
            }
        };

        let outcome = self.detector.classify(&body);
        debug!(url = %url, status = status.as_u16(), outcome = ?outcome, "Page classified");

        PageState {
            url: url.to_string(),
            status: Some(status.as_u16()),
            body,
            outcome,
            error: None,
        }
    }

    fn rotate_profile(&self) -> HeaderProfile {
        let index = self.next_profile.fetch_add(1, Ordering::Relaxed);
        HEADER_PROFILES[index % HEADER_PROFILES.len()]
    }
}

/// Build HTTP client with optional proxy
fn build_http_client(config: &ScraperConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .cookie_store(true);

    if let Some(ref proxy_url) = config.proxy {
        let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
            ScholarError::Config(format!("Invalid proxy URL '{}': {}", proxy_url, e))
        })?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| ScholarError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// Build Google Scholar search URL
fn build_search_url(base_url: &str, query: &SearchQuery, offset: usize) -> Result<Url> {
    let mut url = Url::parse(&format!("{}/scholar", base_url))
        .map_err(|e| ScholarError::Config(format!("Invalid base URL: {}", e)))?;

    {
        let mut params = url.query_pairs_mut();
        params.append_pair("start", &offset.to_string());
        params.append_pair("q", query.keyword.trim());
        params.append_pair("hl", "en"); // Force English locale for consistent parsing
        params.append_pair("as_sdt", AS_SDT);
        if let Some(year) = query.start_year {
            params.append_pair("as_ylo", &year.to_string());
        }
        if let Some(year) = query.end_year {
            params.append_pair("as_yhi", &year.to_string());
        }
        if query.sort_by == SortOrder::Date {
            params.append_pair("scisbd", "1");
        }
    }

    Ok(url)
}
