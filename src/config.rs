//! Runtime configuration for the retrieval pipeline and the PDF fetcher.
//!
//! Options are read from the process environment using their bare names
//! (`REQUEST_DELAY`, `MAX_RETRIES`, ...). Anything unset falls back to
//! [`ScraperConfig::default`]; anything set but malformed is a config error.

use crate::error::{Result, ScholarError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default Google Scholar URL
pub const DEFAULT_SCHOLAR_URL: &str = "https://scholar.google.com";

/// Name of the folder created under the user's download directory
const DEFAULT_DOWNLOAD_FOLDER: &str = "ScholarDock_PDFs";

/// Configuration consumed by the search orchestrator and the download pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Minimum spacing between listing requests
    pub request_delay: Duration,
    /// Upper bound of the random offset added to `request_delay`
    pub request_jitter: Duration,
    /// Retries per listing page after the first attempt
    pub max_retries: u32,
    /// First backoff step; doubles on each retry
    pub retry_backoff: Duration,
    /// Escalate challenged pages to a human-driven browser session
    pub use_browser_fallback: bool,
    /// Number of concurrent download workers
    pub download_concurrency: usize,
    /// Largest accepted PDF body
    pub download_max_bytes: u64,
    /// Retries per download task after the first attempt
    pub download_retries: u32,
    /// Per-request timeout for listing and PDF requests
    pub request_timeout: Duration,
    /// Hard limit for one download task, retries included
    pub download_timeout: Duration,
    /// Hard limit for one browser fallback session
    pub captcha_timeout: Duration,
    /// How often the live browser DOM is polled during a fallback session
    pub captcha_poll_interval: Duration,
    /// Remote Chrome DevTools URL (e.g., "http://localhost:9222").
    /// If set, the fallback attaches to that browser instead of launching one.
    pub chrome_remote_url: Option<String>,
    /// Chrome/Chromium executable; auto-detected when unset
    pub chrome_path: Option<PathBuf>,
    /// Search source base URL (mirror sites allowed)
    pub base_url: String,
    /// Proxy URL (e.g., "http://127.0.0.1:7890")
    pub proxy: Option<String>,
    /// Directory PDFs go to when the caller does not supply one
    pub download_dir: Option<PathBuf>,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            request_delay: Duration::from_secs(2),
            request_jitter: Duration::from_secs(1),
            max_retries: 3,
            retry_backoff: Duration::from_secs(1),
            use_browser_fallback: false,
            download_concurrency: 3,
            download_max_bytes: 50 * 1024 * 1024,
            download_retries: 2,
            request_timeout: Duration::from_secs(30),
            download_timeout: Duration::from_secs(120),
            captcha_timeout: Duration::from_secs(180),
            captcha_poll_interval: Duration::from_secs(2),
            chrome_remote_url: None,
            chrome_path: None,
            base_url: DEFAULT_SCHOLAR_URL.to_string(),
            proxy: None,
            download_dir: None,
        }
    }
}

impl ScraperConfig {
    /// Build a configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ScholarError::Config` if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            request_delay: seconds(get("REQUEST_DELAY"), "REQUEST_DELAY", defaults.request_delay)?,
            request_jitter: seconds(get("REQUEST_JITTER"), "REQUEST_JITTER", defaults.request_jitter)?,
            max_retries: parsed(get("MAX_RETRIES"), "MAX_RETRIES", defaults.max_retries)?,
            retry_backoff: seconds(get("RETRY_BACKOFF"), "RETRY_BACKOFF", defaults.retry_backoff)?,
            use_browser_fallback: flag(
                get("USE_BROWSER_FALLBACK"),
                "USE_BROWSER_FALLBACK",
                defaults.use_browser_fallback,
            )?,
            download_concurrency: parsed(
                get("DOWNLOAD_CONCURRENCY"),
                "DOWNLOAD_CONCURRENCY",
                defaults.download_concurrency,
            )?,
            download_max_bytes: parsed(
                get("DOWNLOAD_MAX_BYTES"),
                "DOWNLOAD_MAX_BYTES",
                defaults.download_max_bytes,
            )?,
            download_retries: parsed(
                get("DOWNLOAD_RETRIES"),
                "DOWNLOAD_RETRIES",
                defaults.download_retries,
            )?,
            request_timeout: seconds(
                get("REQUEST_TIMEOUT"),
                "REQUEST_TIMEOUT",
                defaults.request_timeout,
            )?,
            download_timeout: seconds(
                get("DOWNLOAD_TIMEOUT"),
                "DOWNLOAD_TIMEOUT",
                defaults.download_timeout,
            )?,
            captcha_timeout: seconds(
                get("CAPTCHA_TIMEOUT"),
                "CAPTCHA_TIMEOUT",
                defaults.captcha_timeout,
            )?,
            captcha_poll_interval: seconds(
                get("CAPTCHA_POLL_INTERVAL"),
                "CAPTCHA_POLL_INTERVAL",
                defaults.captcha_poll_interval,
            )?,
            chrome_remote_url: get("CHROME_REMOTE_URL"),
            chrome_path: get("CHROME_PATH").map(PathBuf::from),
            base_url: get("SCHOLAR_BASE_URL").unwrap_or(defaults.base_url),
            proxy: get("SCHOLAR_PROXY"),
            download_dir: get("DOWNLOAD_DIR").map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.download_concurrency == 0 {
            return Err(ScholarError::Config(
                "DOWNLOAD_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if self.download_max_bytes == 0 {
            return Err(ScholarError::Config(
                "DOWNLOAD_MAX_BYTES must be positive".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ScholarError::Config(
                "REQUEST_TIMEOUT must be positive".to_string(),
            ));
        }
        url::Url::parse(&self.base_url).map_err(|e| {
            ScholarError::Config(format!("Invalid base URL '{}': {}", self.base_url, e))
        })?;
        Ok(())
    }

    /// Directory used when a download request names none.
    pub fn resolve_download_dir(&self, requested: Option<PathBuf>) -> PathBuf {
        if let Some(dir) = requested.or_else(|| self.download_dir.clone()) {
            return dir;
        }
        dirs::download_dir()
            .or_else(|| dirs::home_dir().map(|h| h.join("Downloads")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_DOWNLOAD_FOLDER)
    }
}

fn parsed<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse()
            .map_err(|e| ScholarError::Config(format!("Invalid {} '{}': {}", key, v, e))),
    }
}

fn seconds(raw: Option<String>, key: &str, default: Duration) -> Result<Duration> {
    let Some(v) = raw else {
        return Ok(default);
    };
    let secs: f64 = parsed(Some(v.clone()), key, 0.0)?;
    Duration::try_from_secs_f64(secs)
        .map_err(|e| ScholarError::Config(format!("Invalid {} '{}': {}", key, v, e)))
}

fn flag(raw: Option<String>, key: &str, default: bool) -> Result<bool> {
    match raw.as_deref().map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ScholarError::Config(format!("Invalid {} '{}'", key, v))),
        },
    }
}
