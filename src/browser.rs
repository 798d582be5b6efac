//! Human-in-the-loop escape hatch for challenged pages.
//!
//! When the source serves a verification page, a visible Chrome window is
//! opened on the same URL over the DevTools protocol (chromiumoxide). The
//! operator solves the challenge in that window while the live DOM is polled;
//! as soon as a results listing (or a genuine empty listing) shows up, the
//! rendered HTML is handed back for parsing. A hard timeout bounds the wait.

use crate::challenge::{ChallengeDetector, PageOutcome};
use crate::config::ScraperConfig;
use crate::error::{OptionExt, Result, ScholarError};
use crate::fetcher::PageState;
use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Any slow, blocking strategy able to turn a challenged URL into a usable page.
#[async_trait]
pub trait ChallengeResolver: Send + Sync {
    /// Try to obtain the page behind a challenge.
    ///
    /// Returns the rendered body classified again, or a `TransportError`
    /// state when the strategy timed out or failed.
    async fn resolve(&self, url: &str) -> PageState;
}

/// Chrome switches that keep the automation banner and flags out of sight
const CHROME_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-sync",
];

/// A running or attached browser plus the task pumping its CDP events
struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
    launched: bool,
}

impl BrowserSession {
    async fn shutdown(mut self) {
        // Attached browsers belong to the user and stay open
        if self.launched {
            if let Err(e) = self.browser.close().await {
                debug!(error = %e, "Failed to close browser");
            }
        }
        self.handler.abort();
    }
}

/// Drives a visible Chrome window through chromiumoxide
pub struct BrowserFallback {
    client: reqwest::Client,
    remote_url: Option<String>,
    chrome_path: Option<PathBuf>,
    proxy: Option<String>,
    timeout: Duration,
    poll_interval: Duration,
    detector: ChallengeDetector,
}

impl BrowserFallback {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ScholarError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            remote_url: config.chrome_remote_url.clone(),
            chrome_path: config.chrome_path.clone(),
            proxy: config.proxy.clone(),
            timeout: config.captcha_timeout,
            poll_interval: config.captcha_poll_interval,
            detector: ChallengeDetector::new()?,
        })
    }

    /// Launch a headed browser, or attach to the configured remote one.
    async fn open(&self) -> Result<BrowserSession> {
        let (browser, mut handler, launched) = match self.remote_url {
            Some(ref remote) => {
                let ws_url = self.debugger_ws_url(remote).await?;
                info!(ws_url = %ws_url, "Connecting to remote browser");
                let (browser, handler) = Browser::connect(ws_url)
                    .await
                    .map_err(|e| ScholarError::Browser(format!("Failed to connect to browser: {}", e)))?;
                (browser, handler, false)
            }
            None => {
                let mut builder = BrowserConfig::builder().with_head();
                if let Some(ref path) = self.chrome_path {
                    builder = builder.chrome_executable(path);
                }
                if let Some(ref proxy) = self.proxy {
                    builder = builder.arg(format!("--proxy-server={}", proxy));
                }
                for arg in CHROME_ARGS {
                    builder = builder.arg(*arg);
                }
                let config = builder
                    .build()
                    .map_err(|e| ScholarError::Browser(format!("Failed to build browser config: {}", e)))?;

                info!("Launching browser window");
                let (browser, handler) = Browser::launch(config)
                    .await
                    .map_err(|e| ScholarError::Browser(format!("Failed to launch browser: {}", e)))?;
                (browser, handler, true)
            }
        };

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(BrowserSession {
            browser,
            handler,
            launched,
        })
    }

    /// WebSocket debugger URL for a remote browser. `ws://` URLs are used as
    /// given; HTTP endpoints are asked through `/json/version`.
    async fn debugger_ws_url(&self, remote: &str) -> Result<String> {
        if remote.starts_with("ws://") || remote.starts_with("wss://") {
            return Ok(remote.to_string());
        }

        let version_url = format!("{}/json/version", remote.trim_end_matches('/'));
        let info: serde_json::Value = self
            .client
            .get(&version_url)
            .send()
            .await
            .map_err(|e| ScholarError::Browser(format!("Failed to reach remote browser: {}", e)))?
            .json()
            .await
            .map_err(|e| ScholarError::Browser(format!("Failed to parse browser version info: {}", e)))?;

        info.get("webSocketDebuggerUrl")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_parse("No webSocketDebuggerUrl in browser version info")
    }

    /// Navigate and poll until the DOM holds a usable page or time runs out.
    async fn wait_for_results(&self, page: &Page, url: &str) -> Result<(String, PageOutcome)> {
        let deadline = Instant::now() + self.timeout;

        match tokio::time::timeout(self.timeout, page.goto(url)).await {
            Ok(Ok(_)) => {}
            // A challenge page may never finish loading; keep polling anyway
            Ok(Err(e)) => debug!(error = %e, "Navigation did not complete cleanly"),
            Err(_) => return Err(self.not_cleared()),
        }

        let mut announced = false;
        loop {
            match page.content().await {
                Ok(html) => {
                    let outcome = self.detector.classify(&html);
                    if matches!(outcome, PageOutcome::Results | PageOutcome::Empty) {
                        return Ok((html, outcome));
                    }
                    if !announced {
                        warn!("CAPTCHA detected! Solve it in the opened browser window; polling continues.");
                        announced = true;
                    }
                }
                // The DOM can be unavailable mid-navigation
                Err(e) => debug!(error = %e, "Page content not available yet"),
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(self.not_cleared());
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn not_cleared(&self) -> ScholarError {
        ScholarError::AccessChallenged(format!(
            "challenge not cleared within {}s",
            self.timeout.as_secs()
        ))
    }
}

#[async_trait]
impl ChallengeResolver for BrowserFallback {
    async fn resolve(&self, url: &str) -> PageState {
        info!(url, timeout_secs = self.timeout.as_secs(), "Escalating to browser fallback");

        let session = match self.open().await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Could not open browser");
                return PageState::transport_error(url, None, e.to_string());
            }
        };

        let result = match session.browser.new_page("about:blank").await {
            Ok(page) => {
                let result = self.wait_for_results(&page, url).await;
                // Close the tab to prevent accumulation in attached browsers
                if let Err(e) = page.close().await {
                    debug!(error = %e, "Failed to close browser tab");
                }
                result
            }
            Err(e) => Err(ScholarError::Browser(format!("Failed to open tab: {}", e))),
        };
        session.shutdown().await;

        match result {
            Ok((body, outcome)) => {
                info!(url, outcome = ?outcome, "Browser fallback recovered the page");
                PageState {
                    url: url.to_string(),
                    status: None,
                    body,
                    outcome,
                    error: None,
                }
            }
            Err(e) => {
                warn!(url, error = %e, "Browser fallback gave up");
                PageState::transport_error(url, None, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn fallback_with(remote_url: Option<String>, chrome_path: Option<PathBuf>) -> BrowserFallback {
        let config = ScraperConfig {
            chrome_remote_url: remote_url,
            chrome_path,
            captcha_timeout: Duration::from_secs(1),
            captcha_poll_interval: Duration::from_millis(20),
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        BrowserFallback::new(&config).expect("fallback builds")
    }

    #[tokio::test]
    async fn test_debugger_url_from_version_endpoint() {
        let mut server = Server::new_async().await;
        let version = server
            .mock("GET", "/json/version")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"Browser":"Chrome/131.0","webSocketDebuggerUrl":"ws://127.0.0.1:9222/devtools/browser/abc"}"#)
            .create_async()
            .await;

        let fallback = fallback_with(Some(server.url()), None);
        let ws_url = fallback
            .debugger_ws_url(&format!("{}/", server.url()))
            .await
            .expect("version info parsed");

        version.assert_async().await;
        assert_eq!(ws_url, "ws://127.0.0.1:9222/devtools/browser/abc");
    }

    #[tokio::test]
    async fn test_websocket_url_used_as_given() {
        let fallback = fallback_with(None, None);
        let ws_url = fallback
            .debugger_ws_url("ws://localhost:9222/devtools/browser/xyz")
            .await
            .expect("no lookup needed");
        assert_eq!(ws_url, "ws://localhost:9222/devtools/browser/xyz");
    }

    #[tokio::test]
    async fn test_version_info_without_debugger_url_is_error() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/json/version")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"Browser":"Chrome/131.0"}"#)
            .create_async()
            .await;

        let fallback = fallback_with(Some(server.url()), None);
        let err = fallback.debugger_ws_url(&server.url()).await.err();
        assert!(matches!(err, Some(ScholarError::Parse(_))));
    }

    #[tokio::test]
    async fn test_unreachable_remote_browser_is_transport_error() {
        let fallback = fallback_with(Some("http://127.0.0.1:9".to_string()), None);
        let page = fallback.resolve("https://scholar.example/scholar?q=x").await;
        assert_eq!(page.outcome, PageOutcome::TransportError);
        assert!(page.error.unwrap_or_default().contains("remote browser"));
    }

    #[tokio::test]
    async fn test_missing_chrome_binary_is_transport_error() {
        let fallback = fallback_with(None, Some(PathBuf::from("/nonexistent/chrome")));
        let page = fallback.resolve("https://scholar.example/scholar?q=x").await;
        assert_eq!(page.outcome, PageOutcome::TransportError);
        assert!(page.body.is_empty());
    }
}
