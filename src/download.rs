//! Bulk PDF fetcher.
//!
//! A fixed number of workers drain one shared queue. Each task writes its
//! outcome into its own slot, so the report always lines up with the input
//! order and one failing task never disturbs another. Files are staged in a
//! temporary file inside the target directory and only renamed into place
//! once complete.

use crate::config::ScraperConfig;
use crate::error::{Result, ScholarError};
use crate::parser::arxiv_pdf_url;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const ACCEPT_PDF: &str = "application/pdf,application/octet-stream,*/*";
const PDF_MAGIC: &[u8] = b"%PDF";
/// Byte budget for the name stem; leaves room for `_NNNN.pdf` under the
/// common 255-byte file name limit
const MAX_FILENAME_BYTES: usize = 200;
const MAX_NAME_SUFFIX: usize = 10_000;

/// One article to fetch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadTask {
    pub title: String,
    pub url: String,
}

impl DownloadTask {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
        }
    }
}

/// Per-task report entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadOutcome {
    pub title: String,
    pub url: String,
    pub filepath: Option<PathBuf>,
    pub succeeded: bool,
    pub error: Option<String>,
}

impl DownloadOutcome {
    fn saved(task: &DownloadTask, path: PathBuf) -> Self {
        Self {
            title: task.title.clone(),
            url: task.url.clone(),
            filepath: Some(path),
            succeeded: true,
            error: None,
        }
    }

    fn failed(task: &DownloadTask, error: impl Into<String>) -> Self {
        Self {
            title: task.title.clone(),
            url: task.url.clone(),
            filepath: None,
            succeeded: false,
            error: Some(error.into()),
        }
    }
}

struct PoolInner {
    client: reqwest::Client,
    config: ScraperConfig,
    closed: AtomicBool,
}

/// Bounded-concurrency PDF downloader
#[derive(Clone)]
pub struct DownloadPool {
    inner: Arc<PoolInner>,
}

impl DownloadPool {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.download_timeout);
        if let Some(ref proxy_url) = config.proxy {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
                ScholarError::Config(format!("Invalid proxy URL '{}': {}", proxy_url, e))
            })?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| ScholarError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            inner: Arc::new(PoolInner {
                client,
                config: config.clone(),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Stop handing out queued tasks. In-flight downloads run to completion
    /// or to their own timeout; tasks never started are reported as cancelled.
    pub fn shutdown(&self) {
        info!("Download pool shutting down");
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Download every task into `dir`. The result has exactly one entry per
    /// task, in input order.
    pub async fn download_all(&self, tasks: Vec<DownloadTask>, dir: &Path) -> Vec<DownloadOutcome> {
        if tasks.is_empty() {
            return Vec::new();
        }

        let queue: Arc<Mutex<VecDeque<(usize, DownloadTask)>>> =
            Arc::new(Mutex::new(tasks.iter().cloned().enumerate().collect()));
        let slots: Arc<Vec<OnceLock<DownloadOutcome>>> =
            Arc::new((0..tasks.len()).map(|_| OnceLock::new()).collect());
        let dir: Arc<PathBuf> = Arc::new(dir.to_path_buf());
        let workers = self.inner.config.download_concurrency.clamp(1, tasks.len());

        info!(tasks = tasks.len(), workers, dir = %dir.display(), "Starting PDF downloads");

        let mut set = JoinSet::new();
        for worker in 0..workers {
            let inner = Arc::clone(&self.inner);
            let queue = Arc::clone(&queue);
            let slots = Arc::clone(&slots);
            let dir = Arc::clone(&dir);

            set.spawn(async move {
                while !inner.closed.load(Ordering::SeqCst) {
                    let Some((index, task)) = next_task(&queue) else {
                        break;
                    };
                    debug!(worker, index, title = %task.title, "Worker picked task");
                    let outcome = inner.run_task(&task, &dir).await;
                    if slots[index].set(outcome).is_err() {
                        warn!(index, "Outcome slot written twice");
                    }
                }
            });
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Download worker aborted");
            }
        }

        let cancelled = self.is_closed();
        let outcomes: Vec<DownloadOutcome> = tasks
            .iter()
            .zip(slots.iter())
            .map(|(task, slot)| match slot.get() {
                Some(outcome) => outcome.clone(),
                None if cancelled => DownloadOutcome::failed(task, "cancelled before start"),
                None => DownloadOutcome::failed(task, "download worker aborted"),
            })
            .collect();

        let succeeded = outcomes.iter().filter(|o| o.succeeded).count();
        info!(succeeded, total = outcomes.len(), "PDF downloads finished");
        outcomes
    }

    /// Download one task and wait for it.
    pub async fn download_single(&self, title: &str, url: &str, dir: &Path) -> DownloadOutcome {
        let task = DownloadTask::new(title, url);
        if self.is_closed() {
            return DownloadOutcome::failed(&task, "cancelled before start");
        }
        self.inner.run_task(&task, dir).await
    }
}

fn next_task(queue: &Mutex<VecDeque<(usize, DownloadTask)>>) -> Option<(usize, DownloadTask)> {
    match queue.lock() {
        Ok(mut guard) => guard.pop_front(),
        Err(poisoned) => poisoned.into_inner().pop_front(),
    }
}

impl PoolInner {
    async fn run_task(&self, task: &DownloadTask, dir: &Path) -> DownloadOutcome {
        let limit = self.config.download_timeout;
        match tokio::time::timeout(limit, self.fetch_and_store(task, dir)).await {
            Ok(Ok(path)) => {
                info!(title = %task.title, path = %path.display(), "PDF saved");
                DownloadOutcome::saved(task, path)
            }
            Ok(Err(e)) => {
                warn!(title = %task.title, url = %task.url, error = %e, "PDF download failed");
                DownloadOutcome::failed(task, e.to_string())
            }
            Err(_) => {
                warn!(title = %task.title, url = %task.url, "PDF download timed out");
                DownloadOutcome::failed(task, format!("timed out after {}s", limit.as_secs_f64()))
            }
        }
    }

    async fn fetch_and_store(&self, task: &DownloadTask, dir: &Path) -> Result<PathBuf> {
        let candidates = candidate_urls(&task.url);
        if candidates.is_empty() {
            return Err(ScholarError::DownloadRejected("no download URL".to_string()));
        }

        let mut last_error = None;
        for attempt in 0..=self.config.download_retries {
            if attempt > 0 {
                let backoff = self.config.retry_backoff * 2u32.saturating_pow(attempt - 1);
                debug!(title = %task.title, attempt, backoff_ms = backoff.as_millis() as u64, "Retrying download");
                tokio::time::sleep(backoff).await;
            }

            let mut transient = false;
            for url in &candidates {
                match self.fetch_pdf(url).await {
                    Ok(bytes) => return store(dir, &task.title, bytes).await,
                    Err(e) => {
                        debug!(url = %url, error = %e, "Candidate failed");
                        transient |= e.is_retryable();
                        last_error = Some(e);
                    }
                }
            }
            if !transient {
                break;
            }
        }

        Err(last_error.unwrap_or_else(|| ScholarError::DownloadTransport("no attempt made".to_string())))
    }

    /// GET one URL and return the body if it is a PDF within the size cap.
    async fn fetch_pdf(&self, url: &str) -> Result<Vec<u8>> {
        let max_bytes = self.config.download_max_bytes;
        let mut response = self
            .client
            .get(url)
            .header(ACCEPT, ACCEPT_PDF)
            .send()
            .await
            .map_err(|e| ScholarError::DownloadTransport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = format!("HTTP {} from {}", status, url);
            return Err(if is_transient(status) {
                ScholarError::DownloadTransport(message)
            } else {
                ScholarError::DownloadRejected(message)
            });
        }

        if let Some(content_type) = response.headers().get(CONTENT_TYPE) {
            let content_type = content_type.to_str().unwrap_or_default().to_ascii_lowercase();
            if !(content_type.contains("application/pdf") || content_type.contains("application/octet-stream")) {
                return Err(ScholarError::DownloadRejected(format!(
                    "content type is not PDF: {}",
                    content_type
                )));
            }
        }

        if let Some(length) = response.content_length() {
            if length > max_bytes {
                return Err(oversized(max_bytes));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| ScholarError::DownloadTransport(e.to_string()))?
        {
            if (body.len() + chunk.len()) as u64 > max_bytes {
                return Err(oversized(max_bytes));
            }
            body.extend_from_slice(&chunk);
        }

        if !body.starts_with(PDF_MAGIC) {
            return Err(ScholarError::DownloadRejected(
                "response body is not a PDF".to_string(),
            ));
        }
        Ok(body)
    }
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

fn oversized(max_bytes: u64) -> ScholarError {
    ScholarError::DownloadRejected(format!("file exceeds {} bytes", max_bytes))
}

/// URLs to try for one article, most likely PDF first
pub fn candidate_urls(url: &str) -> Vec<String> {
    let url = url.trim();
    if url.is_empty() {
        return Vec::new();
    }
    let mut candidates = Vec::with_capacity(2);
    if let Some(pdf) = publisher_pdf_url(url) {
        candidates.push(pdf);
    }
    candidates.push(url.to_string());
    candidates
}

/// Known publisher landing pages and the URL serving their PDF
fn publisher_pdf_url(url: &str) -> Option<String> {
    if let Some(pdf) = arxiv_pdf_url(url) {
        return Some(pdf);
    }
    if url.contains("ieeexplore.ieee.org/document/") {
        let rewritten = url
            .trim_end_matches('/')
            .replacen("/document/", "/stamp/stamp.jsp?tp=&arnumber=", 1);
        return Some(rewritten);
    }
    if url.contains("dl.acm.org/") && !url.contains('?') {
        return Some(format!("{}?download=true", url));
    }
    None
}

/// Turn an article title into a safe `.pdf` file name.
pub fn sanitize_filename(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.');
    let mut name = truncate_at_char_boundary(trimmed, MAX_FILENAME_BYTES)
        .trim_end()
        .to_string();
    if name.is_empty() {
        name = "untitled".to_string();
    }
    if !name.to_ascii_lowercase().ends_with(".pdf") {
        name.push_str(".pdf");
    }
    name
}

/// Longest prefix of `s` that fits in `max_bytes` without splitting a character
fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

async fn store(dir: &Path, title: &str, bytes: Vec<u8>) -> Result<PathBuf> {
    let dir = dir.to_path_buf();
    let file_name = sanitize_filename(title);
    tokio::task::spawn_blocking(move || write_atomically(&dir, &file_name, &bytes))
        .await
        .map_err(|e| ScholarError::Io(std::io::Error::other(e)))?
}

/// Stage the bytes in a temp file next to the destination, then rename it to
/// the first free name among `name.pdf`, `name_1.pdf`, `name_2.pdf`, ...
/// The temp file is removed on every failure path when it is dropped.
fn write_atomically(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let mut staged = tempfile::Builder::new()
        .prefix(".scholardock-")
        .suffix(".part")
        .tempfile_in(dir)?;
    staged.write_all(bytes)?;
    staged.as_file().sync_all()?;

    let stem = file_name
        .strip_suffix(".pdf")
        .or_else(|| file_name.strip_suffix(".PDF"))
        .unwrap_or(file_name);

    for n in 0..MAX_NAME_SUFFIX {
        let target = if n == 0 {
            dir.join(file_name)
        } else {
            dir.join(format!("{}_{}.pdf", stem, n))
        };
        match staged.persist_noclobber(&target) {
            Ok(_) => return Ok(target),
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => staged = e.file,
            Err(e) => return Err(e.error.into()),
        }
    }

    Err(ScholarError::Io(std::io::Error::new(
        ErrorKind::AlreadyExists,
        format!("no free file name for {}", file_name),
    )))
}

/// Download many `(title, url)` pairs with a fresh pool.
pub async fn download_many(
    items: Vec<(String, String)>,
    download_dir: Option<PathBuf>,
    config: &ScraperConfig,
) -> Result<Vec<DownloadOutcome>> {
    let dir = config.resolve_download_dir(download_dir);
    let tasks = items
        .into_iter()
        .map(|(title, url)| DownloadTask::new(title, url))
        .collect();
    Ok(DownloadPool::new(config)?.download_all(tasks, &dir).await)
}

/// Download one article with a fresh pool.
pub async fn download_one(
    title: &str,
    url: &str,
    download_dir: Option<PathBuf>,
    config: &ScraperConfig,
) -> Result<DownloadOutcome> {
    let dir = config.resolve_download_dir(download_dir);
    Ok(DownloadPool::new(config)?.download_single(title, url, &dir).await)
}
