//! scholardock - Google Scholar retrieval pipeline and bulk PDF fetcher
//!
//! ## Usage
//!
//! ### CLI Mode
//! ```bash
//! scholardock search "graph neural networks" --num-results 20 --start-year 2020
//! scholardock download --title "Attention Is All You Need" --url https://arxiv.org/abs/1706.03762
//! ```
//!
//! ### HTTP Server Mode
//! ```bash
//! scholardock serve --port 8001
//! ```

use anyhow::{bail, Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Local;
use clap::{Parser, Subcommand};
use scholardock::{
    article::{ArticleRecord, SearchQuery, SortOrder},
    config::ScraperConfig,
    cookies::CookieManager,
    download::{self, DownloadOutcome, DownloadTask},
    search::{self, SearchOutcome},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Google Scholar retrieval pipeline and bulk PDF fetcher
#[derive(Parser)]
#[command(name = "scholardock")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search Google Scholar and export the results
    Search {
        /// Search keywords
        keyword: String,

        /// Number of results to collect (1-1000)
        #[arg(short = 'n', long, default_value = "50")]
        num_results: usize,

        /// Only results published in or after this year
        #[arg(long)]
        start_year: Option<i32>,

        /// Only results published in or before this year
        #[arg(long)]
        end_year: Option<i32>,

        /// Result order: relevance or date
        #[arg(long, default_value = "relevance")]
        sort: SortOrder,

        /// Open a browser window when a CAPTCHA is served
        #[arg(long)]
        browser_fallback: bool,

        /// Proxy URL (e.g., http://127.0.0.1:7890)
        #[arg(long)]
        proxy: Option<String>,

        /// Mirror site URL
        #[arg(long)]
        mirror: Option<String>,

        /// Output directory
        #[arg(short, long, default_value = "./output")]
        output: PathBuf,
    },

    /// Download PDFs
    Download {
        /// Article title (single download)
        #[arg(long, requires = "url", conflicts_with = "input")]
        title: Option<String>,

        /// Article or PDF URL (single download)
        #[arg(long, requires = "title")]
        url: Option<String>,

        /// JSON file with [{"title": ..., "url": ...}] or a results.json export
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Target directory (default: ~/Downloads/ScholarDock_PDFs)
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Run as HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8001")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Manage cookies
    Cookies {
        #[command(subcommand)]
        action: CookieAction,
    },
}

#[derive(Subcommand)]
enum CookieAction {
    /// Clear stored cookies
    Clear,
    /// Show cookie file path
    Path,
    /// Import cookies from a JSON export (Playwright / browser extension format)
    Import {
        /// JSON file to import
        file: PathBuf,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if cli.log_json {
        fmt().json().with_env_filter(filter).with_target(true).init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .init();
    }

    let config = ScraperConfig::from_env().context("Invalid configuration")?;

    match cli.command {
        Commands::Search {
            keyword,
            num_results,
            start_year,
            end_year,
            sort,
            browser_fallback,
            proxy,
            mirror,
            output,
        } => {
            let mut config = config;
            if browser_fallback {
                config.use_browser_fallback = true;
            }
            if proxy.is_some() {
                config.proxy = proxy;
            }
            if let Some(mirror) = mirror {
                config.base_url = mirror.trim_end_matches('/').to_string();
            }
            let query = SearchQuery {
                keyword,
                num_results,
                start_year,
                end_year,
                sort_by: sort,
            };
            run_search(query, &config, &output).await
        }
        Commands::Download {
            title,
            url,
            input,
            dir,
        } => run_download(title, url, input, dir, &config).await,
        Commands::Serve { port, host } => run_server(host, port, config).await,
        Commands::Cookies { action } => handle_cookies(action),
    }
}

// ============================================================================
// Search
// ============================================================================

async fn run_search(query: SearchQuery, config: &ScraperConfig, output_dir: &Path) -> Result<()> {
    println!("\n=== Google Scholar Search ===");
    println!("Keyword: {}", query.keyword);
    println!("Results wanted: {}", query.num_results);
    if query.start_year.is_some() || query.end_year.is_some() {
        println!(
            "Years: {} - {}",
            query.start_year.map(|y| y.to_string()).unwrap_or_default(),
            query.end_year.map(|y| y.to_string()).unwrap_or_default()
        );
    }

    let outcome = search::perform_search(&query, config)
        .await
        .context("Search could not start")?;

    let results = match outcome {
        SearchOutcome::Done(results) => results,
        SearchOutcome::Failed(failure) => {
            bail!(
                "Search failed after {} page request(s): {}",
                failure.pages_fetched,
                failure.reason
            );
        }
    };

    println!(
        "Collected {} results (about {} reported){}",
        results.records.len(),
        results.total_found,
        if results.truncated { ", stopped early" } else { "" }
    );

    // Create output folder
    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let safe_keyword: String = query
        .keyword
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-' || *c == '_')
        .collect::<String>()
        .trim()
        .replace(' ', "_");
    let output_folder = output_dir.join(format!("{}_{}", timestamp, safe_keyword));
    std::fs::create_dir_all(&output_folder).context("Failed to create output directory")?;

    save_csv(&output_folder.join("results.csv"), &results.records)?;

    let json_path = output_folder.join("results.json");
    let json = serde_json::to_string_pretty(&results).context("Failed to serialize results")?;
    std::fs::write(&json_path, json).context("Failed to write results.json")?;
    println!("Saved: {:?}", json_path);

    Ok(())
}

/// Save data to CSV file
fn save_csv<T: Serialize>(path: &Path, data: &[T]) -> Result<()> {
    if data.is_empty() {
        println!("No data to save to {:?}", path);
        return Ok(());
    }

    let mut wtr = csv::WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .context("Failed to create CSV writer")?;

    for item in data {
        wtr.serialize(item).context("Failed to write CSV record")?;
    }

    wtr.flush().context("Failed to flush CSV")?;
    println!("Saved: {:?}", path);
    Ok(())
}

// ============================================================================
// Downloads
// ============================================================================

/// Either a plain task list or a `results.json` written by `search`
#[derive(Deserialize)]
#[serde(untagged)]
enum DownloadInput {
    Tasks(Vec<DownloadTask>),
    Results { records: Vec<ArticleRecord> },
}

fn load_download_tasks(path: &Path) -> Result<Vec<(String, String)>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let input: DownloadInput =
        serde_json::from_str(&raw).with_context(|| format!("Unrecognized download list in {:?}", path))?;

    Ok(match input {
        DownloadInput::Tasks(tasks) => tasks.into_iter().map(|t| (t.title, t.url)).collect(),
        DownloadInput::Results { records } => records
            .into_iter()
            .filter_map(|r| {
                let url = r.pdf_url.or(r.source_url)?;
                Some((r.title, url))
            })
            .collect(),
    })
}

async fn run_download(
    title: Option<String>,
    url: Option<String>,
    input: Option<PathBuf>,
    dir: Option<PathBuf>,
    config: &ScraperConfig,
) -> Result<()> {
    let outcomes = match (title, url, input) {
        (Some(title), Some(url), None) => vec![download::download_one(&title, &url, dir, config).await?],
        (None, None, Some(path)) => {
            let items = load_download_tasks(&path)?;
            println!("Downloading {} PDFs...", items.len());
            download::download_many(items, dir, config).await?
        }
        _ => bail!("Pass either --title with --url, or --input"),
    };

    let succeeded = outcomes.iter().filter(|o| o.succeeded).count();
    for outcome in &outcomes {
        match (&outcome.filepath, &outcome.error) {
            (Some(path), _) => println!("  OK   {} -> {:?}", outcome.title, path),
            (None, Some(err)) => println!("  FAIL {} ({})", outcome.title, err),
            (None, None) => println!("  FAIL {}", outcome.title),
        }
    }
    println!("Downloaded {}/{} files", succeeded, outcomes.len());
    Ok(())
}

// ============================================================================
// HTTP Server
// ============================================================================

async fn run_server(host: String, port: u16, config: ScraperConfig) -> Result<()> {
    info!(host = %host, port = port, "Starting HTTP server");
    println!("Starting server at http://{}:{}", host, port);

    let app_state = Arc::new(AppState { config });

    let app = Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/search", post(search_handler))
        .route("/api/download-pdf", post(download_pdf_handler))
        .route("/api/download-single-pdf", post(download_single_pdf_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .context("Invalid host:port")?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}

struct AppState {
    config: ScraperConfig,
}

/// Health check endpoint
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    detail: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, detail: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse { detail: detail.into() }))
}

/// Search endpoint handler
///
/// Invalid queries are 400; a search that obtained nothing is 502.
async fn search_handler(
    State(state): State<Arc<AppState>>,
    Json(query): Json<SearchQuery>,
) -> Result<Json<search::SearchResults>, ApiError> {
    info!(keyword = %query.keyword, num_results = query.num_results, "Search request");

    match search::perform_search(&query, &state.config).await {
        Ok(SearchOutcome::Done(results)) => Ok(Json(results)),
        Ok(SearchOutcome::Failed(failure)) => {
            warn!(reason = %failure.reason, "Search failed");
            Err(api_error(StatusCode::BAD_GATEWAY, failure.reason))
        }
        Err(e @ scholardock::ScholarError::InvalidQuery(_)) => {
            Err(api_error(StatusCode::BAD_REQUEST, e.to_string()))
        }
        Err(e) => {
            error!(error = %e, "Search could not start");
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

#[derive(Debug, Deserialize)]
struct DownloadRequest {
    articles: Vec<DownloadTask>,
    download_path: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct DownloadResponse {
    success: bool,
    message: String,
    results: Vec<DownloadOutcome>,
}

/// Bulk PDF download endpoint
async fn download_pdf_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DownloadRequest>,
) -> Result<Json<DownloadResponse>, ApiError> {
    info!(articles = req.articles.len(), "PDF download request");

    let items = req.articles.into_iter().map(|a| (a.title, a.url)).collect();
    let results = download::download_many(items, req.download_path, &state.config)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let succeeded = results.iter().filter(|o| o.succeeded).count();
    Ok(Json(DownloadResponse {
        success: true,
        message: format!(
            "Download completed: {}/{} files downloaded successfully",
            succeeded,
            results.len()
        ),
        results,
    }))
}

#[derive(Debug, Deserialize)]
struct SingleDownloadParams {
    title: String,
    url: String,
    download_path: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct SingleDownloadResponse {
    success: bool,
    message: String,
    filepath: Option<PathBuf>,
}

/// Single PDF download endpoint (query parameters: title, url, download_path)
async fn download_single_pdf_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SingleDownloadParams>,
) -> Result<Json<SingleDownloadResponse>, ApiError> {
    info!(title = %params.title, "Single PDF download request");

    let outcome = download::download_one(&params.title, &params.url, params.download_path, &state.config)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let message = if outcome.succeeded {
        "PDF downloaded successfully".to_string()
    } else {
        format!(
            "Failed to download PDF: {}",
            outcome.error.as_deref().unwrap_or("file may not be available")
        )
    };

    Ok(Json(SingleDownloadResponse {
        success: outcome.succeeded,
        message,
        filepath: outcome.filepath,
    }))
}

// ============================================================================
// Cookie Management
// ============================================================================

fn handle_cookies(action: CookieAction) -> Result<()> {
    let manager = CookieManager::new()?;

    match action {
        CookieAction::Clear => {
            manager.clear()?;
            println!("Cookies cleared.");
        }
        CookieAction::Path => {
            println!("Cookie file: {:?}", manager.path());
        }
        CookieAction::Import { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {:?}", file))?;
            let count = manager
                .import_json(&raw)
                .context("Cookie file must be a JSON array of {name, value, domain} objects")?;
            println!("Successfully saved {} cookies to {:?}", count, manager.path());
        }
    }

    Ok(())
}
