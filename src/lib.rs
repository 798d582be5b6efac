//! # scholardock
//!
//! Google Scholar retrieval pipeline and bulk PDF fetcher - Rust Microservice
//!
//! ## Modules
//!
//! - [`search`] - Paginated search state machine ([`search::perform_search`])
//! - [`fetcher`] - Listing page requests with rotating header profiles
//! - [`challenge`] - CAPTCHA / empty page classification
//! - [`browser`] - Headed Chrome fallback for challenged pages
//! - [`parser`] - Listing HTML to [`article::ArticleRecord`]
//! - [`download`] - Concurrent PDF downloads
//! - [`cookies`] - Cookie persistence
//! - [`config`] - Environment configuration
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use scholardock::{article::SearchQuery, config::ScraperConfig, search};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ScraperConfig::from_env()?;
//!     let outcome = search::perform_search(&SearchQuery::new("machine learning", 20), &config).await?;
//!     println!("Found {} results", outcome.records().len());
//!     Ok(())
//! }
//! ```

pub mod article;
pub mod browser;
pub mod challenge;
pub mod config;
pub mod cookies;
pub mod download;
pub mod error;
pub mod fetcher;
pub mod parser;
pub mod rate_limiter;
pub mod search;

#[cfg(test)]
mod test_support;

pub use error::{Result, ScholarError};
