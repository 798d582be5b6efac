//! Session cookies for listing requests.
//!
//! Cookies exported from a browser session that already passed the source's
//! verification make plain HTTP requests far less likely to be challenged.
//! They are stored as JSON in Playwright's cookie format.

use crate::error::{Result, ScholarError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default cookie file path: `~/.scholardock_cookies.json`
fn default_cookie_path() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|p| p.join(".scholardock_cookies.json"))
        .ok_or_else(|| ScholarError::Config("Cannot determine home directory".to_string()))
}

/// Cookie entry matching Playwright's cookie format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, alias = "httpOnly")]
    pub http_only: bool,
    #[serde(default)]
    pub expires: Option<f64>,
}

impl Cookie {
    /// Whether the cookie applies to `host` (domain-suffix match).
    fn matches_host(&self, host: &str) -> bool {
        let domain = self.domain.trim_start_matches('.');
        !domain.is_empty() && (host == domain || host.ends_with(&format!(".{}", domain)))
    }

    /// Expired cookies are left out of request headers.
    fn is_expired(&self, now_unix: f64) -> bool {
        // Playwright writes -1 for session cookies
        matches!(self.expires, Some(exp) if exp > 0.0 && exp < now_unix)
    }
}

/// Loads, saves and imports the cookie file
#[derive(Debug, Clone)]
pub struct CookieManager {
    path: PathBuf,
}

impl CookieManager {
    /// Create a new CookieManager with default path
    pub fn new() -> Result<Self> {
        Ok(Self {
            path: default_cookie_path()?,
        })
    }

    /// Create a new CookieManager with custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// Get the cookie file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load cookies from file
    ///
    /// Returns empty vec if file doesn't exist or is invalid
    pub fn load(&self) -> Vec<Cookie> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "Cookie file not found");
            return Vec::new();
        }

        match std::fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str::<Vec<Cookie>>(&content) {
                Ok(cookies) => {
                    info!(count = cookies.len(), path = %self.path.display(), "Loaded cookies");
                    cookies
                }
                Err(e) => {
                    warn!("Failed to parse cookies: {}", e);
                    Vec::new()
                }
            },
            Err(e) => {
                warn!("Failed to read cookie file: {}", e);
                Vec::new()
            }
        }
    }

    /// Build a `Cookie` header value for requests to `host`.
    ///
    /// Returns `None` when no stored cookie applies.
    pub fn header_for(&self, host: &str) -> Option<String> {
        build_cookie_header(&self.load(), host, chrono::Utc::now().timestamp() as f64)
    }

    /// Save cookies to file
    pub fn save(&self, cookies: &[Cookie]) -> Result<()> {
        let content = serde_json::to_string_pretty(cookies)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, content)?;
        info!(count = cookies.len(), path = %self.path.display(), "Saved cookies");
        Ok(())
    }

    /// Parse a JSON cookie export and store it, replacing the current file.
    ///
    /// Returns the number of cookies imported.
    pub fn import_json(&self, json: &str) -> Result<usize> {
        let cookies: Vec<Cookie> = serde_json::from_str(json)?;
        self.save(&cookies)?;
        Ok(cookies.len())
    }

    /// Clear stored cookies
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
            info!(path = %self.path.display(), "Cleared cookies");
        }
        Ok(())
    }
}

impl Default for CookieManager {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self {
            path: PathBuf::from(".scholardock_cookies.json"),
        })
    }
}

/// Join the cookies applicable to `host` into a header value
fn build_cookie_header(cookies: &[Cookie], host: &str, now_unix: f64) -> Option<String> {
    let header = cookies
        .iter()
        .filter(|c| c.matches_host(host) && !c.is_expired(now_unix))
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ");

    if header.is_empty() {
        None
    } else {
        Some(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn cookie(name: &str, domain: &str, expires: Option<f64>) -> Cookie {
        Cookie {
            name: name.to_string(),
            value: format!("{}-value", name),
            domain: domain.to_string(),
            path: "/".to_string(),
            secure: true,
            http_only: false,
            expires,
        }
    }

    #[test]
    fn test_load_empty() {
        let manager = CookieManager::with_path(PathBuf::from("/nonexistent/path"));
        assert!(manager.load().is_empty());
        assert!(manager.header_for("scholar.google.com").is_none());
    }

    #[test]
    fn test_import_and_load() -> Result<()> {
        let temp = NamedTempFile::new()?;
        let manager = CookieManager::with_path(temp.path().to_path_buf());

        let imported = manager.import_json(
            r#"[{"name":"NID","value":"abc","domain":".google.com","httpOnly":true}]"#,
        )?;
        assert_eq!(imported, 1);

        let loaded = manager.load();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "NID");
        assert!(loaded[0].http_only);
        Ok(())
    }

    #[test]
    fn test_header_filters_domain_and_expiry() {
        let cookies = vec![
            cookie("NID", ".google.com", None),
            cookie("GSP", "scholar.google.com", Some(-1.0)),
            cookie("OLD", ".google.com", Some(100.0)),
            cookie("OTHER", ".example.com", None),
        ];
        let header = build_cookie_header(&cookies, "scholar.google.com", 1_000.0);
        assert_eq!(
            header.as_deref(),
            Some("NID=NID-value; GSP=GSP-value")
        );
        assert!(build_cookie_header(&cookies, "google.com.evil.net", 1_000.0).is_none());
    }

    #[test]
    fn test_clear_removes_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let manager = CookieManager::with_path(dir.path().join("cookies.json"));
        manager.save(&[cookie("NID", ".google.com", None)])?;
        assert!(manager.path().exists());
        manager.clear()?;
        assert!(!manager.path().exists());
        Ok(())
    }
}
