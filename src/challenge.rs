//! Classification of fetched listing pages.
//!
//! Google Scholar answers automated traffic with a verification page instead
//! of an error status, so every body has to be inspected before it is parsed.

use crate::error::{Result, ScholarError};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

/// What a fetch attempt produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageOutcome {
    /// Listing with at least one result entry
    Results,
    /// Valid listing that explicitly reports no matches
    Empty,
    /// Bot-verification page, or a body that could not be identified
    Challenged,
    /// Network failure, timeout or unexpected status
    TransportError,
}

/// Text fragments the source puts on its verification pages (lowercased)
const CHALLENGE_PHRASES: &[&str] = &[
    "unusual traffic from your computer network",
    "our systems have detected unusual traffic",
    "solving the above captcha",
    "not a robot",
    "please show you're not a robot",
    "/sorry/index",
];

/// Text fragments of a genuine zero-results listing (lowercased)
const NO_RESULTS_PHRASES: &[&str] = &[
    "did not match any articles",
    "did not match any documents",
    "did not match any citations",
    "找不到和您查询的",
];

/// Decides whether a body is a result listing, an empty listing or a challenge.
#[derive(Debug)]
pub struct ChallengeDetector {
    items: Selector,
    container: Selector,
    captcha: Selector,
}

impl ChallengeDetector {
    pub fn new() -> Result<Self> {
        Ok(Self {
            items: compile("div.gs_or, div.gs_r.gs_scl")?,
            container: compile("#gs_res_ccl_mid, #gs_res_ccl, #gs_bdy_ccl")?,
            captcha: compile(
                "#gs_captcha_f, #gs_captcha_ccl, form#captcha-form, #recaptcha, .g-recaptcha, iframe[src*='recaptcha']",
            )?,
        })
    }

    /// Classify a fetched body.
    ///
    /// Result entries win over everything else. Without them, verification
    /// markers mean `Challenged`, an explicit no-match message inside the
    /// normal page structure means `Empty`, and anything else is treated as
    /// `Challenged` so the caller never mistakes a block for "no results".
    pub fn classify(&self, body: &str) -> PageOutcome {
        let document = Html::parse_document(body);

        if document.select(&self.items).next().is_some() {
            return PageOutcome::Results;
        }

        let lowered = body.to_lowercase();
        if document.select(&self.captcha).next().is_some()
            || CHALLENGE_PHRASES.iter().any(|p| lowered.contains(p))
        {
            return PageOutcome::Challenged;
        }

        let has_structure = document.select(&self.container).next().is_some();
        if has_structure && NO_RESULTS_PHRASES.iter().any(|p| lowered.contains(p)) {
            return PageOutcome::Empty;
        }

        PageOutcome::Challenged
    }
}

fn compile(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| ScholarError::Parse(e.to_string()))
}
