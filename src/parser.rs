//! Google Scholar listing parser.
//!
//! Each field of an entry is pulled out by its own extractor. An extractor
//! that finds nothing leaves its field absent; only a missing title drops the
//! entry, and that is logged as a parse anomaly rather than failing the page.
//!
//! Bylines are split with a positional heuristic (authors, then venue and
//! year, then publisher). Non-standard bylines can end up with those three
//! fields mixed up; that is accepted.

use crate::article::{citations_per_year, ArticleRecord};
use crate::config::DEFAULT_SCHOLAR_URL;
use crate::error::{Result, ScholarError};
use chrono::Datelike;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

/// Everything extracted from one listing page
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPage {
    /// Entries in the source's ranking order
    pub records: Vec<ArticleRecord>,
    /// A "next page" control is present
    pub has_next_page: bool,
    /// The source's "About N results" estimate
    pub total_estimate: Option<u64>,
}

/// Fields carried by the byline under each title
#[derive(Debug, Default, Clone, PartialEq)]
struct Byline {
    authors: Option<String>,
    venue: Option<String>,
    publisher: Option<String>,
    year: Option<i32>,
}

/// Parses result listing markup into article records
#[derive(Debug)]
pub struct ResultParser {
    item: Selector,
    title: Selector,
    title_link: Selector,
    byline: Selector,
    snippet: Selector,
    footer_links: Selector,
    side_pdf_link: Selector,
    any_link: Selector,
    next_icon_link: Selector,
    next_button: Selector,
    nav_links: Selector,
    stats: Selector,
    year_regex: Regex,
    cite_regex: Regex,
    type_tag_regex: Regex,
    total_regex: Regex,
    base_url: Url,
    current_year: i32,
}

impl ResultParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            item: compile("div.gs_or, div.gs_r.gs_scl")?,
            title: compile("h3.gs_rt")?,
            title_link: compile("h3.gs_rt a")?,
            byline: compile("div.gs_a")?,
            snippet: compile("div.gs_rs")?,
            footer_links: compile("div.gs_fl a")?,
            side_pdf_link: compile("div.gs_or_ggsm a[href]")?,
            any_link: compile("a[href]")?,
            next_icon_link: compile("a .gs_ico_nav_next")?,
            next_button: compile("button.gs_btnPR")?,
            nav_links: compile("#gs_n a, #gs_nm a")?,
            stats: compile("#gs_ab_md")?,
            year_regex: pattern(r"\b(?:19|20)\d{2}\b")?,
            // Support both English ("Cited by X") and Chinese ("被引用 X 次") formats
            cite_regex: pattern(r"(?:Cited by|被引用次数[:：]?|被引用)\s*(\d+)")?,
            type_tag_regex: pattern(r"^(?:\s*\[[A-Z]+\])+\s*")?,
            total_regex: pattern(r"(?i)([\d][\d,.\s]*)\s+results?\b")?,
            base_url: Url::parse(DEFAULT_SCHOLAR_URL)
                .map_err(|e| ScholarError::Config(e.to_string()))?,
            current_year: chrono::Utc::now().year(),
        })
    }

    /// Resolve site-relative links against `base_url` (mirror sites).
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self> {
        self.base_url = Url::parse(base_url)
            .map_err(|e| ScholarError::Config(format!("Invalid base URL '{}': {}", base_url, e)))?;
        Ok(self)
    }

    /// Fix the year used for `citations_per_year` and year validation.
    pub fn with_current_year(mut self, year: i32) -> Self {
        self.current_year = year;
        self
    }

    /// Parse one listing page.
    ///
    /// Pure function of `html`: the same body always yields the same page.
    pub fn parse(&self, html: &str) -> ParsedPage {
        let document = Html::parse_document(html);

        let mut records = Vec::new();
        for (index, item) in document.select(&self.item).enumerate() {
            match self.parse_item(item) {
                Ok(record) => records.push(record),
                Err(e) => {
                    let preview: String = collapse(&item.text().collect::<String>())
                        .chars()
                        .take(80)
                        .collect();
                    warn!(index, error = %e, preview = %preview, "Skipping listing entry");
                }
            }
        }

        let page = ParsedPage {
            records,
            has_next_page: self.has_next_page(&document),
            total_estimate: self.total_estimate(&document),
        };
        debug!(
            count = page.records.len(),
            has_next = page.has_next_page,
            "Parsed listing page"
        );
        page
    }

    fn parse_item(&self, item: ElementRef<'_>) -> Result<ArticleRecord> {
        let (title, source_url) = self
            .extract_title(item)
            .ok_or_else(|| ScholarError::ParseAnomaly("entry has no title".to_string()))?;

        let byline = self.extract_byline(item).unwrap_or_default();
        let citation_count = self.extract_citations(item).unwrap_or(0);
        let pdf_url = self
            .extract_pdf_url(item)
            .or_else(|| source_url.as_deref().and_then(arxiv_pdf_url));

        Ok(ArticleRecord {
            title,
            authors: byline.authors,
            venue: byline.venue,
            publisher: byline.publisher,
            year: byline.year,
            citation_count,
            citations_per_year: citations_per_year(citation_count, byline.year, self.current_year),
            description: self.extract_snippet(item),
            source_url,
            pdf_url,
        })
    }

    /// Title text plus the title link, if the title is linked
    fn extract_title(&self, item: ElementRef<'_>) -> Option<(String, Option<String>)> {
        let (raw, href) = match item.select(&self.title_link).next() {
            Some(link) => (
                link.text().collect::<String>(),
                link.value().attr("href").and_then(|h| self.absolutize(h)),
            ),
            None => (item.select(&self.title).next()?.text().collect::<String>(), None),
        };

        let title = collapse(&self.type_tag_regex.replace(&collapse(&raw), ""));
        if title.is_empty() {
            None
        } else {
            Some((title, href))
        }
    }

    fn extract_byline(&self, item: ElementRef<'_>) -> Option<Byline> {
        let text = item.select(&self.byline).next()?.text().collect::<String>();
        Some(self.parse_byline(&text))
    }

    /// Split "Authors - Venue, Year - Publisher" into its parts.
    fn parse_byline(&self, text: &str) -> Byline {
        let text = collapse(text);
        let parts: Vec<&str> = text
            .split(" - ")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        let mut byline = Byline::default();
        let Some(first) = parts.first() else {
            return byline;
        };
        byline.authors = non_empty(first.trim_end_matches(','));

        match parts.len() {
            1 => {}
            2 => {
                // "Authors - Venue, 2020" or "Authors - publisher.com"
                let segment = parts[1];
                if self.find_year(segment).is_some() {
                    let (venue, year) = self.split_venue_year(segment);
                    byline.venue = venue;
                    byline.year = year;
                } else {
                    byline.publisher = non_empty(segment);
                }
            }
            n => {
                byline.publisher = non_empty(parts[n - 1]);
                let (venue, year) = self.split_venue_year(&parts[1..n - 1].join(" - "));
                byline.venue = venue;
                byline.year = year;
            }
        }

        byline
    }

    /// Take the last plausible year out of a venue segment.
    fn split_venue_year(&self, segment: &str) -> (Option<String>, Option<i32>) {
        match self.find_year(segment) {
            Some((year, start, end)) => {
                let venue = format!("{} {}", &segment[..start], &segment[end..]);
                let venue = venue.trim_matches(|c: char| c.is_whitespace() || ",()-".contains(c));
                (non_empty(&collapse(venue)), Some(year))
            }
            None => (non_empty(segment), None),
        }
    }

    /// Last year-like token between 1900 and next year, with its byte span
    fn find_year(&self, text: &str) -> Option<(i32, usize, usize)> {
        self.year_regex
            .find_iter(text)
            .filter_map(|m| {
                let year: i32 = m.as_str().parse().ok()?;
                (1900..=self.current_year + 1)
                    .contains(&year)
                    .then_some((year, m.start(), m.end()))
            })
            .last()
    }

    /// Count from the footer's citing-articles link. Text elsewhere in the
    /// entry (the snippet in particular) is never considered.
    fn extract_citations(&self, item: ElementRef<'_>) -> Option<u32> {
        let links: Vec<ElementRef<'_>> = item.select(&self.footer_links).collect();
        let citing = links
            .iter()
            .filter(|link| link.value().attr("href").is_some_and(|h| h.contains("cites=")));
        // Mirrors sometimes rewrite the href, so fall back to any footer link text
        citing
            .chain(links.iter())
            .find_map(|link| self.first_citation_count(&link.text().collect::<String>()))
    }

    fn first_citation_count(&self, text: &str) -> Option<u32> {
        self.cite_regex
            .captures(text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    fn extract_snippet(&self, item: ElementRef<'_>) -> Option<String> {
        let text = item.select(&self.snippet).next()?.text().collect::<String>();
        non_empty(&collapse(&text))
    }

    fn extract_pdf_url(&self, item: ElementRef<'_>) -> Option<String> {
        if let Some(href) = item
            .select(&self.side_pdf_link)
            .filter_map(|a| a.value().attr("href"))
            .find_map(|h| self.absolutize(h))
        {
            return Some(href);
        }

        item.select(&self.any_link)
            .filter_map(|a| a.value().attr("href"))
            .filter(|h| looks_like_pdf(h))
            .find_map(|h| self.absolutize(h))
    }

    fn has_next_page(&self, document: &Html) -> bool {
        if document.select(&self.next_icon_link).next().is_some() {
            return true;
        }
        if document
            .select(&self.next_button)
            .any(|b| b.value().attr("disabled").is_none() && b.value().attr("onclick").is_some())
        {
            return true;
        }
        document
            .select(&self.nav_links)
            .any(|a| collapse(&a.text().collect::<String>()).eq_ignore_ascii_case("next"))
    }

    fn total_estimate(&self, document: &Html) -> Option<u64> {
        let text = collapse(&document.select(&self.stats).next()?.text().collect::<String>());
        let caps = self.total_regex.captures(&text)?;
        let digits: String = caps.get(1)?.as_str().chars().filter(char::is_ascii_digit).collect();
        digits.parse().ok()
    }

    /// Absolute http(s) URL for `href`, resolving site-relative links
    fn absolutize(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() || href.starts_with("javascript:") || href.starts_with('#') {
            return None;
        }
        let url = self.base_url.join(href).ok()?;
        matches!(url.scheme(), "http" | "https").then(|| url.to_string())
    }
}

/// arXiv abstract links have a PDF sibling under /pdf/
pub fn arxiv_pdf_url(url: &str) -> Option<String> {
    if url.contains("arxiv.org/abs/") {
        Some(url.replacen("/abs/", "/pdf/", 1))
    } else {
        None
    }
}

fn looks_like_pdf(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    lower.ends_with(".pdf") || lower.contains(".pdf?") || lower.contains("filetype:pdf")
}

/// Collapse whitespace (including non-breaking spaces) to single spaces
fn collapse(text: &str) -> String {
    text.split(|c: char| c.is_whitespace() || c == '\u{a0}')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn compile(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| ScholarError::Parse(e.to_string()))
}

fn pattern(re: &str) -> Result<Regex> {
    Regex::new(re).map_err(|e| ScholarError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{empty_page, result_item, results_page};

    fn parser() -> ResultParser {
        ResultParser::new()
            .expect("Failed to build parser")
            .with_current_year(2025)
    }

    fn wrap(items: &str) -> String {
        format!(r#"<html><body><div id="gs_res_ccl_mid">{}</div></body></html>"#, items)
    }

    #[test]
    fn test_parse_empty_html() {
        let page = parser().parse("<html><body></body></html>");
        assert!(page.records.is_empty());
        assert!(!page.has_next_page);
        assert_eq!(page.total_estimate, None);
    }

    #[test]
    fn test_parse_full_page() {
        let page = parser().parse(&results_page(0..10, true));
        assert_eq!(page.records.len(), 10);
        assert!(page.has_next_page);
        assert_eq!(page.total_estimate, Some(1230));

        let first = &page.records[0];
        assert_eq!(first.title, "Paper 0 on graph learning");
        assert_eq!(first.authors.as_deref(), Some("A Author0, B Coauthor"));
        assert_eq!(first.venue.as_deref(), Some("Journal of Tests"));
        assert_eq!(first.publisher.as_deref(), Some("example.org"));
        assert_eq!(first.year, Some(2010));
        assert_eq!(first.source_url.as_deref(), Some("https://example.org/paper/0"));
        assert_eq!(first.pdf_url.as_deref(), Some("https://files.example.org/0.pdf"));
        assert_eq!(first.description.as_deref(), Some("Snippet for paper 0"));

        let third = &page.records[3];
        assert_eq!(third.citation_count, 9);
        assert_eq!(third.year, Some(2013));
        assert!((third.citations_per_year - 9.0 / 12.0).abs() < 1e-9);
        assert_eq!(third.pdf_url, None);
    }

    #[test]
    fn test_last_page_has_no_next() {
        let page = parser().parse(&results_page(0..4, false));
        assert_eq!(page.records.len(), 4);
        assert!(!page.has_next_page);
    }

    #[test]
    fn test_parse_is_deterministic() {
        let body = results_page(0..10, true);
        let p = parser();
        assert_eq!(p.parse(&body), p.parse(&body));
    }

    #[test]
    fn test_entry_without_title_is_skipped() {
        let html = wrap(&format!(
            r#"<div class="gs_r gs_or gs_scl"><div class="gs_a">Nobody - 2020</div></div>{}"#,
            result_item(1)
        ));
        let page = parser().parse(&html);
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].title, "Paper 1 on graph learning");
    }

    #[test]
    fn test_missing_fields_stay_absent() {
        let html = wrap(
            r#"<div class="gs_r gs_or gs_scl"><h3 class="gs_rt"><span class="gs_ctu"><span class="gs_ct1">[CITATION]</span><span class="gs_ct2">[C]</span></span> Unlinked   study of things</h3></div>"#,
        );
        let page = parser().parse(&html);
        assert_eq!(page.records.len(), 1);
        let record = &page.records[0];
        assert_eq!(record.title, "Unlinked study of things");
        assert_eq!(record.source_url, None);
        assert_eq!(record.authors, None);
        assert_eq!(record.year, None);
        assert_eq!(record.citation_count, 0);
        assert_eq!(record.citations_per_year, 0.0);
        assert_eq!(record.description, None);
    }

    #[test]
    fn test_bracket_tags_stripped_from_linked_title() {
        let html = wrap(
            r#"<div class="gs_r gs_or gs_scl"><h3 class="gs_rt"><a href="https://arxiv.org/abs/1706.03762">[PDF] Attention is all you need</a></h3></div>"#,
        );
        let record = &parser().parse(&html).records[0];
        assert_eq!(record.title, "Attention is all you need");
        assert_eq!(record.pdf_url.as_deref(), Some("https://arxiv.org/pdf/1706.03762"));
    }

    #[test]
    fn test_byline_variants() {
        let p = parser();

        let b = p.parse_byline("J Smith, K Lee - Nature, 2020 - nature.com");
        assert_eq!(b.authors.as_deref(), Some("J Smith, K Lee"));
        assert_eq!(b.venue.as_deref(), Some("Nature"));
        assert_eq!(b.year, Some(2020));
        assert_eq!(b.publisher.as_deref(), Some("nature.com"));

        let b = p.parse_byline("J Smith - arxiv.org");
        assert_eq!(b.publisher.as_deref(), Some("arxiv.org"));
        assert_eq!(b.venue, None);
        assert_eq!(b.year, None);

        let b = p.parse_byline("J Smith - 2019 - Springer");
        assert_eq!(b.venue, None);
        assert_eq!(b.year, Some(2019));
        assert_eq!(b.publisher.as_deref(), Some("Springer"));

        let b = p.parse_byline("J Smith - Proceedings of ICML (2018)");
        assert_eq!(b.venue.as_deref(), Some("Proceedings of ICML"));
        assert_eq!(b.year, Some(2018));

        // Implausible years are ignored
        let b = p.parse_byline("J Smith - Report 2999 - self");
        assert_eq!(b.year, None);
        assert_eq!(b.venue.as_deref(), Some("Report 2999"));

        assert_eq!(p.parse_byline("   "), Byline::default());
    }

    #[test]
    fn test_citation_text_in_snippet_is_ignored() {
        let html = wrap(
            r#"<div class="gs_r gs_or gs_scl"><h3 class="gs_rt"><a href="https://x.org/a">T</a></h3><div class="gs_rs">Our method was cited by 120 follow-up studies</div><div class="gs_rs">Cited by 77 works</div><div class="gs_fl"><a href="/scholar?q=related:1">Related articles</a></div></div>"#,
        );
        assert_eq!(parser().parse(&html).records[0].citation_count, 0);
    }

    #[test]
    fn test_chinese_citation_text() {
        let html = wrap(
            r#"<div class="gs_r gs_or gs_scl"><h3 class="gs_rt"><a href="https://x.org/a">T</a></h3><div class="gs_fl"><a href="/scholar?cites=1">被引用次数：42</a></div></div>"#,
        );
        assert_eq!(parser().parse(&html).records[0].citation_count, 42);
    }

    #[test]
    fn test_relative_links_use_base_url() {
        let p = parser()
            .with_base_url("https://mirror.example")
            .expect("valid base");
        let html = wrap(
            r#"<div class="gs_r gs_or gs_scl"><div class="gs_or_ggsm"><a href="/files/x.pdf">[PDF]</a></div><h3 class="gs_rt"><a href="/citations?view=1">T</a></h3></div>"#,
        );
        let record = &p.parse(&html).records[0];
        assert_eq!(record.source_url.as_deref(), Some("https://mirror.example/citations?view=1"));
        assert_eq!(record.pdf_url.as_deref(), Some("https://mirror.example/files/x.pdf"));
    }

    #[test]
    fn test_next_button_variant() {
        let html = r#"<html><body><div id="gs_res_ccl_mid"></div><button class="gs_btnPR gs_in_ib" onclick="window.location='/scholar?start=10'"><span>Next</span></button></body></html>"#;
        assert!(parser().parse(html).has_next_page);

        let disabled = html.replace("<button class", "<button disabled class");
        assert!(!parser().parse(&disabled).has_next_page);
    }

    #[test]
    fn test_empty_listing_has_no_records() {
        let page = parser().parse(&empty_page());
        assert!(page.records.is_empty());
        assert!(!page.has_next_page);
    }
}
