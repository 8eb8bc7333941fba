//! HTML parsing and the built-in pipeline steps
//!
//! This module handles parsing HTML content to extract:
//! - Links to follow (from <a> tags and canonical links)
//! - Page title
//!
//! [`LinkFollowStep`] and [`TitleStep`] wrap these for use in a route.
//! Parsing happens synchronously inside each step because a parsed
//! document cannot be held across an await point.

use crate::crawler::pipeline::{PipelineResult, PipelineStep, ProcessingContext, StepError};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Extracted information from an HTML page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPage {
    /// The page title (from <title> tag)
    pub title: Option<String>,

    /// Links found on the page (absolute, first occurrence order, no duplicates)
    pub links: Vec<String>,
}

/// Parses HTML content and extracts links and metadata
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` tags anywhere in the document
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` and `data:` links
/// - Fragment-only links
///
/// Relative links resolve against `<base href>` when present, otherwise
/// against `base_url`.
///
/// # Example
///
/// ```
/// use sumi_loom::crawler::parse_html;
/// use url::Url;
///
/// let html = r#"<html><head><title>Test</title></head><body><a href="/page">Link</a></body></html>"#;
/// let base_url = Url::parse("https://example.com/").unwrap();
/// let parsed = parse_html(html, &base_url);
/// assert_eq!(parsed.title, Some("Test".to_string()));
/// assert_eq!(parsed.links, vec!["https://example.com/page".to_string()]);
/// ```
pub fn parse_html(html: &str, base_url: &Url) -> ParsedPage {
    let document = Html::parse_document(html);
    let base = document_base(&document, base_url);

    ParsedPage {
        title: extract_title(&document),
        links: extract_links(&document, &base),
    }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

/// Honors `<base href>` when it resolves to an http(s) URL
fn document_base(document: &Html, fallback: &Url) -> Url {
    selector("base[href]")
        .and_then(|sel| {
            document
                .select(&sel)
                .next()
                .and_then(|el| el.value().attr("href"))
                .and_then(|href| fallback.join(href.trim()).ok())
        })
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or_else(|| fallback.clone())
}

fn extract_title(document: &Html) -> Option<String> {
    let title_selector = selector("title")?;

    document
        .select(&title_selector)
        .next()
        .map(|element| {
            element
                .text()
                .collect::<String>()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|s| !s.is_empty())
}

fn extract_links(document: &Html, base_url: &Url) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    let mut push = |href: &str| {
        if let Some(absolute) = resolve_link(href, base_url) {
            if seen.insert(absolute.clone()) {
                links.push(absolute);
            }
        }
    };

    if let Some(a_selector) = selector("a[href]") {
        for element in document.select(&a_selector) {
            if element.value().attr("download").is_some() {
                continue;
            }
            if let Some(href) = element.value().attr("href") {
                push(href);
            }
        }
    }

    if let Some(canonical_selector) = selector("link[rel='canonical'][href]") {
        for element in document.select(&canonical_selector) {
            if let Some(href) = element.value().attr("href") {
                push(href);
            }
        }
    }

    links
}

/// Resolves a link href to an absolute http(s) URL
///
/// Returns None for excluded schemes, fragment-only links and anything that
/// does not resolve.
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let mut absolute = base_url.join(href).ok()?;
    if !matches!(absolute.scheme(), "http" | "https") {
        return None;
    }
    absolute.set_fragment(None);
    Some(absolute.to_string())
}

/// Enqueues every link on an HTML page
///
/// Non-HTML responses pass through untouched. Discovered links keep the
/// current task's hint unless `hint` is set.
#[derive(Debug, Clone, Default)]
pub struct LinkFollowStep {
    hint: Option<String>,
    same_host_only: bool,
}

impl LinkFollowStep {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tags discovered links with a different hint
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Only follows links on the host of the fetched page
    pub fn same_host_only(mut self) -> Self {
        self.same_host_only = true;
        self
    }

    fn links(&self, html: &str, page: &Url) -> Vec<String> {
        let links = parse_html(html, page).links;
        if !self.same_host_only {
            return links;
        }
        links
            .into_iter()
            .filter(|link| {
                Url::parse(link)
                    .map(|url| url.host_str() == page.host_str())
                    .unwrap_or(false)
            })
            .collect()
    }
}

#[async_trait]
impl PipelineStep for LinkFollowStep {
    fn id(&self) -> &str {
        "link-follow"
    }

    async fn execute(
        &self,
        ctx: &mut ProcessingContext<'_>,
    ) -> Result<Option<PipelineResult>, StepError> {
        if !ctx.fetch().is_html() {
            return Ok(None);
        }

        let page = Url::parse(&ctx.fetch().uri)
            .map_err(|e| StepError::failed(format!("unparseable page URL: {}", e)))?;
        let links = self.links(&ctx.fetch().body, &page);

        tracing::debug!("Found {} links on {}", links.len(), page);
        for link in links {
            ctx.enqueue(link, self.hint.clone());
        }
        Ok(None)
    }
}

/// Records whether an HTML page has a title
///
/// Pages without one get a `missing-title` rejection in the decision log;
/// with `require_title` set the task is rejected permanently as well.
#[derive(Debug, Clone, Default)]
pub struct TitleStep {
    require_title: bool,
}

impl TitleStep {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required() -> Self {
        Self {
            require_title: true,
        }
    }
}

#[async_trait]
impl PipelineStep for TitleStep {
    fn id(&self) -> &str {
        "title"
    }

    async fn execute(
        &self,
        ctx: &mut ProcessingContext<'_>,
    ) -> Result<Option<PipelineResult>, StepError> {
        if !ctx.fetch().is_html() {
            return Ok(None);
        }

        let title = Url::parse(&ctx.fetch().uri)
            .ok()
            .and_then(|page| parse_html(&ctx.fetch().body, &page).title);

        match title {
            Some(title) => {
                ctx.decisions().accept("title", title);
                Ok(None)
            }
            None => {
                ctx.decisions().reject("missing-title", "page has no <title>");
                if self.require_title {
                    Err(StepError::rejected("missing-title", "page has no <title>"))
                } else {
                    Ok(None)
                }
            }
        }
    }
}
