//! Link discovery in fetched HTML
//!
//! Extraction is best-effort: html5ever recovers from malformed markup, so a
//! broken page yields whatever links could be found rather than an error.

use scraper::{Html, Selector};
use url::Url;

/// Returns true when a Content-Type value describes an HTML document
pub fn is_html(content_type: Option<&str>) -> bool {
    match content_type {
        // Servers that omit the header are usually serving HTML
        None => true,
        Some(ct) => {
            let mime = ct.split(';').next().unwrap_or_default().trim();
            mime.eq_ignore_ascii_case("text/html")
                || mime.eq_ignore_ascii_case("application/xhtml+xml")
        }
    }
}

/// Extracts hyperlink targets from HTML bytes
///
/// # Link Extraction Rules
///
/// **Include:**
/// - `<a href="...">` anywhere in the document
/// - `<link rel="canonical" href="...">`
///
/// **Exclude:**
/// - `<a href="..." download>`
/// - `javascript:`, `mailto:`, `tel:` and `data:` targets
/// - Anything that does not resolve to an http(s) URL
///
/// A `<base href>` element, when present, replaces `base_url` for resolution.
///
/// # Arguments
///
/// * `body` - Raw response bytes; invalid UTF-8 is replaced
/// * `base_url` - Final URL of the page, for resolving relative links
///
/// # Example
///
/// ```
/// use source_sentinel::crawler::extract_links;
/// use url::Url;
///
/// let html = br#"<html><body><a href="/docs/guide">Guide</a><a href="mailto:x@y.z">Mail</a></body></html>"#;
/// let base = Url::parse("https://example.com/docs/").unwrap();
/// assert_eq!(extract_links(html, &base), vec!["https://example.com/docs/guide".to_string()]);
/// ```
pub fn extract_links(body: &[u8], base_url: &Url) -> Vec<String> {
    let text = String::from_utf8_lossy(body);
    let document = Html::parse_document(&text);
    let base = document_base(&document, base_url);

    let mut links = Vec::new();

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            if element.value().attr("download").is_some() {
                continue;
            }
            if let Some(link) = element.value().attr("href").and_then(|h| resolve_link(h, &base)) {
                links.push(link);
            }
        }
    }

    if let Ok(canonical_selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&canonical_selector) {
            if let Some(link) = element.value().attr("href").and_then(|h| resolve_link(h, &base)) {
                links.push(link);
            }
        }
    }

    links
}

fn document_base(document: &Html, page_url: &Url) -> Url {
    Selector::parse("base[href]")
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .next()
                .and_then(|e| e.value().attr("href"))
                .and_then(|href| page_url.join(href.trim()).ok())
        })
        .unwrap_or_else(|| page_url.clone())
}

/// Resolves an href against the base URL, dropping non-navigational targets
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

    let resolved = base_url.join(href).ok()?;
    match resolved.scheme() {
        "http" | "https" => Some(resolved.to_string()),
        _ => None,
    }
}
