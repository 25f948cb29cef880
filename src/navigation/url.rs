//! Href resolution and page address construction.
//!
//! Both functions are pure: page addresses double as prefetch cache keys, so the
//! same `(template, page)` must always produce the same string.

use std::sync::LazyLock;

use regex::Regex;
use url::{Position, Url};

/// Placeholder used by OPDS-PSE stream templates.
pub const PAGE_PLACEHOLDER: &str = "{pageNumber}";

static PAGE_QUERY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"pageNumber=\d+").expect("static regex"));

pub fn is_absolute(href: &str) -> bool {
    href.starts_with("http://") || href.starts_with("https://")
}

/// Resolve `href` against `base` by keeping only the base's scheme and authority.
///
/// Absolute hrefs are returned unchanged. An empty `base` yields an empty string,
/// which callers report as a configuration problem. A base that does not parse
/// degrades to plain string joining.
pub fn resolve(base: &str, href: &str) -> String {
    if is_absolute(href) {
        return href.to_string();
    }
    if base.is_empty() {
        return String::new();
    }

    let path = href.trim_start_matches('/');
    match Url::parse(base) {
        Ok(url) if url.has_host() => {
            let origin = &url[Position::BeforeScheme..Position::AfterPort];
            format!("{}/{}", origin, path)
        }
        _ => {
            tracing::warn!(
                "Could not parse base URL {:?}, joining {:?} as plain text",
                base,
                href
            );
            format!("{}/{}", base.trim_end_matches('/'), path)
        }
    }
}

/// Substitute a 1-based `page` into a stream template.
///
/// The wire format is 0-based. A `pageNumber=<digits>` query parameter wins over
/// the `{pageNumber}` placeholder; templates with neither are returned as-is.
pub fn build_page_url(template: &str, page: u32) -> String {
    let adjusted = page.saturating_sub(1).to_string();

    if PAGE_QUERY.is_match(template) {
        let replacement = format!("pageNumber={}", adjusted);
        PAGE_QUERY
            .replace_all(template, regex::NoExpand(&replacement))
            .into_owned()
    } else if template.contains(PAGE_PLACEHOLDER) {
        template.replace(PAGE_PLACEHOLDER, &adjusted)
    } else {
        template.to_string()
    }
}

/// Absolute address of `page`, used as the prefetch cache key.
pub fn page_url(base: &str, template: &str, page: u32) -> String {
    resolve(base, &build_page_url(template, page))
}

/// Stream address with its page parameter normalised away, so two addresses of
/// the same volume compare equal regardless of the page they point at.
pub fn stream_identity(url: &str) -> String {
    let canonical = PAGE_QUERY.replace_all(url, regex::NoExpand("pageNumber="));
    canonical.replace(PAGE_PLACEHOLDER, "")
}
