//! Canonical URL helpers.

use url::Url;

/// Turn an href captured from a page into the canonical absolute URL.
///
/// - Root-relative hrefs (`/viewjob?jk=1`) are prefixed with `base_origin`.
/// - Absolute URLs are used as-is.
/// - Anything else (`viewjob?jk=1`, `//host/path`) is resolved against the
///   page it was found on, so no candidate ever carries a relative URL.
///
/// Returns `None` for empty, fragment-only, or unresolvable hrefs.
pub fn absolutize(base_origin: &str, page_url: Option<&str>, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with('/') && !href.starts_with("//") {
        return Some(format!("{}{href}", base_origin.trim_end_matches('/')));
    }

    if let Ok(url) = Url::parse(href) {
        return (!url.cannot_be_a_base()).then(|| url.to_string());
    }

    let base = page_url.unwrap_or(base_origin);
    Url::parse(base)
        .and_then(|b| b.join(href))
        .ok()
        .map(|u| u.to_string())
}

/// Whether `url` looks like an employer page, i.e. contains one of `markers`.
pub fn has_marker(url: &str, markers: &[String]) -> bool {
    markers.iter().any(|m| !m.is_empty() && url.contains(m.as_str()))
}
