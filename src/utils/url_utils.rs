//! URL and path manipulation utilities.
//!
//! This module provides the deterministic URL → local path mapping used for
//! every captured artifact, plus small helpers for working with links.

use md5::{Digest, Md5};
use std::path::Path;
use url::Url;

/// Map a URL to its path inside the output root
///
/// The mapping is pure: a trailing `/` becomes `index.html`, a missing
/// extension becomes `.html`, the base name is reduced to `[A-Za-z0-9_-]`,
/// directory components to `[A-Za-z0-9/_-]`, and a non-empty query string adds
/// `_` plus the first 8 hex digits of the MD5 of `?query` before the
/// extension. Host and fragment never take part.
///
/// ```
/// use kodegen_tools_replicator::utils::local_path_for_url;
/// use url::Url;
///
/// let url = Url::parse("https://example.com/blog/").unwrap();
/// assert_eq!(local_path_for_url(&url), "blog/index.html");
/// ```
#[must_use]
pub fn local_path_for_url(url: &Url) -> String {
    let mut pathname = url.path().to_string();
    if pathname.ends_with('/') {
        pathname.push_str("index.html");
    }

    let (dir, file) = match pathname.rfind('/') {
        Some(i) => (&pathname[..i], &pathname[i + 1..]),
        None => ("", pathname.as_str()),
    };

    let (stem, ext) = match file.rfind('.') {
        Some(i) if i > 0 => (&file[..i], &file[i..]),
        _ => (file, ".html"),
    };

    let query_hash = match url.query() {
        Some(q) if !q.is_empty() => {
            let digest = Md5::digest(format!("?{q}").as_bytes());
            format!("_{}", &hex::encode(digest)[..8])
        }
        _ => String::new(),
    };

    let safe_stem: String = stem
        .chars()
        .map(|c| if is_name_char(c) { c } else { '_' })
        .collect();
    let safe_dir: String = dir
        .chars()
        .map(|c| if is_name_char(c) || c == '/' { c } else { '_' })
        .collect();

    let mut out = String::with_capacity(pathname.len() + query_hash.len());
    for segment in safe_dir.split('/').filter(|s| !s.is_empty()) {
        out.push_str(segment);
        out.push('/');
    }
    out.push_str(&safe_stem);
    out.push_str(&query_hash);
    out.push_str(ext);
    out
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Local path of the screenshot taken of `page_local` at a named breakpoint
#[must_use]
pub fn screenshot_path(page_local: &str, breakpoint: &str) -> String {
    let stem = page_local.strip_suffix(".html").unwrap_or(page_local);
    format!("{stem}_{breakpoint}.png")
}

/// Path of `target` as seen from the directory containing `from_page`
///
/// Both arguments are local paths relative to the output root; the result
/// always uses `/` separators so it can be written into markup.
#[must_use]
pub fn relative_link(from_page: &str, target: &str) -> String {
    let base = Path::new(from_page).parent().unwrap_or_else(|| Path::new(""));
    match pathdiff::diff_paths(target, base) {
        Some(rel) if !rel.as_os_str().is_empty() => rel.to_string_lossy().replace('\\', "/"),
        _ => target.to_string(),
    }
}

/// Drop the `#fragment` part of a URL
#[must_use]
pub fn strip_fragment(mut url: Url) -> Url {
    url.set_fragment(None);
    url
}

/// Canonical form used to key pages: parsed, http(s) only, no fragment
///
/// Parsing lower-cases the host, drops default ports and gives bare origins
/// a `/` path, so the same page always yields the same key.
#[must_use]
pub fn normalize_page_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    Some(strip_fragment(url).to_string())
}

/// Check if a URL is valid
#[must_use]
pub fn is_valid_url(url: &str) -> bool {
    if url.is_empty() {
        return false;
    }

    // Skip data URLs, javascript URLs, and other non-http schemes
    if url.starts_with("data:") || url.starts_with("javascript:") || url.starts_with("mailto:") {
        return false;
    }

    match Url::parse(url) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

/// Lower-cased hostname of a URL, if it has one
#[must_use]
pub fn hostname_of(url: &Url) -> Option<String> {
    url.host_str().map(str::to_ascii_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lp(s: &str) -> String {
        local_path_for_url(&Url::parse(s).unwrap())
    }

    #[test]
    fn root_and_directories_get_index() {
        assert_eq!(lp("https://example.com/"), "index.html");
        assert_eq!(lp("https://example.com"), "index.html");
        assert_eq!(lp("https://example.com/docs/"), "docs/index.html");
    }

    #[test]
    fn missing_extension_defaults_to_html() {
        assert_eq!(lp("https://example.com/about"), "about.html");
        assert_eq!(lp("https://example.com/a/b/c"), "a/b/c.html");
    }

    #[test]
    fn keeps_extension_and_sanitizes_names() {
        assert_eq!(lp("https://example.com/static/app.min.js"), "static/app_min.js");
        assert_eq!(lp("https://example.com/img/My%20Logo.PNG"), "img/My_20Logo.PNG");
        assert_eq!(lp("https://example.com/v1.2/x.css"), "v1_2/x.css");
    }

    #[test]
    fn query_hash_is_stable_and_distinct() {
        let a = lp("https://example.com/style.css?v=1");
        let b = lp("https://example.com/style.css?v=2");
        assert_eq!(a, lp("https://example.com/style.css?v=1"));
        assert_ne!(a, b);
        assert!(a.starts_with("style_") && a.ends_with(".css"));
        assert_eq!(a.len(), "style_".len() + 8 + ".css".len());
        // empty query behaves like no query
        assert_eq!(lp("https://example.com/style.css?"), "style.css");
    }

    #[test]
    fn query_hash_matches_md5_of_search() {
        let digest = hex::encode(Md5::digest(b"?v=1"));
        assert_eq!(
            lp("https://example.com/a.js?v=1"),
            format!("a_{}.js", &digest[..8])
        );
    }

    #[test]
    fn host_and_fragment_do_not_matter() {
        assert_eq!(
            lp("https://cdn.example.net/a.png#x"),
            lp("https://example.com/a.png")
        );
    }

    #[test]
    fn screenshot_naming() {
        assert_eq!(screenshot_path("index.html", "desktop"), "index_desktop.png");
        assert_eq!(screenshot_path("blog/post.html", "mobile"), "blog/post_mobile.png");
    }

    #[test]
    fn relative_links_walk_up_directories() {
        assert_eq!(relative_link("index.html", "a.png"), "a.png");
        assert_eq!(relative_link("blog/post.html", "img/a.png"), "../img/a.png");
        assert_eq!(relative_link("blog/post.html", "blog/x.css"), "x.css");
    }

    #[test]
    fn valid_url_filter() {
        assert!(is_valid_url("https://example.com/"));
        assert!(!is_valid_url("data:image/png;base64,AAAA"));
        assert!(!is_valid_url("mailto:a@b.c"));
        assert!(!is_valid_url("ftp://example.com/"));
        assert!(!is_valid_url(""));
    }

    #[test]
    fn page_urls_normalize_to_one_key() {
        let key = normalize_page_url("https://example.com/docs").unwrap();
        for variant in [
            "https://EXAMPLE.com/docs",
            "https://example.com:443/docs",
            "https://example.com/docs#intro",
            " https://example.com/docs ",
        ] {
            assert_eq!(normalize_page_url(variant).as_deref(), Some(key.as_str()), "{variant}");
        }
        assert_eq!(
            normalize_page_url("https://example.com").as_deref(),
            Some("https://example.com/")
        );
        assert_eq!(normalize_page_url("mailto:a@b.c"), None);
        assert_eq!(normalize_page_url("not a url"), None);
    }
}
