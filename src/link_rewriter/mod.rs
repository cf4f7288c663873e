//! URL rewriting for captured documents
//!
//! Pages are rewritten against the URL→local-path table built up during the
//! crawl. Every reference the table knows is replaced by a path relative to
//! the referencing page, so the replica opens straight from disk; anything
//! else is left as it was.

pub mod css;
pub mod html;
pub mod minify;

use dashmap::DashMap;
use std::collections::HashMap;
use url::Url;

use crate::utils::relative_link;

pub use css::{minify_css, rewrite_css_urls};
pub use html::{extract_page_links, rewrite_html};
pub use minify::minify_html;

/// Lookup from an absolute URL (fragment stripped) to its local path
pub trait UrlTable: Send + Sync {
    fn local_path(&self, absolute_url: &str) -> Option<String>;
}

impl UrlTable for DashMap<String, String> {
    fn local_path(&self, absolute_url: &str) -> Option<String> {
        self.get(absolute_url).map(|e| e.value().clone())
    }
}

impl UrlTable for HashMap<String, String> {
    fn local_path(&self, absolute_url: &str) -> Option<String> {
        self.get(absolute_url).cloned()
    }
}

/// Resolves references found in one page
pub struct PageLinks<'a> {
    page_url: &'a Url,
    page_local: &'a str,
    table: &'a dyn UrlTable,
}

impl<'a> PageLinks<'a> {
    #[must_use]
    pub fn new(page_url: &'a Url, page_local: &'a str, table: &'a dyn UrlTable) -> Self {
        Self {
            page_url,
            page_local,
            table,
        }
    }

    #[must_use]
    pub fn page_url(&self) -> &Url {
        self.page_url
    }

    /// Local replacement for a raw reference, or `None` to keep it
    ///
    /// The reference is resolved against the page URL; a fragment survives
    /// the rewrite.
    #[must_use]
    pub fn resolve(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with('#') || has_opaque_scheme(raw) {
            return None;
        }

        let mut absolute = self.page_url.join(raw).ok()?;
        let fragment = absolute.fragment().map(str::to_string);
        absolute.set_fragment(None);

        let local = self.table.local_path(absolute.as_str())?;
        let relative = relative_link(self.page_local, &local);
        Some(match fragment {
            Some(f) => format!("{relative}#{f}"),
            None => relative,
        })
    }
}

fn has_opaque_scheme(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    ["data:", "javascript:", "mailto:", "tel:", "blob:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}
