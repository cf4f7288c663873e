//! Streaming HTML reference rewriting with lol_html

use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result, anyhow};
use lol_html::html_content::ContentType;
use lol_html::{HtmlRewriter, Settings, element, text};
use scraper::{Html, Selector};
use serde_json::Value;
use url::Url;

use super::PageLinks;
use super::css::rewrite_css_urls;
use crate::utils::strip_fragment;

/// Tags whose attributes carry sub-resource URLs
const URL_ATTRIBUTES: &[(&str, &[&str])] = &[
    ("img", &["src", "srcset"]),
    ("source", &["src", "srcset"]),
    ("link", &["href"]),
    ("script", &["src"]),
    ("video", &["src", "poster"]),
    ("audio", &["src"]),
    ("iframe", &["src"]),
    ("form", &["action"]),
    ("a", &["href"]),
];

static ANCHOR_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("a[href]").expect("ANCHOR_SELECTOR: hardcoded selector is valid")
});

/// Rewrite every URL-bearing construct in `html` through `links`
///
/// Covers the tag/attribute table above (with per-candidate `srcset`
/// handling), inline `style` attributes, `<style>` blocks, `og:image` /
/// `twitter:image` meta tags, and absolute URL strings inside JSON-LD
/// scripts. Returns the new document and the number of values changed.
pub fn rewrite_html(html: &str, links: &PageLinks<'_>) -> Result<(String, usize)> {
    let mut output = Vec::with_capacity(html.len());
    let rewrites = AtomicUsize::new(0);
    let style_buffer = RefCell::new(String::new());
    let json_buffer = RefCell::new(String::new());

    let resolve = |raw: &str| {
        let local = links.resolve(raw);
        if local.is_some() {
            rewrites.fetch_add(1, Ordering::Relaxed);
        }
        local
    };

    let mut handlers = Vec::with_capacity(URL_ATTRIBUTES.len() + 5);
    for &(tag, attributes) in URL_ATTRIBUTES {
        let resolve = &resolve;
        handlers.push(element!(tag, move |el| {
            for &attribute in attributes {
                let Some(value) = el.get_attribute(attribute) else {
                    continue;
                };
                let rewritten = if attribute == "srcset" {
                    rewrite_srcset(&value, resolve)
                } else {
                    resolve(&value)
                };
                if let Some(new_value) = rewritten {
                    el.set_attribute(attribute, &new_value)?;
                }
            }
            Ok(())
        }));
    }

    handlers.push(element!("[style]", |el| {
        if let Some(style) = el.get_attribute("style") {
            let rewritten = rewrite_css_urls(&style, resolve);
            if rewritten != style {
                el.set_attribute("style", &rewritten)?;
            }
        }
        Ok(())
    }));

    handlers.push(element!(r#"meta[property="og:image"], meta[name="twitter:image"]"#, |el| {
        if let Some(content) = el.get_attribute("content")
            && let Some(local) = resolve(&content)
        {
            el.set_attribute("content", &local)?;
        }
        Ok(())
    }));

    handlers.push(text!("style", |chunk| {
        style_buffer.borrow_mut().push_str(chunk.as_str());
        if chunk.last_in_text_node() {
            let css = std::mem::take(&mut *style_buffer.borrow_mut());
            chunk.replace(&rewrite_css_urls(&css, resolve), ContentType::Html);
        } else {
            chunk.remove();
        }
        Ok(())
    }));

    handlers.push(text!(r#"script[type="application/ld+json"]"#, |chunk| {
        json_buffer.borrow_mut().push_str(chunk.as_str());
        if chunk.last_in_text_node() {
            let raw = std::mem::take(&mut *json_buffer.borrow_mut());
            chunk.replace(&rewrite_json_ld(&raw, resolve), ContentType::Html);
        } else {
            chunk.remove();
        }
        Ok(())
    }));

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: handlers,
            ..Settings::default()
        },
        |c: &[u8]| output.extend_from_slice(c),
    );

    rewriter
        .write(html.as_bytes())
        .map_err(|e| anyhow!("HTML rewrite error: {e}"))?;
    rewriter
        .end()
        .map_err(|e| anyhow!("HTML rewrite finalization error: {e}"))?;

    let result = String::from_utf8(output).context("Invalid UTF-8 in rewritten HTML")?;
    Ok((result, rewrites.load(Ordering::Relaxed)))
}

/// Rewrite each `url descriptor` candidate; `None` when nothing changed
fn rewrite_srcset(value: &str, resolve: impl Fn(&str) -> Option<String>) -> Option<String> {
    let mut changed = false;
    let candidates: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|candidate| {
            let mut parts = candidate.split_whitespace();
            let url = parts.next().unwrap_or_default();
            let descriptor = parts.collect::<Vec<_>>().join(" ");
            let url = match resolve(url) {
                Some(local) => {
                    changed = true;
                    local
                }
                None => url.to_string(),
            };
            if descriptor.is_empty() {
                url
            } else {
                format!("{url} {descriptor}")
            }
        })
        .collect();
    changed.then(|| candidates.join(", "))
}

/// Rewrite absolute http(s) strings anywhere in a JSON-LD document
///
/// Unparsable documents are returned untouched. Re-serialized output has
/// every `</` escaped so a string value cannot close the script element.
fn rewrite_json_ld(raw: &str, resolve: impl Fn(&str) -> Option<String> + Copy) -> String {
    let Ok(mut value) = serde_json::from_str::<Value>(raw) else {
        return raw.to_string();
    };
    if !rewrite_json_value(&mut value, resolve) {
        return raw.to_string();
    }
    serde_json::to_string(&value).map_or_else(|_| raw.to_string(), |json| json.replace("</", "<\\/"))
}

fn rewrite_json_value(value: &mut Value, resolve: impl Fn(&str) -> Option<String> + Copy) -> bool {
    match value {
        Value::String(s) if s.starts_with("http:") || s.starts_with("https:") => {
            match resolve(s) {
                Some(local) => {
                    *s = local;
                    true
                }
                None => false,
            }
        }
        Value::Array(items) => items
            .iter_mut()
            .fold(false, |acc, item| rewrite_json_value(item, resolve) | acc),
        Value::Object(map) => map
            .values_mut()
            .fold(false, |acc, item| rewrite_json_value(item, resolve) | acc),
        _ => false,
    }
}

/// Same-origin anchor targets of a rendered page, fragments stripped
#[must_use]
pub fn extract_page_links(html: &str, page_url: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    let origin = page_url.origin();
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&ANCHOR_SELECTOR) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') {
            continue;
        }
        let Ok(resolved) = page_url.join(href) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") || resolved.origin() != origin {
            continue;
        }
        let resolved = strip_fragment(resolved);
        if seen.insert(resolved.to_string()) {
            links.push(resolved);
        }
    }

    links
}
