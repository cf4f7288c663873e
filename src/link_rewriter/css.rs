//! CSS `url(...)` rewriting and minification

use fancy_regex::{Captures, Regex};
use std::sync::LazyLock;

// url( 'x' ) with an optional matching quote pair
static CSS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)url\s*\(\s*(['"]?)([^'"\)]+?)\1\s*\)"#)
        .expect("CSS_URL: hardcoded regex is valid")
});

/// Replace every `url(...)` reference the callback maps, keeping quote style
///
/// `data:` URIs are never offered to the callback. References the callback
/// returns `None` for are left byte-for-byte unchanged.
pub fn rewrite_css_urls<F>(css: &str, mut rewrite: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    CSS_URL
        .replace_all(css, |caps: &Captures| {
            let whole = caps.get(0).map_or("", |m| m.as_str());
            let quote = caps.get(1).map_or("", |m| m.as_str());
            let target = caps.get(2).map_or("", |m| m.as_str());

            if target.is_empty() || target.trim_start().to_ascii_lowercase().starts_with("data:") {
                return whole.to_string();
            }
            match rewrite(target) {
                Some(local) => format!("url({quote}{local}{quote})"),
                None => whole.to_string(),
            }
        })
        .into_owned()
}

/// Whitespace and comment stripping minifier
///
/// Quoted strings pass through untouched. Quotes around a `url(...)` argument
/// are dropped when the argument contains nothing that needs them. The space
/// before `:` is kept so descendant pseudo-class selectors keep their meaning.
#[must_use]
pub fn minify_css(css: &str) -> String {
    let chars: Vec<char> = css.chars().collect();
    let mut out = String::with_capacity(css.len());
    let mut pending_space = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '/' && chars.get(i + 1) == Some(&'*') {
            i += 2;
            while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                i += 1;
            }
            i += 2;
            continue;
        }

        if c.is_whitespace() {
            pending_space = true;
            i += 1;
            continue;
        }

        if pending_space {
            pending_space = false;
            let after_delim = out.chars().last().is_some_and(|p| "{};,>:(".contains(p));
            if !out.is_empty() && !after_delim && !"{};,>)".contains(c) {
                out.push(' ');
            }
        }

        match c {
            '"' | '\'' => {
                let end = string_end(&chars, i);
                let body: String = chars[i + 1..end.min(chars.len())].iter().collect();
                let closes_url = next_non_space(&chars, end + 1) == Some(')');
                if ends_with_url_open(&out) && closes_url && can_unquote(&body) {
                    out.push_str(&body);
                } else {
                    out.extend(&chars[i..(end + 1).min(chars.len())]);
                }
                i = end + 1;
                continue;
            }
            '}' => {
                if out.ends_with(';') {
                    out.pop();
                }
                out.push('}');
            }
            _ => out.push(c),
        }
        i += 1;
    }

    out
}

/// Index of the quote closing the string opened at `start`
fn string_end(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            c if c == quote => return i,
            _ => i += 1,
        }
    }
    chars.len()
}

fn next_non_space(chars: &[char], from: usize) -> Option<char> {
    chars.iter().skip(from).copied().find(|c| !c.is_whitespace())
}

fn ends_with_url_open(out: &str) -> bool {
    out.len() >= 4
        && out
            .get(out.len() - 4..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case("url("))
}

fn can_unquote(body: &str) -> bool {
    !body.is_empty()
        && !body
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '(' | ')' | '\'' | '"' | '\\'))
}
