//! Conservative HTML minifier
//!
//! Collapses whitespace runs in text to one space and drops comments other
//! than conditional comments. Tags are copied verbatim, as is the content of
//! `pre`, `textarea`, `script` and `style`.

const RAW_TEXT_TAGS: [&str; 4] = ["pre", "textarea", "script", "style"];

#[must_use]
pub fn minify_html(html: &str) -> String {
    let bytes = html.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];

        if b == b'<' {
            if bytes[i..].starts_with(b"<!--") {
                let end = find(bytes, i + 4, b"-->").map_or(bytes.len(), |e| e + 3);
                if bytes[i..].starts_with(b"<!--[if") {
                    out.extend_from_slice(&bytes[i..end]);
                }
                i = end;
                continue;
            }

            let tag_end = tag_end(bytes, i);
            out.extend_from_slice(&bytes[i..tag_end]);

            if let Some(name) = raw_text_tag(&bytes[i + 1..tag_end]) {
                let close = format!("</{name}");
                let body_end = find_ignore_case(bytes, tag_end, close.as_bytes()).unwrap_or(bytes.len());
                out.extend_from_slice(&bytes[tag_end..body_end]);
                i = body_end;
            } else {
                i = tag_end;
            }
            continue;
        }

        if b.is_ascii_whitespace() {
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if !out.is_empty() && i < bytes.len() {
                out.push(b' ');
            }
            continue;
        }

        out.push(b);
        i += 1;
    }

    String::from_utf8(out).unwrap_or_else(|_| html.to_string())
}

/// End (exclusive) of the tag starting at `start`, honouring quoted values
fn tag_end(bytes: &[u8], start: usize) -> usize {
    let mut quote: Option<u8> = None;
    let mut i = start + 1;
    while i < bytes.len() {
        match (quote, bytes[i]) {
            (Some(q), c) if c == q => quote = None,
            (None, b'"' | b'\'') => quote = Some(bytes[i]),
            (None, b'>') => return i + 1,
            _ => {}
        }
        i += 1;
    }
    bytes.len()
}

/// Name of a raw-text element if `tag` (without the leading `<`) opens one
fn raw_text_tag(tag: &[u8]) -> Option<&'static str> {
    RAW_TEXT_TAGS.into_iter().find(|name| {
        tag.len() > name.len()
            && tag[..name.len()].eq_ignore_ascii_case(name.as_bytes())
            && matches!(tag[name.len()], b'>' | b'/' | b' ' | b'\t' | b'\n' | b'\r')
    })
}

fn find(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

fn find_ignore_case(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
        .map(|p| p + from)
}
