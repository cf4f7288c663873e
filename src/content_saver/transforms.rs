//! Content-type specific transforms applied before compression
//!
//! Every transform is best-effort: when it cannot make sense of the input
//! the original bytes pass through and the original content type is kept.

use image::codecs::avif::AvifEncoder;
use image::codecs::webp::WebPEncoder;
use image::DynamicImage;
use log::debug;
use regex::Regex;
use std::sync::LazyLock;

use crate::config::{ImagePolicy, ReplicationOptions};
use crate::link_rewriter::minify_css;

/// ravif speed setting; 1 is slowest/smallest, 10 fastest
const AVIF_SPEED: u8 = 8;

static TEXT_CONTENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(text/|application/(javascript|json|xml))")
        .expect("TEXT_CONTENT: hardcoded regex is valid")
});

static SVG_COMMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--.*?-->").expect("SVG_COMMENT: hardcoded regex is valid")
});

static SVG_METADATA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<metadata\b.*?</metadata>|<title>\s*</title>|<desc>\s*</desc>")
        .expect("SVG_METADATA: hardcoded regex is valid")
});

static SVG_DOCTYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<!DOCTYPE[^>\[]*(\[[^\]]*\])?\s*>")
        .expect("SVG_DOCTYPE: hardcoded regex is valid")
});

static INTER_TAG_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r">\s+<").expect("INTER_TAG_SPACE: hardcoded regex is valid"));

/// `<text>` elements, whose whitespace between child tags is rendered
static SVG_TEXT_ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<text\b.*?</text\s*>").expect("SVG_TEXT_ELEMENT: hardcoded regex is valid")
});

/// Which transform an asset goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Passthrough,
    MinifyCss,
    OptimizeSvg,
    Transcode { target: ImagePolicy, quality: u8 },
}

impl Transform {
    /// Pick the transform for a response content type
    #[must_use]
    pub fn select(content_type: &str, options: &ReplicationOptions) -> Self {
        let mime = essence(content_type);
        if mime == "text/css" && options.minify_css() {
            return Self::MinifyCss;
        }

        let policy = options.image_policy();
        if policy == ImagePolicy::None || !mime.starts_with("image/") {
            return Self::Passthrough;
        }
        if mime == "image/svg+xml" {
            return Self::OptimizeSvg;
        }
        // animation would be lost; already-target formats gain nothing
        if mime == "image/gif" || policy.target_mime() == Some(mime.as_str()) {
            return Self::Passthrough;
        }
        Self::Transcode {
            target: policy,
            quality: options.image_quality(),
        }
    }

    /// Whether the transform needs the whole body before it can run
    #[must_use]
    pub const fn is_buffered(self) -> bool {
        !matches!(self, Self::Passthrough)
    }

    /// Run the transform, returning the output bytes and, when it changed,
    /// the new content type
    #[must_use]
    pub fn apply(self, input: Vec<u8>) -> (Vec<u8>, Option<&'static str>) {
        match self {
            Self::Passthrough => (input, None),
            Self::MinifyCss => match String::from_utf8(input) {
                Ok(css) => (minify_css(&css).into_bytes(), None),
                Err(e) => (e.into_bytes(), None),
            },
            Self::OptimizeSvg => match String::from_utf8(input) {
                Ok(svg) => (optimize_svg(&svg).into_bytes(), None),
                Err(e) => (e.into_bytes(), None),
            },
            Self::Transcode { target, quality } => match transcode(&input, target, quality) {
                Some((bytes, mime)) => (bytes, Some(mime)),
                None => (input, None),
            },
        }
    }
}

/// `type/subtype` part of a Content-Type header, lower-cased
#[must_use]
pub fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Content types eligible for the compression stage
#[must_use]
pub fn is_compressible(content_type: &str) -> bool {
    TEXT_CONTENT.is_match(&content_type.trim().to_ascii_lowercase())
}

/// Strip comments, metadata and inter-tag whitespace from an SVG document
///
/// Content of `<text>` elements is left as is.
#[must_use]
pub fn optimize_svg(svg: &str) -> String {
    let out = SVG_COMMENT.replace_all(svg, "");
    let out = SVG_DOCTYPE.replace_all(&out, "");
    let out = SVG_METADATA.replace_all(&out, "");
    collapse_outside_text(&out).trim().to_string()
}

fn collapse_outside_text(svg: &str) -> String {
    let text_spans: Vec<(usize, usize)> = SVG_TEXT_ELEMENT
        .find_iter(svg)
        .map(|m| (m.start(), m.end()))
        .collect();
    INTER_TAG_SPACE
        .replace_all(svg, |caps: &regex::Captures<'_>| {
            let (start, end) = caps
                .get(0)
                .map_or((0, 0), |m| (m.start(), m.end()));
            let inside_text = text_spans.iter().any(|&(s, e)| start >= s && end <= e);
            if inside_text {
                caps[0].to_string()
            } else {
                "><".to_string()
            }
        })
        .into_owned()
}

fn transcode(input: &[u8], target: ImagePolicy, quality: u8) -> Option<(Vec<u8>, &'static str)> {
    let decoded = match image::load_from_memory(input) {
        Ok(img) => img,
        Err(e) => {
            debug!("Skipping transcode, cannot decode image: {e}");
            return None;
        }
    };
    let rgba = DynamicImage::ImageRgba8(decoded.to_rgba8());
    let mut out = Vec::new();

    let encoded = match target {
        ImagePolicy::Webp => rgba.write_with_encoder(WebPEncoder::new_lossless(&mut out)),
        ImagePolicy::Avif => rgba.write_with_encoder(AvifEncoder::new_with_speed_quality(
            &mut out, AVIF_SPEED, quality,
        )),
        ImagePolicy::None => return None,
    };

    match encoded {
        Ok(()) => target.target_mime().map(|mime| (out, mime)),
        Err(e) => {
            debug!("Transcode to {target} failed: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompressionPolicy;
    use std::io::Cursor;

    fn options(policy: ImagePolicy) -> ReplicationOptions {
        ReplicationOptions::builder()
            .image_policy(policy)
            .compression(CompressionPolicy::None)
            .build()
            .unwrap()
    }

    fn tiny_png() -> Vec<u8> {
        let img = DynamicImage::new_rgb8(4, 4);
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn selection_follows_content_type_and_policy() {
        let avif = options(ImagePolicy::Avif);
        assert_eq!(Transform::select("text/css; charset=utf-8", &avif), Transform::MinifyCss);
        assert_eq!(Transform::select("image/svg+xml", &avif), Transform::OptimizeSvg);
        assert_eq!(Transform::select("image/gif", &avif), Transform::Passthrough);
        assert_eq!(Transform::select("image/avif", &avif), Transform::Passthrough);
        assert!(matches!(
            Transform::select("image/png", &avif),
            Transform::Transcode { target: ImagePolicy::Avif, quality: 75 }
        ));
        assert_eq!(
            Transform::select("image/png", &options(ImagePolicy::None)),
            Transform::Passthrough
        );
        assert_eq!(Transform::select("application/javascript", &avif), Transform::Passthrough);
    }

    #[test]
    fn compressible_types() {
        assert!(is_compressible("text/html; charset=utf-8"));
        assert!(is_compressible("application/javascript"));
        assert!(is_compressible("application/json"));
        assert!(!is_compressible("image/png"));
        assert!(!is_compressible("application/octet-stream"));
    }

    #[test]
    fn svg_optimizer_drops_noise() {
        let svg = "<?xml version=\"1.0\"?>\n<!-- generator -->\n<svg>\n  <metadata>x</metadata>\n  <rect width=\"1\"/>\n</svg>\n";
        assert_eq!(optimize_svg(svg), "<?xml version=\"1.0\"?><svg><rect width=\"1\"/></svg>");
    }

    #[test]
    fn svg_text_keeps_word_spacing() {
        let svg = "<svg>\n  <text x=\"0\"><tspan>Hello</tspan> <tspan>world</tspan></text>\n  <g>\n    <textPath/>\n  </g>\n</svg>";
        assert_eq!(
            optimize_svg(svg),
            "<svg><text x=\"0\"><tspan>Hello</tspan> <tspan>world</tspan></text><g><textPath/></g></svg>"
        );
    }

    #[test]
    fn webp_transcode_changes_type() {
        let (bytes, mime) = Transform::Transcode { target: ImagePolicy::Webp, quality: 75 }.apply(tiny_png());
        assert_eq!(mime, Some("image/webp"));
        assert_eq!(&bytes[..4], b"RIFF");
    }

    #[test]
    fn undecodable_image_passes_through() {
        let input = b"not an image".to_vec();
        let (bytes, mime) = Transform::Transcode { target: ImagePolicy::Webp, quality: 75 }.apply(input.clone());
        assert_eq!(bytes, input);
        assert_eq!(mime, None);
    }
}
