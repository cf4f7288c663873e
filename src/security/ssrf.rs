//! Outbound request filtering
//!
//! Every URL the replicator dereferences on its own initiative (robots.txt,
//! sitemaps, page navigation, asset fetches, redirect hops) passes through
//! `is_url_fetch_safe` first, so markup on a crawled site cannot point the
//! crawler at loopback or private infrastructure.

use std::net::{Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

/// Whether a URL may be fetched under the SSRF policy
///
/// Rejects non-http(s) schemes, loopback/private/link-local/unspecified IP
/// literals (v4 and v6, including v4-mapped v6), `localhost` and any
/// `*.local` or `*.localhost` hostname.
#[must_use]
pub fn is_url_fetch_safe(url: &Url) -> bool {
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }

    match url.host() {
        None => false,
        Some(Host::Ipv4(ip)) => !is_internal_ipv4(ip),
        Some(Host::Ipv6(ip)) => !is_internal_ipv6(ip),
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            !(domain == "localhost"
                || domain.ends_with(".localhost")
                || domain == "local"
                || domain.ends_with(".local"))
        }
    }
}

/// Same check for a raw string; unparseable input is never safe
#[must_use]
pub fn is_url_str_fetch_safe(url: &str) -> bool {
    Url::parse(url).is_ok_and(|u| is_url_fetch_safe(&u))
}

fn is_internal_ipv4(ip: Ipv4Addr) -> bool {
    // 10/8, 172.16/12 and 192.168/16 via is_private; 127/8; 169.254/16
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
}

fn is_internal_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_internal_ipv4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}
