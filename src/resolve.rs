//! Resolution of `.local` discovery names to numeric addresses.
//!
//! Some HTTP stacks stumble over multicast-DNS names, so the host is resolved
//! up front and swapped into the URL. Failures degrade: callers fall back to
//! the original URL instead of treating an unresolved name as fatal.

use reqwest::Url;
use std::net::IpAddr;

const LOCAL_SUFFIX: &str = ".local";

/// Resolve the host of `url` if it carries a `.local` suffix.
///
/// Returns the input unchanged when no resolution is needed, the URL with
/// only its host segment replaced on success, and `None` when the name could
/// not be resolved (including URLs without a host at all).
pub async fn resolve_local_url(url: &Url) -> Option<Url> {
    let host = url.host_str()?;
    if !host.ends_with(LOCAL_SUFFIX) {
        return Some(url.clone());
    }

    let port = url.port_or_known_default().unwrap_or(80);
    let mut addresses = tokio::net::lookup_host((host, port)).await.ok()?;
    let address = addresses.next()?;

    let resolved = replace_host(url, address.ip())?;
    log::debug!("Resolved {} to {}", url, resolved);
    Some(resolved)
}

/// Swap the host segment for a literal address, keeping scheme, port, path
/// and query intact.
fn replace_host(url: &Url, ip: IpAddr) -> Option<Url> {
    let mut resolved = url.clone();
    resolved.set_ip_host(ip).ok()?;
    Some(resolved)
}
