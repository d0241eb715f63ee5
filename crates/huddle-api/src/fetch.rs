//! Remote media fetching for `/rehost` and `/download`.

use std::error::Error as StdError;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::{Client, Url, header};
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ApiError;

const MAX_REDIRECTS: usize = 5;
const FALLBACK_NAME: &str = "download";

/// A remote file pulled into memory, already checked for type and size.
#[derive(Debug)]
pub struct FetchedMedia {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub original_name: String,
}

/// A host that is, or only resolves to, an address we refuse to contact.
#[derive(Debug, Error)]
#[error("host not allowed: {0}")]
pub struct ForbiddenAddress(pub String);

/// DNS resolver that only hands out public addresses. A name whose every
/// address is private or loopback fails to resolve.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublicResolver;

impl Resolve for PublicResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(resolve_public(name.as_str().to_string()))
    }
}

async fn resolve_public(host: String) -> Result<Addrs, Box<dyn StdError + Send + Sync>> {
    let resolved = tokio::net::lookup_host((host.as_str(), 0)).await?;
    let addrs = public_addrs(resolved);
    if addrs.is_empty() {
        warn!("Refusing to fetch from {}: no public address", host);
        return Err(Box::new(ForbiddenAddress(host)));
    }
    Ok(Box::new(addrs.into_iter()))
}

/// The addresses safe to connect to, in resolver order.
pub fn public_addrs(addrs: impl IntoIterator<Item = SocketAddr>) -> Vec<SocketAddr> {
    addrs
        .into_iter()
        .filter(|addr| !is_forbidden_ip(addr.ip()))
        .collect()
}

/// HTTP client for remote fetches. Every name is resolved through
/// `PublicResolver`, and redirects are followed only to hosts that pass the
/// same check as the original URL.
pub fn build_client(timeout: Duration) -> reqwest::Result<Client> {
    let policy = reqwest::redirect::Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        match attempt.url().host_str() {
            Some(host) if !is_forbidden_host(host) => attempt.follow(),
            Some(host) => {
                let host = host.to_string();
                attempt.error(ForbiddenAddress(host))
            }
            None => attempt.error("redirect without a host"),
        }
    });

    // A proxy would resolve names on our behalf
    Client::builder()
        .timeout(timeout)
        .redirect(policy)
        .dns_resolver(Arc::new(PublicResolver))
        .no_proxy()
        .user_agent(concat!("huddle/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Parse a client-supplied URL and refuse anything that is not plain
/// http(s) to a public host.
pub fn validate_url(raw: &str) -> Result<Url, ApiError> {
    let url = Url::parse(raw.trim()).map_err(|e| ApiError::InvalidUrl(e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ApiError::InvalidUrl(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }

    let Some(host) = url.host_str() else {
        return Err(ApiError::InvalidUrl("missing host".into()));
    };
    if is_forbidden_host(host) {
        return Err(ApiError::InvalidHost(host.to_string()));
    }

    Ok(url)
}

/// Localhost names and loopback, private, link-local or unspecified IPs.
pub fn is_forbidden_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let lower = host.to_ascii_lowercase();
    if lower == "localhost" || lower.ends_with(".localhost") {
        return true;
    }

    host.parse::<IpAddr>().is_ok_and(is_forbidden_ip)
}

fn is_forbidden_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(ip) => is_forbidden_v4(ip),
        IpAddr::V6(ip) => is_forbidden_v6(ip),
    }
}

fn is_forbidden_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // 100.64.0.0/10 carrier-grade NAT
        || (ip.octets()[0] == 100 && (ip.octets()[1] & 0xc0) == 64)
}

fn is_forbidden_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_forbidden_v4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}

pub fn is_media_type(mime: &str) -> bool {
    let essence = essence(mime);
    essence.starts_with("image/") || essence.starts_with("audio/") || essence.starts_with("video/")
}

/// `type/subtype` without parameters, lowercased.
pub fn essence(mime: &str) -> String {
    mime.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Last path segment of the URL, or a generic name.
pub fn original_name(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| FALLBACK_NAME.to_string())
}

/// File extension for a stored blob: the name's own extension if it has
/// one, else the MIME subtype (`image/svg+xml` -> `svg`).
pub fn extension_for(name: &str, mime: &str) -> Option<String> {
    if let Some((stem, ext)) = name.rsplit_once('.') {
        if !stem.is_empty() && !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Some(ext.to_ascii_lowercase());
        }
    }

    let essence = essence(mime);
    let subtype = essence.split_once('/')?.1;
    let subtype = subtype.split('+').next().unwrap_or_default();
    let subtype = subtype.strip_prefix("x-").unwrap_or(subtype);
    (!subtype.is_empty()).then(|| subtype.to_string())
}

/// GET a validated URL, requiring a media content type and at most
/// `max_bytes` of body.
pub async fn fetch_media(client: &Client, url: Url, max_bytes: usize) -> Result<FetchedMedia, ApiError> {
    debug!("Fetching {}", url);

    let response = client.get(url.clone()).send().await.map_err(map_reqwest)?;

    let status = response.status();
    if !status.is_success() {
        warn!("Upstream {} responded {}", url, status);
        return Err(ApiError::Upstream(status.as_u16()));
    }

    let mime = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(essence)
        .unwrap_or_default();
    if !is_media_type(&mime) {
        return Err(ApiError::UnsupportedMedia(if mime.is_empty() {
            "missing content type".into()
        } else {
            mime
        }));
    }

    if let Some(len) = response.content_length() {
        if len > max_bytes as u64 {
            return Err(ApiError::TooLarge { max: max_bytes });
        }
    }

    // Content-Length can lie or be absent, so count while streaming
    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(map_reqwest)?;
        if bytes.len() + chunk.len() > max_bytes {
            return Err(ApiError::TooLarge { max: max_bytes });
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(FetchedMedia {
        bytes,
        mime,
        original_name: original_name(&url),
    })
}

fn map_reqwest(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        return ApiError::Timeout;
    }
    if let Some(forbidden) = forbidden_cause(&e) {
        return ApiError::InvalidHost(forbidden.0.clone());
    }
    ApiError::Fetch(e.to_string())
}

fn forbidden_cause(e: &reqwest::Error) -> Option<&ForbiddenAddress> {
    let mut cause = e.source();
    while let Some(err) = cause {
        if let Some(forbidden) = err.downcast_ref::<ForbiddenAddress>() {
            return Some(forbidden);
        }
        cause = err.source();
    }
    None
}
