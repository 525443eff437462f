use std::net::IpAddr;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum UrlValidationError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    #[error("Localhost not allowed")]
    Localhost,
    #[error("Insecure API base URL: HTTPS required (except localhost)")]
    InsecureBase,
}

/// Validate a server-supplied article URL before fetching it.
///
/// Rejects non-HTTP(S) schemes, localhost and private/link-local addresses so
/// a hostile feed cannot point the client at internal services.
pub fn validate_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str)?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(UrlValidationError::UnsupportedScheme(url.scheme().to_owned()));
    }

    let Some(host) = url.host_str() else {
        return Ok(url);
    };
    if host.eq_ignore_ascii_case("localhost") {
        return Err(UrlValidationError::Localhost);
    }

    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        if ip.is_loopback() {
            return Err(UrlValidationError::Localhost);
        }
        if is_internal_ip(&ip) {
            return Err(UrlValidationError::PrivateIp(ip.to_string()));
        }
    }

    Ok(url)
}

/// Parse the configured API base URL. Plain HTTP is only accepted for
/// localhost, where test servers live.
pub fn validate_base_url(base: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(base)?;
    match url.scheme() {
        "https" => Ok(url),
        "http" => {
            let local = matches!(url.host_str(), Some("localhost") | Some("127.0.0.1") | Some("[::1]"));
            if local {
                tracing::warn!(base_url = %base, "Using non-HTTPS API base URL (localhost only)");
                Ok(url)
            } else {
                Err(UrlValidationError::InsecureBase)
            }
        }
        other => Err(UrlValidationError::UnsupportedScheme(other.to_owned())),
    }
}

/// True when both URLs share scheme, host and port
pub fn same_origin(a: &Url, b: &Url) -> bool {
    a.origin() == b.origin()
}

fn is_internal_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
        }
    }
}
