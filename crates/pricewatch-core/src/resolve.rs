use crate::error::PricingError;
use std::net::IpAddr;
use url::{Host, Url};

/// Normalize a user-supplied site URL: trim, default to https, ensure a
/// non-empty path.
pub fn normalize_url(input: &str) -> Result<Url, PricingError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(PricingError::InvalidUrl("empty url".into()));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let mut url = Url::parse(&candidate)
        .map_err(|e| PricingError::InvalidUrl(format!("{}: {}", trimmed, e)))?;

    if url.path().is_empty() {
        url.set_path("/");
    }

    Ok(url)
}

/// Syntactic SSRF validation: only http(s), and IP-literal hosts must not
/// point at loopback, private, or link-local ranges. Hostnames that resolve
/// to forbidden ranges are caught by `ensure_public_host` before any request
/// is issued.
pub fn validate_url(url: &Url) -> Result<(), PricingError> {
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(PricingError::InvalidUrl(format!(
                "unsupported scheme: {}",
                other
            )))
        }
    }

    match url.host() {
        None => return Err(PricingError::InvalidUrl("missing host".into())),
        Some(Host::Ipv4(addr)) => {
            if is_forbidden_addr(IpAddr::V4(addr)) {
                return Err(PricingError::InvalidUrl(format!(
                    "forbidden address: {}",
                    addr
                )));
            }
        }
        Some(Host::Ipv6(addr)) => {
            if is_forbidden_addr(IpAddr::V6(addr)) {
                return Err(PricingError::InvalidUrl(format!(
                    "forbidden address: {}",
                    addr
                )));
            }
        }
        Some(Host::Domain(domain)) => {
            if domain.eq_ignore_ascii_case("localhost")
                || domain.to_ascii_lowercase().ends_with(".localhost")
            {
                return Err(PricingError::InvalidUrl("forbidden host: localhost".into()));
            }
        }
    }

    Ok(())
}

/// DNS-resolve the host and reject if any resolved address lands in a
/// forbidden range. Fetch targets are fully user-controlled, so this runs
/// again immediately before the GET.
pub async fn ensure_public_host(url: &Url) -> Result<(), PricingError> {
    validate_url(url)?;

    let host = match url.host() {
        Some(Host::Domain(d)) => d.to_string(),
        // IP literals were already checked syntactically.
        _ => return Ok(()),
    };
    let port = url.port_or_known_default().unwrap_or(443);

    let addrs = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|e| PricingError::InvalidUrl(format!("dns lookup failed for {}: {}", host, e)))?;

    for addr in addrs {
        if is_forbidden_addr(addr.ip()) {
            return Err(PricingError::InvalidUrl(format!(
                "host {} resolves to forbidden address {}",
                host,
                addr.ip()
            )));
        }
    }

    Ok(())
}

/// Loopback, private, link-local, unspecified, and broadcast ranges are all
/// off-limits, for both address families (including v4-mapped v6).
pub fn is_forbidden_addr(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_forbidden_addr(IpAddr::V4(mapped));
            }
            // fc00::/7 unique-local, fe80::/10 link-local
            let seg = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (seg & 0xfe00) == 0xfc00
                || (seg & 0xffc0) == 0xfe80
        }
    }
}
