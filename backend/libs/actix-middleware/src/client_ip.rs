//! Client identity derivation for the admission layer.
//!
//! "The IP that matters for rate limiting and audit" is not simply the
//! directly-connected peer: a peer behind a trusted load balancer forwards
//! the real client in `X-Forwarded-For`/`X-Real-IP`, but those headers are
//! attacker-controlled from any untrusted peer, so they're only honored
//! from addresses we've been told to trust. The trusted-range table below
//! is the RFC1918 + loopback + `fd00::/8` default.
use actix_web::dev::ServiceRequest;
use actix_web::HttpRequest;
use ipnetwork::IpNetwork;
use std::net::IpAddr;
use std::str::FromStr;

/// Default trusted proxy ranges: RFC1918 private space, loopback, and the
/// IPv6 unique-local block.
pub fn default_trusted_ranges() -> Vec<IpNetwork> {
    [
        "10.0.0.0/8",
        "172.16.0.0/12",
        "192.168.0.0/16",
        "127.0.0.0/8",
        "::1/128",
        "fd00::/8",
    ]
    .iter()
    .map(|s| IpNetwork::from_str(s).expect("static trusted range is valid CIDR"))
    .collect()
}

#[derive(Clone)]
pub struct TrustedProxies {
    ranges: Vec<IpNetwork>,
}

impl Default for TrustedProxies {
    fn default() -> Self {
        Self { ranges: default_trusted_ranges() }
    }
}

impl TrustedProxies {
    pub fn new(ranges: Vec<IpNetwork>) -> Self {
        Self { ranges }
    }

    /// Parse a comma-separated CIDR list from `TRUSTED_PROXY_CIDRS`, falling
    /// back to the built-in default when unset or unparseable.
    pub fn from_env() -> Self {
        match std::env::var("TRUSTED_PROXY_CIDRS") {
            Ok(raw) => {
                let ranges: Vec<IpNetwork> = raw
                    .split(',')
                    .filter_map(|s| IpNetwork::from_str(s.trim()).ok())
                    .collect();
                if ranges.is_empty() {
                    Self::default()
                } else {
                    Self { ranges }
                }
            }
            Err(_) => Self::default(),
        }
    }

    pub fn is_trusted(&self, ip: IpAddr) -> bool {
        self.ranges.iter().any(|net| net.contains(ip))
    }
}

/// Resolve the client identity for one request: the peer IP if it isn't a
/// trusted proxy, otherwise the first hop named in `X-Forwarded-For` (or
/// `X-Real-IP` if that header is absent). Falls back to `"unknown"` when the
/// connection info carries no peer address at all.
pub fn client_id(req: &HttpRequest, trusted: &TrustedProxies) -> String {
    resolve(req.connection_info().peer_addr().map(str::to_string), req.headers(), trusted)
}

/// Same resolution, usable from middleware `ServiceRequest` context.
pub fn client_id_from_service_request(req: &ServiceRequest, trusted: &TrustedProxies) -> String {
    resolve(req.connection_info().peer_addr().map(str::to_string), req.headers(), trusted)
}

fn resolve(
    peer_addr: Option<String>,
    headers: &actix_web::http::header::HeaderMap,
    trusted: &TrustedProxies,
) -> String {
    let peer_ip = peer_addr.as_deref().and_then(strip_port).and_then(|s| IpAddr::from_str(s).ok());

    if let Some(ip) = peer_ip {
        if trusted.is_trusted(ip) {
            if let Some(fwd) = headers.get("X-Forwarded-For").and_then(|v| v.to_str().ok()) {
                if let Some(first) = fwd.split(',').next() {
                    let candidate = first.trim();
                    if !candidate.is_empty() {
                        return candidate.to_string();
                    }
                }
            }
            if let Some(real_ip) = headers.get("X-Real-IP").and_then(|v| v.to_str().ok()) {
                let candidate = real_ip.trim();
                if !candidate.is_empty() {
                    return candidate.to_string();
                }
            }
        }
        return ip.to_string();
    }

    peer_addr.unwrap_or_else(|| "unknown".to_string())
}

/// `connection_info().peer_addr()` sometimes includes a `:port` suffix for
/// IPv4 peers; strip it before parsing as a bare `IpAddr`.
fn strip_port(addr: &str) -> Option<&str> {
    if addr.starts_with('[') {
        // bracketed IPv6 with port, e.g. "[::1]:8080"
        return addr.split(']').next().map(|s| s.trim_start_matches('['));
    }
    match addr.matches(':').count() {
        0 => Some(addr),
        1 => addr.split(':').next(),
        _ => Some(addr), // bare IPv6, no brackets, no port
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::header::{HeaderMap, HeaderName, HeaderValue};

    fn headers_with(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(HeaderName::from_bytes(k.as_bytes()).unwrap(), HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn untrusted_peer_with_forged_header_is_ignored() {
        let trusted = TrustedProxies::default();
        let headers = headers_with(&[("X-Forwarded-For", "127.0.0.1")]);
        let id = resolve(Some("203.0.113.99:443".to_string()), &headers, &trusted);
        assert_eq!(id, "203.0.113.99");
    }

    #[test]
    fn trusted_peer_forwards_first_hop() {
        let trusted = TrustedProxies::default();
        let headers = headers_with(&[("X-Forwarded-For", "203.0.113.42, 10.0.0.5")]);
        let id = resolve(Some("10.0.0.5:443".to_string()), &headers, &trusted);
        assert_eq!(id, "203.0.113.42");
    }

    #[test]
    fn trusted_peer_falls_back_to_real_ip() {
        let trusted = TrustedProxies::default();
        let headers = headers_with(&[("X-Real-IP", "198.51.100.7")]);
        let id = resolve(Some("127.0.0.1:80".to_string()), &headers, &trusted);
        assert_eq!(id, "198.51.100.7");
    }

    #[test]
    fn no_peer_address_yields_unknown() {
        let trusted = TrustedProxies::default();
        let headers = headers_with(&[]);
        let id = resolve(None, &headers, &trusted);
        assert_eq!(id, "unknown");
    }

    #[test]
    fn untrusted_peer_without_header_uses_peer_ip() {
        let trusted = TrustedProxies::default();
        let headers = headers_with(&[]);
        let id = resolve(Some("203.0.113.99:443".to_string()), &headers, &trusted);
        assert_eq!(id, "203.0.113.99");
    }
}
