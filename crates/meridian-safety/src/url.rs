//! Outbound URL validation (SSRF defense).
//!
//! Checks scheme, hostname, resolved addresses, and port before any HTTP
//! tool emits a request. DNS resolution runs over *every* address a
//! hostname resolves to, which also catches rebinding setups where a public
//! name points at a private address. Redirect chains are the caller's
//! responsibility: re-validate each hop (see the web tool).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};

use tracing::warn;
use url::{Host, Url};

/// Known cloud metadata endpoints.
const METADATA_HOSTS: &[&str] = &[
    "169.254.169.254",
    "metadata.google.internal",
    "metadata.google",
    "100.100.100.200",
];

/// Localhost aliases that skip DNS entirely.
const LOCALHOST_ALIASES: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "ip6-localhost",
    "ip6-loopback",
];

/// Well-known internal service ports that outbound tools may not target.
const BLOCKED_PORTS: &[u16] = &[
    22,    // SSH
    23,    // Telnet
    25,    // SMTP
    2379,  // etcd
    3306,  // MySQL
    5432,  // PostgreSQL
    6379,  // Redis
    9200,  // Elasticsearch
    11211, // Memcached
    27017, // MongoDB
];

/// Validate a URL for a safe outbound request.
///
/// Returns the parsed URL on success, a stable error string on refusal.
pub fn validate_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|_| format!("Invalid URL: {raw}"))?;

    let scheme = url.scheme().to_ascii_lowercase();
    if scheme != "http" && scheme != "https" {
        return Err(format!(
            "URL scheme '{scheme}' is not allowed. Use http:// or https://."
        ));
    }

    let host = match url.host() {
        Some(h) => h,
        None => return Err("URL has no hostname.".to_string()),
    };

    match host {
        Host::Domain(name) => {
            let lower = name.to_ascii_lowercase();
            if LOCALHOST_ALIASES.contains(&lower.as_str()) {
                return Err(format!("Access to private/local address '{lower}' is blocked."));
            }
            if METADATA_HOSTS.contains(&lower.as_str()) {
                return Err(format!(
                    "Access to cloud metadata endpoint '{lower}' is blocked."
                ));
            }
            if let Some(ip) = resolve_dangerous(&lower) {
                warn!(host = %lower, %ip, "DNS resolution hit a private address");
                return Err(format!("Access to private/local address '{lower}' is blocked."));
            }
        }
        Host::Ipv4(addr) => {
            if METADATA_HOSTS.contains(&addr.to_string().as_str()) {
                return Err(format!(
                    "Access to cloud metadata endpoint '{addr}' is blocked."
                ));
            }
            if is_dangerous_v4(&addr) {
                return Err(format!("Access to private/local address '{addr}' is blocked."));
            }
        }
        Host::Ipv6(addr) => {
            if is_dangerous_v6(&addr) {
                return Err(format!("Access to private/local address '{addr}' is blocked."));
            }
        }
    }

    if let Some(port) = url.port() {
        if BLOCKED_PORTS.contains(&port) {
            return Err(format!(
                "Access to port {port} is blocked (common internal service port)."
            ));
        }
    }

    Ok(url)
}

/// Resolve a hostname and return the first dangerous address, if any.
///
/// Resolution failure is not treated as dangerous: a name that does not
/// resolve cannot be fetched at all.
fn resolve_dangerous(hostname: &str) -> Option<IpAddr> {
    let addrs = format!("{hostname}:80").to_socket_addrs().ok()?;
    for addr in addrs {
        let dangerous = match addr.ip() {
            IpAddr::V4(v4) => is_dangerous_v4(&v4),
            IpAddr::V6(v6) => is_dangerous_v6(&v6),
        };
        if dangerous {
            return Some(addr.ip());
        }
    }
    None
}

/// Private, loopback, link-local, reserved, multicast, or otherwise
/// non-routable IPv4 space.
fn is_dangerous_v4(addr: &Ipv4Addr) -> bool {
    let o = addr.octets();
    addr.is_private()
        || addr.is_loopback()
        || addr.is_link_local()
        || addr.is_multicast()
        || addr.is_broadcast()
        || addr.is_unspecified()
        || o[0] >= 240 // reserved 240.0.0.0/4
        || (o[0] == 100 && (o[1] & 0xC0) == 64) // shared 100.64.0.0/10
        || (o[0] == 192 && o[1] == 0 && o[2] == 0) // IETF protocol assignments
}

/// Loopback, unique-local, link-local, multicast, or v4-mapped-dangerous
/// IPv6 space.
fn is_dangerous_v6(addr: &Ipv6Addr) -> bool {
    if let Some(v4) = addr.to_ipv4_mapped() {
        return is_dangerous_v4(&v4);
    }
    let seg = addr.segments();
    addr.is_loopback()
        || addr.is_multicast()
        || addr.is_unspecified()
        || (seg[0] & 0xfe00) == 0xfc00 // unique local fc00::/7
        || (seg[0] & 0xffc0) == 0xfe80 // link local fe80::/10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_schemes() {
        assert!(validate_url("ftp://example.com/file").is_err());
        assert!(validate_url("file:///etc/passwd").is_err());
        assert!(validate_url("gopher://example.com/").is_err());
    }

    #[test]
    fn rejects_localhost_aliases() {
        assert!(validate_url("http://localhost/admin").is_err());
        assert!(validate_url("http://localhost.localdomain/").is_err());
    }

    #[test]
    fn rejects_loopback_literals() {
        assert!(validate_url("http://127.0.0.1/").is_err());
        assert!(validate_url("http://127.8.9.1/").is_err());
        assert!(validate_url("http://[::1]/").is_err());
    }

    #[test]
    fn rejects_private_ranges() {
        assert!(validate_url("http://10.0.0.5/").is_err());
        assert!(validate_url("http://172.16.1.1/").is_err());
        assert!(validate_url("http://192.168.1.10/").is_err());
        assert!(validate_url("http://100.64.0.1/").is_err());
    }

    #[test]
    fn rejects_metadata_endpoints() {
        let err = validate_url("http://169.254.169.254/latest/meta-data/").unwrap_err();
        assert!(err.contains("blocked"));
        assert!(validate_url("http://metadata.google.internal/computeMetadata/").is_err());
        assert!(validate_url("http://100.100.100.200/latest/").is_err());
    }

    #[test]
    fn rejects_v4_mapped_v6_loopback() {
        assert!(validate_url("http://[::ffff:127.0.0.1]/").is_err());
    }

    #[test]
    fn rejects_internal_service_ports() {
        let err = validate_url("http://example.com:6379/").unwrap_err();
        assert!(err.contains("port 6379"));
        assert!(validate_url("http://example.com:22/").is_err());
        assert!(validate_url("http://example.com:5432/").is_err());
    }

    #[test]
    fn accepts_public_https() {
        assert!(validate_url("https://example.com/page").is_ok());
        assert!(validate_url("http://93.184.216.34/").is_ok());
    }

    #[test]
    fn unique_local_v6_is_dangerous() {
        assert!(is_dangerous_v6(&"fd00::1".parse().unwrap()));
        assert!(is_dangerous_v6(&"fe80::1".parse().unwrap()));
        assert!(!is_dangerous_v6(&"2606:2800:220:1::1".parse().unwrap()));
    }
}
