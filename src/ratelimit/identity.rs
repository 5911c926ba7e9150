//! Client identity derivation.

use std::net::{IpAddr, SocketAddr};

/// Identity used when neither a peer address nor a trusted header is known.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Header set by reverse proxies with the original client chain.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
/// Header set by some reverse proxies with the original client address.
pub const X_REAL_IP: &str = "x-real-ip";

/// The key that isolates one client's rate limit state.
///
/// Identities are normalized IP address strings: ports are dropped and
/// IPv4-mapped IPv6 addresses are folded back to IPv4, so the same client
/// always lands in the same bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    /// Identity of a directly connected peer.
    pub fn from_peer(peer: SocketAddr) -> Self {
        Self::from_ip(peer.ip())
    }

    /// Identity of a bare IP address.
    pub fn from_ip(ip: IpAddr) -> Self {
        Self(ip.to_canonical().to_string())
    }

    /// Derive the identity of a request.
    ///
    /// When `trust_forwarded` is set, the left-most `X-Forwarded-For` entry
    /// wins, then `X-Real-IP`. Header values that do not parse as an IP
    /// address are ignored. Otherwise the peer address is used.
    pub fn resolve<'a, F>(peer: Option<SocketAddr>, header: F, trust_forwarded: bool) -> Self
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        if trust_forwarded {
            let forwarded = header(X_FORWARDED_FOR)
                .and_then(|v| v.split(',').next())
                .and_then(parse_ip);
            if let Some(ip) = forwarded.or_else(|| header(X_REAL_IP).and_then(parse_ip)) {
                return Self::from_ip(ip);
            }
        }

        match peer {
            Some(peer) => Self::from_peer(peer),
            None => Self(UNKNOWN_IDENTITY.to_string()),
        }
    }

    /// The identity as a registry key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a header value that may carry a port or IPv6 brackets.
fn parse_ip(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim();
    raw.parse::<IpAddr>()
        .ok()
        .or_else(|| raw.parse::<SocketAddr>().ok().map(|s| s.ip()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve(
        peer: Option<&str>,
        headers: &[(&'static str, &'static str)],
        trust: bool,
    ) -> ClientIdentity {
        let headers: HashMap<&str, &'static str> = headers.iter().copied().collect();
        let peer = peer.map(|p| p.parse().unwrap());
        ClientIdentity::resolve(peer, |name| headers.get(name).copied(), trust)
    }

    #[test]
    fn test_peer_port_is_dropped() {
        let a = ClientIdentity::from_peer("192.168.1.7:50000".parse().unwrap());
        let b = ClientIdentity::from_peer("192.168.1.7:50001".parse().unwrap());
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "192.168.1.7");
    }

    #[test]
    fn test_ipv4_mapped_ipv6_is_folded() {
        let id = ClientIdentity::from_peer("[::ffff:10.0.0.1]:8080".parse().unwrap());
        assert_eq!(id.as_str(), "10.0.0.1");
    }

    #[test]
    fn test_ipv6_peer() {
        let id = ClientIdentity::from_peer("[2001:db8::1]:443".parse().unwrap());
        assert_eq!(id.to_string(), "2001:db8::1");
    }

    #[test]
    fn test_forwarded_headers_ignored_by_default() {
        let id = resolve(Some("10.0.0.1:1234"), &[(X_FORWARDED_FOR, "1.2.3.4")], false);
        assert_eq!(id.as_str(), "10.0.0.1");
    }

    #[test]
    fn test_forwarded_for_leftmost_entry_wins() {
        let id = resolve(
            Some("10.0.0.1:1234"),
            &[(X_FORWARDED_FOR, " 1.2.3.4 , 172.16.0.1"), (X_REAL_IP, "5.6.7.8")],
            true,
        );
        assert_eq!(id.as_str(), "1.2.3.4");
    }

    #[test]
    fn test_real_ip_fallback() {
        let id = resolve(Some("10.0.0.1:1234"), &[(X_REAL_IP, "5.6.7.8:9999")], true);
        assert_eq!(id.as_str(), "5.6.7.8");
    }

    #[test]
    fn test_garbage_header_falls_back_to_peer() {
        let id = resolve(Some("10.0.0.1:1234"), &[(X_FORWARDED_FOR, "not-an-ip")], true);
        assert_eq!(id.as_str(), "10.0.0.1");
    }

    #[test]
    fn test_unknown_without_peer() {
        let id = resolve(None, &[], true);
        assert_eq!(id.as_str(), UNKNOWN_IDENTITY);
    }
}
