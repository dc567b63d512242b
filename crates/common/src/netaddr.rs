//! Address classification for router endpoints
//!
//! Keep-alive policy needs to know whether an endpoint host sits behind NAT
//! (private) or is publicly reachable (exit).

use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use tracing::debug;

/// Resolve an endpoint host to an IPv4 address.
///
/// Literals are parsed directly; anything else goes through the system
/// resolver and the first IPv4 answer wins.
pub fn resolve_ipv4(host: &str) -> Option<Ipv4Addr> {
    let host = host.trim();
    if host.is_empty() {
        return None;
    }
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Some(ip);
    }
    match (host, 0u16).to_socket_addrs() {
        Ok(addrs) => addrs.into_iter().find_map(|a| match a.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        }),
        Err(e) => {
            debug!("cannot resolve endpoint host {}: {}", host, e);
            None
        }
    }
}

fn is_shared(ip: Ipv4Addr) -> bool {
    // 100.64.0.0/10, carrier-grade NAT
    let o = ip.octets();
    o[0] == 100 && (o[1] & 0xc0) == 64
}

/// RFC 1918 and carrier-grade NAT space
pub fn is_private(ip: Ipv4Addr) -> bool {
    ip.is_private() || is_shared(ip)
}

/// Globally routable unicast address
pub fn is_exit(ip: Ipv4Addr) -> bool {
    !(is_private(ip)
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_multicast())
}

pub fn host_is_private(host: &str) -> bool {
    resolve_ipv4(host).map_or(false, is_private)
}

pub fn host_is_exit(host: &str) -> bool {
    resolve_ipv4(host).map_or(false, is_exit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("10.0.0.5", true, false)]
    #[test_case("192.168.1.1", true, false)]
    #[test_case("172.20.3.4", true, false)]
    #[test_case("100.64.1.1", true, false)]
    #[test_case("203.0.113.9", false, true)]
    #[test_case("8.8.8.8", false, true)]
    #[test_case("127.0.0.1", false, false)]
    #[test_case("169.254.0.1", false, false)]
    #[test_case("", false, false)]
    fn test_classification(host: &str, private: bool, exit: bool) {
        assert_eq!(host_is_private(host), private);
        assert_eq!(host_is_exit(host), exit);
    }
}
