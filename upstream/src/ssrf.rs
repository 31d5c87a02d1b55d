use domain::AppError;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use url::Host;

/// §4.A / §8 invariant 8: reject any outbound host that resolves to an
/// RFC-1918, loopback, link-local, multicast, or test-range address before
/// a single request byte is sent. Applies to both the request URL's host
/// and a proxy's host.
pub async fn guard_host(host: &str) -> Result<(), AppError> {
    let parsed = Host::parse(host)
        .map_err(|e| AppError::Validation(format!("invalid host '{host}': {e}")))?;

    let addrs: Vec<IpAddr> = match parsed {
        Host::Ipv4(v4) => vec![IpAddr::V4(v4)],
        Host::Ipv6(v6) => vec![IpAddr::V6(v6)],
        Host::Domain(name) => resolve(&name).await?,
    };

    if addrs.is_empty() {
        return Err(AppError::Validation(format!(
            "host '{host}' did not resolve to any address"
        )));
    }

    for addr in addrs {
        if is_forbidden(addr) {
            return Err(AppError::Validation(format!(
                "host '{host}' resolves to a forbidden address range ({addr})"
            )));
        }
    }

    Ok(())
}

async fn resolve(domain: &str) -> Result<Vec<IpAddr>, AppError> {
    let lookup = format!("{domain}:0");
    tokio::net::lookup_host(lookup)
        .await
        .map(|iter| iter.map(|sa| sa.ip()).collect())
        .map_err(|e| AppError::Validation(format!("DNS resolution failed for '{domain}': {e}")))
}

fn is_forbidden(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_forbidden_v4(v4),
        IpAddr::V6(v6) => is_forbidden_v6(v6),
    }
}

fn is_forbidden_v4(addr: Ipv4Addr) -> bool {
    addr.is_private()
        || addr.is_loopback()
        || addr.is_link_local()
        || addr.is_multicast()
        || addr.is_unspecified()
        || addr.is_broadcast()
        || addr.is_documentation()
        // 100.64.0.0/10 carrier-grade NAT
        || (addr.octets()[0] == 100 && (64..=127).contains(&addr.octets()[1]))
}

fn is_forbidden_v6(addr: Ipv6Addr) -> bool {
    if addr.is_loopback() || addr.is_multicast() || addr.is_unspecified() {
        return true;
    }
    let segments = addr.segments();
    // fe80::/10 link-local
    if (segments[0] & 0xffc0) == 0xfe80 {
        return true;
    }
    // fc00::/7 unique local
    if (segments[0] & 0xfe00) == 0xfc00 {
        return true;
    }
    // ::ffff:0:0/96 IPv4-mapped — re-check the embedded v4 address.
    if let Some(v4) = addr.to_ipv4_mapped() {
        return is_forbidden_v4(v4);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_loopback() {
        assert!(guard_host("127.0.0.1").await.is_err());
    }

    #[tokio::test]
    async fn rejects_private_v4() {
        assert!(guard_host("10.0.0.5").await.is_err());
        assert!(guard_host("192.168.1.1").await.is_err());
        assert!(guard_host("172.16.0.1").await.is_err());
    }

    #[tokio::test]
    async fn rejects_link_local() {
        assert!(guard_host("169.254.1.1").await.is_err());
    }

    #[tokio::test]
    async fn rejects_multicast() {
        assert!(guard_host("224.0.0.1").await.is_err());
    }

    #[tokio::test]
    async fn rejects_unresolved_domain() {
        assert!(guard_host("this-host-does-not-exist.invalid").await.is_err());
    }
}
