use crate::error::{Error, Result};
use std::net::{IpAddr, Ipv4Addr};
use tracing::debug;

/// Resolve a host name or dotted-quad address to the IPv4 address to probe.
pub fn resolve_destination(host: &str) -> Result<Ipv4Addr> {
    if let Ok(addr) = host.parse::<Ipv4Addr>() {
        return Ok(addr);
    }
    let addrs = dns_lookup::lookup_host(host).map_err(|e| Error::AddressResolution {
        host: host.to_string(),
        reason: e.to_string(),
    })?;
    let addr = addrs
        .into_iter()
        .find_map(|addr| match addr {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| Error::AddressResolution {
            host: host.to_string(),
            reason: "no IPv4 address".to_string(),
        })?;
    debug!(host, %addr, "resolved destination");
    Ok(addr)
}

/// Maps responder addresses back to host names.
pub trait ReverseResolver {
    /// The host name of `addr`, or `None` if it has none.
    fn reverse(&self, addr: Ipv4Addr) -> Option<String>;
}

/// Reverse lookups through the system resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct DnsResolver;

impl ReverseResolver for DnsResolver {
    fn reverse(&self, addr: Ipv4Addr) -> Option<String> {
        dns_lookup::lookup_addr(&IpAddr::V4(addr))
            .inspect_err(|err| debug!(%addr, %err, "reverse lookup failed"))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_dotted_quad() {
        assert_eq!(
            Ipv4Addr::new(192, 0, 2, 7),
            resolve_destination("192.0.2.7").unwrap()
        );
    }

    #[test]
    fn test_resolve_invalid_host() {
        let err = resolve_destination("no such host.invalid").unwrap_err();
        assert!(matches!(
            err,
            Error::AddressResolution { host, .. } if host == "no such host.invalid"
        ));
    }
}
