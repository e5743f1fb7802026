//! Private/reserved address guard applied before every outbound fetch.
//!
//! Target hosts that are, or resolve to, loopback/RFC1918/link-local/CGNAT
//! ranges (and their IPv6 equivalents, including IPv4-mapped forms) are
//! rejected regardless of robots or rate-limit state. This check is
//! independent of the manifest host allow-list.

use std::net::{IpAddr, Ipv4Addr};

use thiserror::Error;

/// Reasons a host fails the guard.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum HostGuardError {
    #[error("host `{0}` is in a private or reserved address range")]
    PrivateAddress(String),
    #[error("host `{0}` did not resolve: {1}")]
    Resolution(String, String),
}

/// Classifies a single address as private/reserved.
///
/// IPv4: loopback, 10/8, 172.16/12, 192.168/16, link-local 169.254/16,
/// CGNAT 100.64/10, unspecified, broadcast. IPv6: loopback, unique-local
/// `fc00::/7`, link-local `fe80::/10`, unspecified; IPv4-mapped addresses
/// are classified by their embedded IPv4.
pub fn is_private_or_reserved_addr(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_private_v4(mapped);
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
        }
    }
}

fn is_private_v4(v4: Ipv4Addr) -> bool {
    let octets = v4.octets();
    let cgnat = octets[0] == 100 && (octets[1] & 0xc0) == 64;
    v4.is_loopback()
        || v4.is_private()
        || v4.is_link_local()
        || v4.is_unspecified()
        || v4.is_broadcast()
        || cgnat
}

/// IP-literal form of the guard. Hostnames that are not address literals
/// return `false` here; resolution-based checking is [`ensure_public_host`].
pub fn is_private_or_reserved_host(host: &str) -> bool {
    match literal_addr(host) {
        Some(addr) => is_private_or_reserved_addr(addr),
        None => false,
    }
}

fn literal_addr(host: &str) -> Option<IpAddr> {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .ok()
}

/// Resolves the host and rejects it when any resolved address is
/// private/reserved. Address literals skip DNS entirely.
pub async fn ensure_public_host(host: &str) -> Result<(), HostGuardError> {
    if let Some(addr) = literal_addr(host) {
        if is_private_or_reserved_addr(addr) {
            return Err(HostGuardError::PrivateAddress(host.to_string()));
        }
        return Ok(());
    }

    let resolved = tokio::net::lookup_host((host, 443u16))
        .await
        .map_err(|err| HostGuardError::Resolution(host.to_string(), err.to_string()))?;
    for socket in resolved {
        if is_private_or_reserved_addr(socket.ip()) {
            return Err(HostGuardError::PrivateAddress(host.to_string()));
        }
    }
    Ok(())
}
