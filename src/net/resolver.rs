//! Host name resolution
//!
//! Resolves a host-name endpoint to a numeric one through the system
//! resolver, honoring the transport's address-family support. When more
//! than one candidate address matches, one is chosen uniformly at random.

use std::net::{SocketAddr, ToSocketAddrs};

use rand::seq::SliceRandom;

use super::endpoint::{EndPoint, EndPointKind};
use super::Result;

/// Address families a transport (or proxy path) can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressSupport {
    pub ipv4: bool,
    pub ipv6: bool,
    /// Whether unresolved host names may be handed to the connect layer
    pub host_names: bool,
}

impl AddressSupport {
    /// Everything supported: numeric addresses of both families plus
    /// downstream host-name resolution.
    pub const ALL: AddressSupport = AddressSupport {
        ipv4: true,
        ipv6: true,
        host_names: true,
    };

    /// IPv4-only support
    pub const IPV4_ONLY: AddressSupport = AddressSupport {
        ipv4: true,
        ipv6: false,
        host_names: false,
    };

    /// The resolution preference implied by this support set
    pub fn ip_support(&self) -> IpSupport {
        if self.ipv6 {
            if self.ipv4 {
                IpSupport::NoPreference
            } else {
                IpSupport::RequiresIPv6
            }
        } else {
            IpSupport::RequiresIPv4
        }
    }
}

impl Default for AddressSupport {
    fn default() -> Self {
        AddressSupport::ALL
    }
}

/// Address-family requirement during resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpSupport {
    RequiresIPv4,
    NoPreference,
    RequiresIPv6,
}

/// Resolve a host-name endpoint to a numeric endpoint.
///
/// Numeric endpoints pass through unchanged. Returns `None` when the name
/// resolves to no address of a supported family; the caller decides
/// whether that is fatal.
pub fn resolve(endpoint: &EndPoint, support: IpSupport) -> Result<Option<EndPoint>> {
    if endpoint.kind() != EndPointKind::HostName {
        return Ok(Some(endpoint.clone()));
    }

    let all: Vec<SocketAddr> = (endpoint.host(), endpoint.port()).to_socket_addrs()?.collect();

    let v4: Vec<&SocketAddr> = all.iter().filter(|a| a.is_ipv4()).collect();
    let mut v6: Vec<&SocketAddr> = all.iter().filter(|a| a.is_ipv6()).collect();

    let mut rng = rand::thread_rng();
    let chosen = match support {
        IpSupport::RequiresIPv4 => v4.choose(&mut rng).copied(),
        IpSupport::RequiresIPv6 => v6.choose(&mut rng).copied(),
        IpSupport::NoPreference => {
            // IPv4 candidates fold into the IPv6 list; the pick is
            // uniform over the union
            v6.extend(&v4);
            v6.choose(&mut rng).copied()
        }
    };

    Ok(chosen.map(|addr| EndPoint::new(addr.ip().to_string(), endpoint.port())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_endpoint_passes_through() {
        let ep = EndPoint::new("127.0.0.1", 80);
        let resolved = resolve(&ep, IpSupport::RequiresIPv4).unwrap().unwrap();
        assert_eq!(resolved, ep);

        let ep6 = EndPoint::new("::1", 80);
        // Family requirement does not apply to already-numeric endpoints
        let resolved = resolve(&ep6, IpSupport::RequiresIPv4).unwrap().unwrap();
        assert_eq!(resolved, ep6);
    }

    #[test]
    fn test_resolve_localhost_ipv4() {
        let ep = EndPoint::new("localhost", 80);
        let resolved = resolve(&ep, IpSupport::RequiresIPv4).unwrap();
        if let Some(resolved) = resolved {
            assert_eq!(resolved.kind(), EndPointKind::IPv4);
            assert_eq!(resolved.port(), 80);
        }
    }

    #[test]
    fn test_ip_support_from_address_support() {
        assert_eq!(AddressSupport::ALL.ip_support(), IpSupport::NoPreference);
        assert_eq!(
            AddressSupport::IPV4_ONLY.ip_support(),
            IpSupport::RequiresIPv4
        );
        let v6_only = AddressSupport {
            ipv4: false,
            ipv6: true,
            host_names: false,
        };
        assert_eq!(v6_only.ip_support(), IpSupport::RequiresIPv6);
    }
}
