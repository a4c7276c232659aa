//! Outbound network restrictions.
//!
//! # Design
//! - Checks run on resolved addresses, so a public hostname pointing at a
//!   private address is still rejected.
//! - Literal IP hosts skip DNS; the loader checks them before sending.
//! - IPv4-mapped IPv6 addresses are judged as their IPv4 form.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use ipnet::IpNet;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use tracing::warn;

/// Address classes and explicit networks the loader refuses to reach.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkPolicy {
    /// Reject loopback addresses.
    pub block_loopback: bool,
    /// Reject private and unique-local addresses.
    pub block_private: bool,
    /// Reject link-local addresses.
    pub block_link_local: bool,
    /// Reject addresses inside these networks.
    pub blocked_networks: Vec<IpNet>,
}

impl NetworkPolicy {
    /// Whether any restriction is configured.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.block_loopback
            || self.block_private
            || self.block_link_local
            || !self.blocked_networks.is_empty()
    }

    /// Whether `addr` falls inside a blocked class or network.
    #[must_use]
    pub fn is_blocked(&self, addr: IpAddr) -> bool {
        let addr = match addr {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(addr, IpAddr::V4),
            IpAddr::V4(_) => addr,
        };
        if self.block_loopback && addr.is_loopback() {
            return true;
        }
        if self.block_private && is_private(addr) {
            return true;
        }
        if self.block_link_local && is_link_local(addr) {
            return true;
        }
        self.blocked_networks.iter().any(|net| net.contains(&addr))
    }
}

fn is_private(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_private(),
        IpAddr::V6(v6) => v6.is_unique_local(),
    }
}

fn is_link_local(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => v6.is_unicast_link_local(),
    }
}

/// Resolution failure for a host whose addresses are all blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockedAddress;

const BLOCKED_MESSAGE: &str = "destination address blocked";

impl Display for BlockedAddress {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(BLOCKED_MESSAGE)
    }
}

impl Error for BlockedAddress {}

/// DNS resolver that filters out blocked addresses.
#[derive(Debug, Clone)]
pub(crate) struct GuardedResolver {
    policy: Arc<NetworkPolicy>,
}

impl GuardedResolver {
    pub(crate) const fn new(policy: Arc<NetworkPolicy>) -> Self {
        Self { policy }
    }
}

impl Resolve for GuardedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(lookup(Arc::clone(&self.policy), name.as_str().to_string()))
    }
}

async fn lookup(
    policy: Arc<NetworkPolicy>,
    host: String,
) -> Result<Addrs, Box<dyn Error + Send + Sync>> {
    let allowed: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0))
        .await?
        .filter(|addr| !policy.is_blocked(addr.ip()))
        .collect();
    if allowed.is_empty() {
        warn!(host = %host, "rejected blocked destination");
        return Err(Box::new(BlockedAddress));
    }
    Ok(Box::new(allowed.into_iter()))
}

/// Whether `err` or any of its sources is a [`BlockedAddress`].
///
/// Connectors may re-wrap resolver errors, so the message is matched too.
pub(crate) fn is_blocked_error(err: &(dyn Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(error) = current {
        if error.is::<BlockedAddress>() || error.to_string() == BLOCKED_MESSAGE {
            return true;
        }
        current = error.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn ip(value: &str) -> IpAddr {
        value.parse().unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }

    #[test]
    fn classes_are_blocked_independently() {
        let loopback = NetworkPolicy {
            block_loopback: true,
            ..NetworkPolicy::default()
        };
        assert!(loopback.is_active());
        assert!(loopback.is_blocked(ip("127.0.0.1")));
        assert!(loopback.is_blocked(IpAddr::V6(Ipv6Addr::LOCALHOST)));
        assert!(!loopback.is_blocked(ip("10.0.0.1")));

        let private = NetworkPolicy {
            block_private: true,
            ..NetworkPolicy::default()
        };
        assert!(private.is_blocked(ip("10.1.2.3")));
        assert!(private.is_blocked(ip("172.16.0.9")));
        assert!(private.is_blocked(ip("192.168.1.1")));
        assert!(private.is_blocked(ip("fd00::1")));
        assert!(!private.is_blocked(ip("8.8.8.8")));

        let link_local = NetworkPolicy {
            block_link_local: true,
            ..NetworkPolicy::default()
        };
        assert!(link_local.is_blocked(ip("169.254.169.254")));
        assert!(link_local.is_blocked(ip("fe80::1")));
        assert!(!link_local.is_blocked(ip("127.0.0.1")));
        assert!(!NetworkPolicy::default().is_active());
    }

    #[test]
    fn explicit_networks_and_mapped_addresses() -> Result<(), Box<dyn Error>> {
        let policy = NetworkPolicy {
            blocked_networks: vec!["::1/128".parse()?, "127.0.0.0/8".parse()?],
            ..NetworkPolicy::default()
        };
        assert!(policy.is_blocked(ip("127.0.0.5")));
        assert!(policy.is_blocked(ip("::1")));
        assert!(policy.is_blocked(ip("::ffff:127.0.0.1")));
        assert!(!policy.is_blocked(ip("1.1.1.1")));
        Ok(())
    }

    #[test]
    fn blocked_errors_are_found_through_sources() {
        #[derive(Debug)]
        struct Wrapper(BlockedAddress);
        impl Display for Wrapper {
            fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
                formatter.write_str("wrapper")
            }
        }
        impl Error for Wrapper {
            fn source(&self) -> Option<&(dyn Error + 'static)> {
                Some(&self.0)
            }
        }
        let wrapped = Wrapper(BlockedAddress);
        assert!(is_blocked_error(&wrapped));
        assert!(!is_blocked_error(&std::io::Error::other("boom")));
    }

    #[tokio::test]
    async fn resolver_drops_blocked_addresses() {
        let resolver = GuardedResolver::new(Arc::new(NetworkPolicy {
            block_loopback: true,
            ..NetworkPolicy::default()
        }));
        let Ok(name) = "localhost".parse::<Name>() else {
            panic!("name parse failed");
        };
        let result = resolver.resolve(name).await;
        let Err(err) = result else {
            panic!("loopback resolution should be rejected");
        };
        assert!(is_blocked_error(&*err));
    }
}
