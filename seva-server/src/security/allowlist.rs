//! Client address allowlist

use std::collections::HashSet;
use std::net::IpAddr;

use seva_core::Environment;

/// Applies only in production, and only when at least one address is listed.
#[derive(Debug, Clone)]
pub struct IpAllowlist {
    allowed: HashSet<IpAddr>,
    enforced: bool,
}

impl IpAllowlist {
    pub fn new(addresses: &[IpAddr], environment: Environment) -> Self {
        Self {
            allowed: addresses.iter().copied().collect(),
            enforced: environment.is_production() && !addresses.is_empty(),
        }
    }

    pub fn is_enforced(&self) -> bool {
        self.enforced
    }

    pub fn permits(&self, ip: IpAddr) -> bool {
        if !self.enforced {
            return true;
        }
        // IPv4 clients can arrive as v4-mapped v6 on dual-stack listeners
        let ip = match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
            v4 => v4,
        };
        self.allowed.contains(&ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn only_enforced_in_production() {
        let listed = [ip("10.0.0.5")];
        assert!(IpAllowlist::new(&listed, Environment::Development).permits(ip("8.8.8.8")));
        assert!(IpAllowlist::new(&listed, Environment::Staging).permits(ip("8.8.8.8")));

        let prod = IpAllowlist::new(&listed, Environment::Production);
        assert!(prod.is_enforced());
        assert!(prod.permits(ip("10.0.0.5")));
        assert!(!prod.permits(ip("8.8.8.8")));
    }

    #[test]
    fn empty_list_disables_the_check() {
        let prod = IpAllowlist::new(&[], Environment::Production);
        assert!(!prod.is_enforced());
        assert!(prod.permits(ip("203.0.113.9")));
    }

    #[test]
    fn mapped_v4_matches_v4_entry() {
        let prod = IpAllowlist::new(&[ip("10.0.0.5")], Environment::Production);
        assert!(prod.permits(ip("::ffff:10.0.0.5")));
    }
}
