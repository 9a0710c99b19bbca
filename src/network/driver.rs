//! Resource driver capability set
//!
//! The orchestrator never touches the kernel directly. Everything it needs
//! from the host goes through this trait, implemented by [`IpRouteDriver`]
//! in production and by a simulated host in tests.
//!
//! [`IpRouteDriver`]: crate::network::IpRouteDriver

use crate::error::Result;
use crate::network::rules::{Chain, FirewallRule, NatRule, Route};
use ipnet::Ipv4Net;

/// OS networking primitives driven by the orchestrator
///
/// `netns` arguments select the namespace a call runs in; `None` is the
/// host namespace. Every call may fail with `CommandFailed` or
/// `CommandTimeout`.
pub trait ResourceDriver {
    /// Create a bridge interface
    fn create_bridge(&self, name: &str) -> Result<()>;

    /// Whether a link (bridge, veth, ...) exists in the host namespace
    fn link_exists(&self, name: &str) -> Result<bool>;

    /// Delete a link; deleting one end of a veth pair removes both.
    /// Deleting a link that is already gone succeeds.
    fn delete_link(&self, name: &str) -> Result<()>;

    /// Bring a link up
    fn set_link_up(&self, name: &str, netns: Option<&str>) -> Result<()>;

    /// Assign an address (with prefix) to an interface
    fn add_address(&self, iface: &str, addr: &Ipv4Net, netns: Option<&str>) -> Result<()>;

    /// Remove an address from an interface
    fn delete_address(&self, iface: &str, addr: &Ipv4Net) -> Result<()>;

    /// Create a network namespace
    fn create_namespace(&self, name: &str) -> Result<()>;

    /// Delete a network namespace; a missing namespace succeeds
    fn delete_namespace(&self, name: &str) -> Result<()>;

    /// Enumerate network namespaces
    fn list_namespaces(&self) -> Result<Vec<String>>;

    /// Enumerate bridge interfaces in the host namespace
    fn list_bridges(&self) -> Result<Vec<String>>;

    /// Create a veth pair
    fn create_veth_pair(&self, name: &str, peer: &str) -> Result<()>;

    /// Enslave a link to a bridge
    fn attach_to_bridge(&self, link: &str, bridge: &str) -> Result<()>;

    /// Move a link into a network namespace
    fn move_to_namespace(&self, link: &str, netns: &str) -> Result<()>;

    /// Install a route; an identical existing route succeeds
    fn add_route(&self, route: &Route, netns: Option<&str>) -> Result<()>;

    /// Remove a route; a missing route succeeds
    fn delete_route(&self, route: &Route) -> Result<()>;

    /// Install a source-NAT rule unless it is already present
    fn add_nat_rule(&self, rule: &NatRule) -> Result<()>;

    /// Remove a source-NAT rule
    fn delete_nat_rule(&self, rule: &NatRule) -> Result<()>;

    /// Append a filter rule inside a namespace
    fn add_firewall_rule(&self, netns: &str, rule: &FirewallRule) -> Result<()>;

    /// Flush a filter chain inside a namespace
    fn flush_chain(&self, netns: &str, chain: Chain) -> Result<()>;

    /// Enable IPv4 forwarding on the host
    fn enable_ip_forwarding(&self) -> Result<()>;

    /// Whether a namespace exists
    fn namespace_exists(&self, name: &str) -> Result<bool> {
        Ok(self.list_namespaces()?.iter().any(|ns| ns == name))
    }
}
