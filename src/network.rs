//! Host networking for VPCs
//!
//! Provides:
//! - Address block validation and overlap checks
//! - Derived resource names (bridges, namespaces, veth pairs)
//! - The resource driver capability set and its iproute2/iptables adapter
//! - Parsers for `ip` inventory output

pub mod driver;
pub mod inventory;
pub mod ip;
pub mod iproute;
pub mod naming;
pub mod rules;

#[cfg(test)]
pub mod sim;

pub use driver::ResourceDriver;
pub use iproute::IpRouteDriver;
pub use rules::{Chain, FirewallRule, NatRule, Route, Verdict};
