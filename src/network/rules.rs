//! Route, NAT and firewall rule descriptions
//!
//! Rules are plain values; the driver renders them into `ip route` and
//! `iptables` arguments. Keeping them as data lets the orchestrator record
//! them for rollback and lets tests compare them directly.

use ipnet::Ipv4Net;
use std::fmt;
use std::net::Ipv4Addr;

/// Destination of a route
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    /// The default route (0.0.0.0/0)
    Default,
    /// A specific block
    Block(Ipv4Net),
}

/// A static route, either via a gateway or out of a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub target: RouteTarget,
    pub via: Option<Ipv4Addr>,
    pub dev: Option<String>,
}

impl Route {
    /// Default route through a gateway
    pub fn default_via(gateway: Ipv4Addr) -> Self {
        Self {
            target: RouteTarget::Default,
            via: Some(gateway),
            dev: None,
        }
    }

    /// Route for a block out of a device
    pub fn block_dev(block: Ipv4Net, dev: &str) -> Self {
        Self {
            target: RouteTarget::Block(block),
            via: None,
            dev: Some(dev.to_string()),
        }
    }

    /// Arguments following `ip route add|del`
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![match &self.target {
            RouteTarget::Default => "default".to_string(),
            RouteTarget::Block(net) => net.to_string(),
        }];

        if let Some(via) = self.via {
            args.push("via".to_string());
            args.push(via.to_string());
        }
        if let Some(dev) = &self.dev {
            args.push("dev".to_string());
            args.push(dev.clone());
        }

        args
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_args().join(" "))
    }
}

/// Source NAT for a public subnet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatRule {
    /// Subnet whose traffic is translated
    pub source: Ipv4Net,
    /// Uplink the traffic leaves through
    pub out_iface: String,
}

impl NatRule {
    pub fn masquerade(source: Ipv4Net, out_iface: &str) -> Self {
        Self {
            source,
            out_iface: out_iface.to_string(),
        }
    }

    /// Rule specification following `iptables -t nat -A|-D|-C POSTROUTING`
    pub fn to_args(&self) -> Vec<String> {
        vec![
            "-s".to_string(),
            self.source.to_string(),
            "-o".to_string(),
            self.out_iface.clone(),
            "-j".to_string(),
            "MASQUERADE".to_string(),
        ]
    }
}

/// Firewall chain inside a subnet namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
    Input,
    Output,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Input => "INPUT",
            Chain::Output => "OUTPUT",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rule verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Drop,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Accept => "ACCEPT",
            Verdict::Drop => "DROP",
        }
    }
}

/// A single filter rule appended to a chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallRule {
    pub chain: Chain,
    /// Protocol match, `None` for any protocol
    pub protocol: Option<String>,
    /// Destination port match; requires a protocol
    pub port: Option<u16>,
    pub verdict: Verdict,
}

impl FirewallRule {
    /// Arguments following `iptables -A`
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![self.chain.as_str().to_string()];

        if let Some(protocol) = &self.protocol {
            args.push("-p".to_string());
            args.push(protocol.clone());

            if let Some(port) = self.port {
                args.push("--dport".to_string());
                args.push(port.to_string());
            }
        }

        args.push("-j".to_string());
        args.push(self.verdict.as_str().to_string());
        args
    }
}

impl fmt::Display for FirewallRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "-A {}", self.to_args().join(" "))
    }
}
