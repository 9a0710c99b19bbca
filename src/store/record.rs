//! Persisted topology records
//!
//! One [`VpcRecord`] per VPC, serialized as pretty JSON. Records written by
//! the earlier Python tool (naive ISO timestamps, `host_ip` with a prefix
//! suffix) are accepted and rewritten in the current form on next save.

use crate::error::{Error, Result};
use crate::network::ip;
use chrono::{DateTime, NaiveDateTime, Utc};
use ipnet::Ipv4Net;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::Path;

/// Subnet flavour: public subnets are NATed out of the uplink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SubnetType {
    Public,
    Private,
}

impl fmt::Display for SubnetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubnetType::Public => write!(f, "public"),
            SubnetType::Private => write!(f, "private"),
        }
    }
}

/// Topology of a single VPC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpcRecord {
    pub name: String,
    pub cidr: Ipv4Net,
    pub internet_iface: String,
    pub bridge: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub subnets: BTreeMap<String, SubnetRecord>,
    #[serde(default)]
    pub peers: BTreeMap<String, PeeringRecord>,
}

/// A subnet backed by one namespace and one veth pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetRecord {
    pub cidr: Ipv4Net,
    #[serde(rename = "type")]
    pub kind: SubnetType,
    pub namespace: String,
    pub veth_host: String,
    pub veth_ns: String,
    pub gateway: Ipv4Addr,
    #[serde(deserialize_with = "deserialize_host_ip")]
    pub host_ip: Ipv4Addr,
}

/// One side of a peering between two VPCs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeeringRecord {
    /// Name of the other VPC
    pub peer: String,
    /// Link end attached to this VPC's bridge
    pub local_link: String,
    /// Link end attached to the peer's bridge
    pub remote_link: String,
    /// Blocks routed towards the peer
    pub allowed_cidrs: Vec<Ipv4Net>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created: DateTime<Utc>,
}

impl VpcRecord {
    /// A fresh record with no subnets or peers
    pub fn new(name: &str, cidr: Ipv4Net, internet_iface: &str, bridge: &str) -> Self {
        Self {
            name: name.to_string(),
            cidr,
            internet_iface: internet_iface.to_string(),
            bridge: bridge.to_string(),
            created: Utc::now(),
            subnets: BTreeMap::new(),
            peers: BTreeMap::new(),
        }
    }

    /// Component of this VPC that uses the host resource `resource`
    ///
    /// Namespace-side veth names are per namespace and not considered.
    pub fn owner_of(&self, resource: &str) -> Option<String> {
        if self.bridge == resource {
            return Some(format!("VPC {}", self.name));
        }

        for (name, subnet) in &self.subnets {
            if subnet.veth_host == resource || subnet.namespace == resource {
                return Some(format!("subnet {}/{}", self.name, name));
            }
        }

        self.peers
            .values()
            .find(|p| p.local_link == resource || p.remote_link == resource)
            .map(|p| format!("peering {} <-> {}", self.name, p.peer))
    }

    /// Check internal consistency of a record read from `path`
    pub fn validate(&self, path: &Path) -> Result<()> {
        let corrupt = |message: String| Error::StateCorrupt {
            path: path.to_path_buf(),
            message,
        };

        let expected = path.file_stem().and_then(|s| s.to_str());
        if expected != Some(self.name.as_str()) {
            return Err(corrupt(format!(
                "record name '{}' does not match file name",
                self.name
            )));
        }

        if self.cidr != self.cidr.trunc() {
            return Err(corrupt(format!("VPC CIDR {} has host bits set", self.cidr)));
        }

        for (name, subnet) in &self.subnets {
            if !ip::is_subset_of(&self.cidr, &subnet.cidr) {
                return Err(corrupt(format!(
                    "subnet '{}' ({}) lies outside VPC CIDR {}",
                    name, subnet.cidr, self.cidr
                )));
            }

            if ip::gateway_of(&subnet.cidr).ok() != Some(subnet.gateway) {
                return Err(corrupt(format!(
                    "subnet '{}' gateway {} is not the first address of {}",
                    name, subnet.gateway, subnet.cidr
                )));
            }
            if ip::host_of(&subnet.cidr).ok() != Some(subnet.host_ip) {
                return Err(corrupt(format!(
                    "subnet '{}' host address {} is not the second address of {}",
                    name, subnet.host_ip, subnet.cidr
                )));
            }
        }

        for (name, peering) in &self.peers {
            if name != &peering.peer {
                return Err(corrupt(format!(
                    "peering key '{}' does not match peer '{}'",
                    name, peering.peer
                )));
            }
        }

        Ok(())
    }
}

/// Accept RFC 3339 timestamps and the naive local ISO form of older records
fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("invalid timestamp '{}': {}", raw, e))
}

/// Accept `10.0.1.2` and the legacy `10.0.1.2/24`
fn deserialize_host_ip<'de, D>(deserializer: D) -> std::result::Result<Ipv4Addr, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let addr = raw.split_once('/').map_or(raw.as_str(), |(addr, _)| addr);
    addr.parse().map_err(serde::de::Error::custom)
}
