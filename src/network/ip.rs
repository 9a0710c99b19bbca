//! Address space management for VPC networks
//!
//! Provides:
//! - CIDR validation (IPv4 only, no host bits, room for gateway and host)
//! - Overlap and containment checks between blocks
//! - Fleet-wide non-overlap enforcement against the state store

use crate::error::{Error, Result};
use crate::store::StateStore;
use ipnet::{IpNet, Ipv4Net};
use std::net::Ipv4Addr;

/// Longest prefix that still leaves a gateway and a host address
pub const MAX_PREFIX_LEN: u8 = 30;

/// Offset of the gateway address from the network address
const GATEWAY_OFFSET: u32 = 1;

/// Offset of the namespace host address from the network address
const HOST_OFFSET: u32 = 2;

/// Parse and validate an address block
pub fn validate(cidr: &str) -> Result<Ipv4Net> {
    let invalid = |reason: String| Error::InvalidAddressBlock {
        cidr: cidr.to_string(),
        reason,
    };

    let net: IpNet = cidr
        .trim()
        .parse()
        .map_err(|e| invalid(format!("{}", e)))?;

    let net = match net {
        IpNet::V4(net) => net,
        IpNet::V6(_) => return Err(invalid("only IPv4 blocks are supported".into())),
    };

    if net != net.trunc() {
        return Err(invalid(format!("host bits set (did you mean {}?)", net.trunc())));
    }

    if net.prefix_len() > MAX_PREFIX_LEN {
        return Err(invalid(format!(
            "block too small, prefix must be /{} or shorter",
            MAX_PREFIX_LEN
        )));
    }

    Ok(net)
}

/// True iff every address in `child` lies within `parent`
pub fn is_subset_of(parent: &Ipv4Net, child: &Ipv4Net) -> bool {
    parent.contains(child)
}

/// True iff the two blocks share at least one address
pub fn overlaps(a: &Ipv4Net, b: &Ipv4Net) -> bool {
    a.contains(&b.network()) || b.contains(&a.network())
}

/// Address at `offset` from the network address, if it is a usable host
fn nth_host(net: &Ipv4Net, offset: u32) -> Result<Ipv4Addr> {
    let base = u32::from(net.network());
    let broadcast = u32::from(net.broadcast());

    match base.checked_add(offset) {
        Some(addr) if addr < broadcast => Ok(Ipv4Addr::from(addr)),
        _ => Err(Error::InvalidAddressBlock {
            cidr: net.to_string(),
            reason: format!("no usable address at offset {}", offset),
        }),
    }
}

/// Gateway address of a block (network address + 1)
pub fn gateway_of(net: &Ipv4Net) -> Result<Ipv4Addr> {
    nth_host(net, GATEWAY_OFFSET)
}

/// Namespace host address of a block (network address + 2)
pub fn host_of(net: &Ipv4Net) -> Result<Ipv4Addr> {
    nth_host(net, HOST_OFFSET)
}

/// Attach the block's prefix length to an address (e.g. 10.0.1.1/24)
pub fn with_prefix(addr: Ipv4Addr, net: &Ipv4Net) -> Result<Ipv4Net> {
    Ipv4Net::new(addr, net.prefix_len()).map_err(|e| Error::InvalidAddressBlock {
        cidr: net.to_string(),
        reason: e.to_string(),
    })
}

/// Registry enforcing the fleet-wide non-overlap invariant
pub struct AddressSpace<'a> {
    store: &'a StateStore,
}

impl<'a> AddressSpace<'a> {
    /// Create a registry view over a state store
    pub fn new(store: &'a StateStore) -> Self {
        Self { store }
    }

    /// Ensure `candidate` overlaps no persisted VPC other than `excluding`
    ///
    /// Records are scanned in name order, so the reported conflict is
    /// deterministic for a given store.
    pub fn check_no_overlap(&self, candidate: &Ipv4Net, excluding: Option<&str>) -> Result<()> {
        for record in self.store.list_all()? {
            if excluding == Some(record.name.as_str()) {
                continue;
            }

            if overlaps(candidate, &record.cidr) {
                return Err(Error::OverlapConflict {
                    cidr: candidate.to_string(),
                    with: format!("VPC {}", record.name),
                    with_cidr: record.cidr.to_string(),
                });
            }
        }

        Ok(())
    }
}
