//! Resource naming conventions
//!
//! Every host resource vpcctl creates is derived from VPC and subnet names,
//! so records only need to store lookup keys and orphans can be found by
//! name alone. Linux limits interface names to 15 bytes; names that would
//! not fit are replaced by a stable hash with the same prefix and suffix.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};

/// Maximum interface name length (IFNAMSIZ - 1)
pub const MAX_IFNAME_LEN: usize = 15;

/// Maximum length of a VPC or subnet name
pub const MAX_NAME_LEN: usize = 32;

/// Prefix shared by every namespace and bridge vpcctl manages
pub const MANAGED_PREFIX: &str = "vpc-";

const BRIDGE_SUFFIX: &str = "-br";
const VETH_HOST_PREFIX: &str = "veth-";
const VETH_NS_PREFIX: &str = "veth-ns-";
const PEER_PREFIX: &str = "peer-";

/// Validate a user-supplied VPC, subnet or app name
pub fn validate_name(kind: &'static str, name: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidName {
        kind,
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("too long"));
    }
    if name.starts_with('-') {
        return Err(invalid("must not start with '-'"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(invalid("only letters, digits, '-' and '_' are allowed"));
    }

    Ok(())
}

/// Validate an existing host interface name (e.g. the uplink)
pub fn validate_ifname(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_IFNAME_LEN || name.contains(['/', ' ']) {
        return Err(Error::InvalidName {
            kind: "interface",
            name: name.to_string(),
            reason: format!("must be 1-{} characters without '/' or spaces", MAX_IFNAME_LEN),
        });
    }
    Ok(())
}

/// Hex digest of the parts; `/` cannot appear in a name, so distinct tuples
/// hash distinct inputs
fn digest(parts: &[&str]) -> String {
    hex::encode(Sha256::digest(parts.join("/").as_bytes()))
}

/// A `-`-joined tuple only reads back unambiguously if no part contains `-`
fn is_ambiguous(parts: &[&str]) -> bool {
    parts.len() > 1 && parts.iter().any(|p| p.contains('-'))
}

/// Build `prefix + parts + suffix`, hashing the parts if the result is too
/// long or could be produced by another tuple
fn ifname(prefix: &str, parts: &[&str], suffix: &str) -> String {
    let plain = format!("{}{}{}", prefix, parts.join("-"), suffix);
    if plain.len() <= MAX_IFNAME_LEN && !is_ambiguous(parts) {
        return plain;
    }

    let room = MAX_IFNAME_LEN - prefix.len() - suffix.len();
    format!("{}{}{}", prefix, &digest(parts)[..room], suffix)
}

/// Bridge backing a VPC (e.g. "vpc-prod-br")
pub fn bridge_name(vpc: &str) -> String {
    ifname(MANAGED_PREFIX, &[vpc], BRIDGE_SUFFIX)
}

/// Network namespace backing a subnet (e.g. "vpc-prod-ns-web")
///
/// Namespace names are file names, not interface names, so only ambiguous
/// pairs are hashed.
pub fn namespace_name(vpc: &str, subnet: &str) -> String {
    if is_ambiguous(&[vpc, subnet]) {
        format!("{}ns-{}", MANAGED_PREFIX, &digest(&[vpc, subnet])[..16])
    } else {
        format!("{}{}-ns-{}", MANAGED_PREFIX, vpc, subnet)
    }
}

/// Host-side end of a subnet's veth pair
pub fn veth_host_name(vpc: &str, subnet: &str) -> String {
    let name = ifname(VETH_HOST_PREFIX, &[vpc, subnet], "");
    // VPC "ns" would otherwise shadow namespace-side names
    if name.starts_with(VETH_NS_PREFIX) {
        format!(
            "{}{}",
            VETH_HOST_PREFIX,
            &digest(&[vpc, subnet])[..MAX_IFNAME_LEN - VETH_HOST_PREFIX.len()]
        )
    } else {
        name
    }
}

/// Namespace-side end of a subnet's veth pair
pub fn veth_ns_name(vpc: &str, subnet: &str) -> String {
    let plain = format!("{}{}", VETH_NS_PREFIX, subnet);
    if plain.len() <= MAX_IFNAME_LEN {
        plain
    } else {
        ifname(VETH_NS_PREFIX, &[vpc, subnet], "")
    }
}

/// End of a peering link that lives on `local`'s bridge
pub fn peer_link_name(local: &str, remote: &str) -> String {
    ifname(PEER_PREFIX, &[local, remote], "")
}

/// Whether a namespace follows the managed naming convention
pub fn is_managed_namespace(name: &str) -> bool {
    name.starts_with(MANAGED_PREFIX)
}

/// Whether a bridge follows the managed naming convention
pub fn is_managed_bridge(name: &str) -> bool {
    name.starts_with(MANAGED_PREFIX) && name.ends_with(BRIDGE_SUFFIX)
}
