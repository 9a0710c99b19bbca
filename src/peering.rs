//! VPC peering
//!
//! A peering is one veth pair with an end on each VPC's bridge, plus
//! static routes for the allowed blocks. It is recorded in both VPC
//! records so it can be torn down from either side.

use crate::error::{Error, Result};
use crate::network::ip;
use crate::network::naming;
use crate::network::{ResourceDriver, Route};
use crate::store::{PeeringRecord, StateStore, VpcRecord};
use crate::vpc::Cleanup;
use crate::vpc::transaction::{Transaction, Undo};
use chrono::Utc;
use ipnet::Ipv4Net;

/// Parse a comma-separated list of blocks
pub fn parse_allowed_cidrs(raw: &str) -> Result<Vec<Ipv4Net>> {
    let cidrs = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ip::validate)
        .collect::<Result<Vec<_>>>()?;

    if cidrs.is_empty() {
        return Err(Error::InvalidAddressBlock {
            cidr: raw.to_string(),
            reason: "no CIDR blocks given".into(),
        });
    }

    Ok(cidrs)
}

/// Routes to install towards `bridge` for the allowed blocks
///
/// Blocks inside the VPC's own CIDR are already directly connected to the
/// bridge; touching them would clobber the kernel's connected route.
fn routes_via(vpc: &VpcRecord, cidrs: &[Ipv4Net]) -> Vec<Route> {
    cidrs
        .iter()
        .filter(|cidr| !ip::is_subset_of(&vpc.cidr, cidr))
        .map(|cidr| Route::block_dev(*cidr, &vpc.bridge))
        .collect()
}

fn same_blocks(a: &[Ipv4Net], b: &[Ipv4Net]) -> bool {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort();
    a.dedup();
    b.sort();
    b.dedup();
    a == b
}

fn render_blocks(cidrs: &[Ipv4Net]) -> String {
    cidrs
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Establishes and removes peerings between VPCs
pub struct PeeringManager<'a, D: ResourceDriver> {
    store: &'a StateStore,
    driver: &'a D,
}

impl<'a, D: ResourceDriver> PeeringManager<'a, D> {
    pub fn new(store: &'a StateStore, driver: &'a D) -> Self {
        Self { store, driver }
    }

    /// Peer VPCs `a` and `b`, routing `allowed_cidrs` (comma-separated)
    pub fn peer(&self, a: &str, b: &str, allowed_cidrs: &str) -> Result<PeeringRecord> {
        naming::validate_name("VPC", a)?;
        naming::validate_name("VPC", b)?;
        if a == b {
            return Err(Error::ConfigConflict(format!(
                "VPC '{}' cannot be peered with itself",
                a
            )));
        }
        let cidrs = parse_allowed_cidrs(allowed_cidrs)?;

        let _lock = self.store.lock_exclusive()?;
        tracing::info!("Peering VPCs {} and {} for {}", a, b, render_blocks(&cidrs));

        let mut rec_a = self.store.load(a)?;
        let mut rec_b = self.store.load(b)?;

        if let Some(existing) = rec_a.peers.get(b) {
            if same_blocks(&existing.allowed_cidrs, &cidrs) {
                tracing::info!("VPCs {} and {} are already peered", a, b);
                return Ok(existing.clone());
            }
            return Err(Error::PeeringConflict {
                a: a.to_string(),
                b: b.to_string(),
                existing: render_blocks(&existing.allowed_cidrs),
            });
        }

        let link_a = naming::peer_link_name(a, b);
        let link_b = naming::peer_link_name(b, a);
        self.store.ensure_unclaimed(&[link_a.as_str(), link_b.as_str()])?;
        let created = Utc::now();

        let record = Transaction::run(self.driver, &format!("peer {}-{}", a, b), |tx| {
            let driver = tx.driver();

            // Half of a previous attempt; deleting one end removes both
            for link in [&link_a, &link_b] {
                if driver.link_exists(link)? {
                    tracing::warn!("Removing orphaned peering link {}", link);
                    driver.delete_link(link)?;
                }
            }

            driver.create_veth_pair(&link_a, &link_b)?;
            tx.created(Undo::DeleteLink(link_a.clone()));

            driver.attach_to_bridge(&link_a, &rec_a.bridge)?;
            driver.attach_to_bridge(&link_b, &rec_b.bridge)?;
            driver.set_link_up(&link_a, None)?;
            driver.set_link_up(&link_b, None)?;

            for route in routes_via(&rec_a, &cidrs)
                .into_iter()
                .chain(routes_via(&rec_b, &cidrs))
            {
                driver.add_route(&route, None)?;
                tx.created(Undo::DeleteRoute(route));
            }

            let side_a = PeeringRecord {
                peer: b.to_string(),
                local_link: link_a.clone(),
                remote_link: link_b.clone(),
                allowed_cidrs: cidrs.clone(),
                created,
            };
            let side_b = PeeringRecord {
                peer: a.to_string(),
                local_link: link_b.clone(),
                remote_link: link_a.clone(),
                allowed_cidrs: cidrs.clone(),
                created,
            };

            rec_a.peers.insert(b.to_string(), side_a.clone());
            rec_b.peers.insert(a.to_string(), side_b);

            self.store.save(&rec_a)?;
            if let Err(e) = self.store.save(&rec_b) {
                rec_a.peers.remove(b);
                if let Err(restore) = self.store.save(&rec_a) {
                    tracing::warn!("Failed to restore record {}: {}", a, restore);
                }
                return Err(e);
            }

            Ok(side_a)
        })?;

        tracing::info!("Peering established between {} and {}", a, b);
        Ok(record)
    }

    /// Remove the peering between `a` and `b`; absent peerings are a no-op
    pub fn unpeer(&self, a: &str, b: &str) -> Result<Cleanup> {
        naming::validate_name("VPC", a)?;
        naming::validate_name("VPC", b)?;

        let _lock = self.store.lock_exclusive()?;
        tracing::info!("Removing peering between {} and {}", a, b);

        let mut rec_a = self.store.load(a)?;
        let mut cleanup = Cleanup::new();

        if rec_a.peers.contains_key(b) {
            self.detach(&mut rec_a, b, &mut cleanup);
            return Ok(cleanup);
        }

        // Only the other side may still know about it
        let mut rec_b = self.store.load(b)?;
        if rec_b.peers.contains_key(a) {
            self.detach(&mut rec_b, a, &mut cleanup);
        } else {
            tracing::info!("VPCs {} and {} are not peered", a, b);
            cleanup.attempt(
                "delete peering link",
                self.driver.delete_link(&naming::peer_link_name(a, b)),
            );
        }

        Ok(cleanup)
    }

    /// Tear down `local`'s peering with `remote` and update both records
    ///
    /// The caller holds the exclusive lock. `local` is saved unless its
    /// record file is gone, and the remote record is updated if it exists.
    pub(crate) fn detach(&self, local: &mut VpcRecord, remote: &str, cleanup: &mut Cleanup) {
        let Some(peering) = local.peers.remove(remote) else {
            return;
        };
        tracing::debug!("Detaching peering {} <-> {}", local.name, remote);

        cleanup.attempt(
            &format!("delete peering link {}", peering.local_link),
            self.driver.delete_link(&peering.local_link),
        );

        let mut routes = routes_via(local, &peering.allowed_cidrs);

        match self.store.load(remote) {
            Ok(mut other) => {
                routes.extend(routes_via(&other, &peering.allowed_cidrs));
                if other.peers.remove(&local.name).is_some() {
                    cleanup.attempt(
                        &format!("update record {}", remote),
                        self.store.save(&other),
                    );
                }
            }
            Err(Error::VpcNotFound(_)) => {}
            Err(e) => cleanup.warn(format!("load record {}: {}", remote, e)),
        }

        for route in routes {
            cleanup.attempt(
                &format!("delete route {}", route),
                self.driver.delete_route(&route),
            );
        }

        if self.store.exists(&local.name) {
            cleanup.attempt(
                &format!("update record {}", local.name),
                self.store.save(local),
            );
        }
    }
}
