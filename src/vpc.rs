//! VPC lifecycle management
//!
//! Provides:
//! - VPC creation (bridge, address, forwarding) with rollback
//! - Subnet creation (namespace, veth pair, routing, NAT) with rollback
//! - Best-effort VPC deletion
//! - Read-only inspection
//!
//! Every mutating operation holds the exclusive state lock for its whole
//! validate-act-persist sequence, and persists only after the driver steps
//! succeeded.

pub mod cleanup;
pub mod transaction;

pub use cleanup::Cleanup;

use crate::error::{Error, Result};
use crate::network::ip::{self, AddressSpace};
use crate::network::naming;
use crate::network::{NatRule, ResourceDriver, Route};
use crate::peering::PeeringManager;
use crate::store::{StateStore, SubnetRecord, SubnetType, VpcRecord};
use transaction::{Transaction, Undo};

/// Creates, extends and deletes VPCs
pub struct VpcManager<'a, D: ResourceDriver> {
    store: &'a StateStore,
    driver: &'a D,
}

impl<'a, D: ResourceDriver> VpcManager<'a, D> {
    pub fn new(store: &'a StateStore, driver: &'a D) -> Self {
        Self { store, driver }
    }

    /// Create a VPC, or return the existing identical one
    pub fn create_vpc(&self, name: &str, cidr: &str, internet_iface: &str) -> Result<VpcRecord> {
        naming::validate_name("VPC", name)?;
        naming::validate_ifname(internet_iface)?;
        let cidr = ip::validate(cidr)?;

        let _lock = self.store.lock_exclusive()?;
        tracing::info!("Creating VPC {} ({}) via {}", name, cidr, internet_iface);

        AddressSpace::new(self.store).check_no_overlap(&cidr, Some(name))?;

        if self.store.exists(name) {
            let existing = self.store.load(name)?;
            if existing.cidr == cidr && existing.internet_iface == internet_iface {
                tracing::info!("VPC {} already exists with identical configuration", name);
                return Ok(existing);
            }
            return Err(Error::ConfigConflict(format!(
                "VPC '{}' already exists with CIDR {} and internet interface {}",
                name, existing.cidr, existing.internet_iface
            )));
        }

        let bridge = naming::bridge_name(name);
        self.store.ensure_unclaimed(&[bridge.as_str()])?;
        let bridge_addr = ip::with_prefix(ip::gateway_of(&cidr)?, &cidr)?;

        let record = Transaction::run(self.driver, &format!("create-vpc {}", name), |tx| {
            let driver = tx.driver();

            if driver.link_exists(&bridge)? {
                tracing::info!("Bridge {} already present, reusing it", bridge);
            } else {
                driver.create_bridge(&bridge)?;
                tx.created(Undo::DeleteLink(bridge.clone()));
                driver.set_link_up(&bridge, None)?;
                driver.add_address(&bridge, &bridge_addr, None)?;
            }

            driver.enable_ip_forwarding()?;

            let record = VpcRecord::new(name, cidr, internet_iface, &bridge);
            self.store.save(&record)?;
            Ok(record)
        })?;

        tracing::info!("VPC {} created successfully", name);
        Ok(record)
    }

    /// Add a subnet to a VPC, or return the existing identical one
    pub fn add_subnet(
        &self,
        vpc: &str,
        subnet: &str,
        cidr: &str,
        kind: SubnetType,
    ) -> Result<SubnetRecord> {
        naming::validate_name("VPC", vpc)?;
        naming::validate_name("subnet", subnet)?;
        let cidr = ip::validate(cidr)?;

        let _lock = self.store.lock_exclusive()?;
        tracing::info!("Adding {} subnet {} ({}) to VPC {}", kind, subnet, cidr, vpc);

        let mut record = self.store.load(vpc)?;

        if !ip::is_subset_of(&record.cidr, &cidr) {
            return Err(Error::SubnetNotContained {
                subnet: cidr.to_string(),
                vpc_cidr: record.cidr.to_string(),
            });
        }

        if let Some(existing) = record.subnets.get(subnet) {
            if existing.cidr == cidr && existing.kind == kind {
                tracing::info!("Subnet {} already exists in VPC {}", subnet, vpc);
                return Ok(existing.clone());
            }
            return Err(Error::ConfigConflict(format!(
                "Subnet '{}' already exists in VPC '{}' as {} {}",
                subnet, vpc, existing.kind, existing.cidr
            )));
        }

        for (name, sibling) in &record.subnets {
            if ip::overlaps(&cidr, &sibling.cidr) {
                return Err(Error::OverlapConflict {
                    cidr: cidr.to_string(),
                    with: format!("subnet {}", name),
                    with_cidr: sibling.cidr.to_string(),
                });
            }
        }

        let gateway = ip::gateway_of(&cidr)?;
        let host_ip = ip::host_of(&cidr)?;
        let entry = SubnetRecord {
            cidr,
            kind,
            namespace: naming::namespace_name(vpc, subnet),
            veth_host: naming::veth_host_name(vpc, subnet),
            veth_ns: naming::veth_ns_name(vpc, subnet),
            gateway,
            host_ip,
        };

        // Nothing below may touch another VPC's resources
        self.store
            .ensure_unclaimed(&[entry.veth_host.as_str(), entry.namespace.as_str()])?;

        let label = format!("add-subnet {}/{}", vpc, subnet);
        Transaction::run(self.driver, &label, |tx| {
            self.provision_subnet(tx, &record, &entry)?;
            record.subnets.insert(subnet.to_string(), entry.clone());
            self.store.save(&record)
        })?;

        tracing::info!("Subnet {} added to VPC {}", subnet, vpc);
        Ok(entry)
    }

    /// Driver steps for one subnet
    fn provision_subnet(
        &self,
        tx: &mut Transaction<'_, D>,
        vpc: &VpcRecord,
        subnet: &SubnetRecord,
    ) -> Result<()> {
        let driver = tx.driver();
        let ns = subnet.namespace.as_str();

        // Left over by an interrupted run; its peer goes with it
        if driver.link_exists(&subnet.veth_host)? {
            tracing::warn!("Removing orphaned link {}", subnet.veth_host);
            driver.delete_link(&subnet.veth_host)?;
        }

        if !driver.namespace_exists(ns)? {
            driver.create_namespace(ns)?;
        }
        tx.created(Undo::DeleteNamespace(ns.to_string()));

        driver.create_veth_pair(&subnet.veth_host, &subnet.veth_ns)?;
        tx.created(Undo::DeleteLink(subnet.veth_host.clone()));

        driver.attach_to_bridge(&subnet.veth_host, &vpc.bridge)?;
        driver.set_link_up(&subnet.veth_host, None)?;

        driver.move_to_namespace(&subnet.veth_ns, ns)?;
        driver.set_link_up(&subnet.veth_ns, Some(ns))?;
        driver.set_link_up("lo", Some(ns))?;
        driver.add_address(
            &subnet.veth_ns,
            &ip::with_prefix(subnet.host_ip, &subnet.cidr)?,
            Some(ns),
        )?;

        let gateway = ip::with_prefix(subnet.gateway, &subnet.cidr)?;
        if Some(subnet.gateway) != ip::gateway_of(&vpc.cidr).ok() {
            driver.add_address(&vpc.bridge, &gateway, None)?;
            tx.created(Undo::DeleteAddress {
                iface: vpc.bridge.clone(),
                addr: gateway,
            });
        }

        driver.add_route(&Route::default_via(subnet.gateway), Some(ns))?;

        if subnet.kind == SubnetType::Public {
            let nat = NatRule::masquerade(subnet.cidr, &vpc.internet_iface);
            driver.add_nat_rule(&nat)?;
            tx.created(Undo::DeleteNatRule(nat));
        }

        Ok(())
    }

    /// Delete a VPC and everything it owns
    ///
    /// Missing VPCs are a silent no-op. Individual teardown failures are
    /// returned as warnings rather than errors.
    pub fn delete_vpc(&self, name: &str) -> Result<Cleanup> {
        naming::validate_name("VPC", name)?;
        let _lock = self.store.lock_exclusive()?;
        self.delete_vpc_locked(name)
    }

    /// [`VpcManager::delete_vpc`] for callers already holding the lock
    pub(crate) fn delete_vpc_locked(&self, name: &str) -> Result<Cleanup> {
        tracing::info!("Deleting VPC {}", name);

        let mut record = match self.store.load(name) {
            Ok(record) => record,
            Err(Error::VpcNotFound(_)) => {
                tracing::info!("VPC {} does not exist", name);
                return Ok(Cleanup::new());
            }
            Err(e) => return Err(e),
        };

        let mut cleanup = Cleanup::new();

        let peers: Vec<String> = record.peers.keys().cloned().collect();
        let peering = PeeringManager::new(self.store, self.driver);
        for peer in peers {
            peering.detach(&mut record, &peer, &mut cleanup);
        }

        for (subnet_name, subnet) in &record.subnets {
            tracing::debug!("Tearing down subnet {}", subnet_name);

            if subnet.kind == SubnetType::Public {
                let nat = NatRule::masquerade(subnet.cidr, &record.internet_iface);
                cleanup.attempt(
                    &format!("remove NAT rule for {}", subnet.cidr),
                    self.driver.delete_nat_rule(&nat),
                );
            }

            cleanup.attempt(
                &format!("delete namespace {}", subnet.namespace),
                self.driver.delete_namespace(&subnet.namespace),
            );
            cleanup.attempt(
                &format!("delete link {}", subnet.veth_host),
                self.driver.delete_link(&subnet.veth_host),
            );
        }

        cleanup.attempt(
            &format!("delete bridge {}", record.bridge),
            self.driver.delete_link(&record.bridge),
        );

        self.store.delete(name)?;
        tracing::info!("VPC {} deleted", name);
        Ok(cleanup)
    }

    /// Current record of a VPC
    pub fn inspect(&self, name: &str) -> Result<VpcRecord> {
        naming::validate_name("VPC", name)?;
        let _lock = self.store.lock_shared()?;
        self.store.load(name)
    }

    /// All readable VPC records in name order; corrupt records are skipped
    pub fn list(&self) -> Result<Vec<VpcRecord>> {
        let _lock = self.store.lock_shared()?;

        let mut records = Vec::new();
        for (name, result) in self.store.scan()? {
            match result {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!("Skipping unreadable record {}: {}", name, e),
            }
        }
        Ok(records)
    }

    /// Look up a single subnet
    pub fn subnet(&self, vpc: &str, subnet: &str) -> Result<SubnetRecord> {
        let record = self.inspect(vpc)?;
        record
            .subnets
            .get(subnet)
            .cloned()
            .ok_or_else(|| Error::SubnetNotFound {
                vpc: vpc.to_string(),
                subnet: subnet.to_string(),
            })
    }
}
