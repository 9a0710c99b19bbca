//! Fleet-wide teardown
//!
//! Deletes every recorded VPC, then sweeps the host for namespaces and
//! bridges that follow vpcctl's naming convention but no longer belong to
//! any record (crashed runs, corrupt records, manual edits).

use crate::error::Result;
use crate::network::ResourceDriver;
use crate::network::naming;
use crate::store::StateStore;
use crate::vpc::{Cleanup, VpcManager};

/// What a teardown removed, and what it could not
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// VPCs deleted through their records
    pub deleted: Vec<String>,
    /// Records that could not be read and were discarded
    pub discarded: Vec<String>,
    /// Namespaces removed by the sweep
    pub swept_namespaces: Vec<String>,
    /// Bridges removed by the sweep
    pub swept_bridges: Vec<String>,
    pub cleanup: Cleanup,
}

/// Tears down every VPC on the host
pub struct FleetReconciler<'a, D: ResourceDriver> {
    store: &'a StateStore,
    driver: &'a D,
}

impl<'a, D: ResourceDriver> FleetReconciler<'a, D> {
    pub fn new(store: &'a StateStore, driver: &'a D) -> Self {
        Self { store, driver }
    }

    /// Delete all VPCs and sweep leftovers
    ///
    /// Only failing to take the state lock is an error; everything else is
    /// reported as a warning.
    pub fn teardown_all(&self) -> Result<TeardownReport> {
        let _lock = self.store.lock_exclusive()?;
        tracing::info!("Tearing down all VPCs");

        let mut report = TeardownReport::default();
        let vpcs = VpcManager::new(self.store, self.driver);

        let entries = match self.store.scan() {
            Ok(entries) => entries,
            Err(e) => {
                report.cleanup.warn(format!("list state records: {}", e));
                Vec::new()
            }
        };

        for (name, record) in entries {
            match record {
                Ok(_) => match vpcs.delete_vpc_locked(&name) {
                    Ok(cleanup) => {
                        report.cleanup.absorb(cleanup);
                        report.deleted.push(name);
                    }
                    Err(e) => report.cleanup.warn(format!("delete VPC {}: {}", name, e)),
                },
                Err(e) => {
                    report
                        .cleanup
                        .warn(format!("discarding unreadable record {}: {}", name, e));
                    report
                        .cleanup
                        .attempt(&format!("remove record {}", name), self.store.delete(&name));
                    report.discarded.push(name);
                }
            }
        }

        self.sweep(&mut report);

        tracing::info!(
            "Teardown completed: {} VPC(s) deleted, {} namespace(s) and {} bridge(s) swept",
            report.deleted.len(),
            report.swept_namespaces.len(),
            report.swept_bridges.len()
        );
        Ok(report)
    }

    /// Remove managed namespaces and bridges left on the host
    fn sweep(&self, report: &mut TeardownReport) {
        match self.driver.list_namespaces() {
            Ok(namespaces) => {
                for ns in namespaces.into_iter().filter(|n| naming::is_managed_namespace(n)) {
                    match self.driver.delete_namespace(&ns) {
                        Ok(()) => report.swept_namespaces.push(ns),
                        Err(e) => tracing::debug!("Sweep could not delete namespace {}: {}", ns, e),
                    }
                }
            }
            Err(e) => tracing::debug!("Sweep could not list namespaces: {}", e),
        }

        match self.driver.list_bridges() {
            Ok(bridges) => {
                for bridge in bridges.into_iter().filter(|b| naming::is_managed_bridge(b)) {
                    match self.driver.delete_link(&bridge) {
                        Ok(()) => report.swept_bridges.push(bridge),
                        Err(e) => tracing::debug!("Sweep could not delete bridge {}: {}", bridge, e),
                    }
                }
            }
            Err(e) => tracing::debug!("Sweep could not list bridges: {}", e),
        }
    }
}
