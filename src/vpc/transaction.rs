//! Provisioning transactions
//!
//! A transaction wraps a multi-step driver sequence. Every resource created
//! along the way registers an [`Undo`] step; if the sequence fails, the undo
//! steps run in reverse order and the original error is returned.
//!
//! Lifecycle is tracked by a state machine:
//!
//! ```text
//! Pending -> Applying -> Committed
//!                    \-> RollingBack -> RolledBack
//! ```

// Not `use crate::error::Result`: `state_machine!` expands to code that
// names the two-parameter `std::result::Result`.
use crate::error;
use crate::network::{NatRule, ResourceDriver, Route};
use crate::vpc::cleanup::Cleanup;
use ipnet::Ipv4Net;
use state_machines::state_machine;

state_machine! {
    name: ProvisionMachine,
    dynamic: true,
    initial: Pending,
    states: [Pending, Applying, Committed, RollingBack, RolledBack],
    events {
        begin {
            transition: { from: Pending, to: Applying }
        }
        commit {
            transition: { from: Applying, to: Committed }
        }
        abort {
            transition: { from: Applying, to: RollingBack }
        }
        settle {
            transition: { from: RollingBack, to: RolledBack }
        }
    }
}

/// Compensating action for one created resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Undo {
    DeleteLink(String),
    DeleteNamespace(String),
    DeleteAddress { iface: String, addr: Ipv4Net },
    DeleteRoute(Route),
    DeleteNatRule(NatRule),
}

impl Undo {
    fn apply<D: ResourceDriver>(&self, driver: &D) -> error::Result<()> {
        match self {
            Undo::DeleteLink(name) => driver.delete_link(name),
            Undo::DeleteNamespace(name) => driver.delete_namespace(name),
            Undo::DeleteAddress { iface, addr } => driver.delete_address(iface, addr),
            Undo::DeleteRoute(route) => driver.delete_route(route),
            Undo::DeleteNatRule(rule) => driver.delete_nat_rule(rule),
        }
    }

    fn describe(&self) -> String {
        match self {
            Undo::DeleteLink(name) => format!("delete link {}", name),
            Undo::DeleteNamespace(name) => format!("delete namespace {}", name),
            Undo::DeleteAddress { iface, addr } => format!("delete address {} on {}", addr, iface),
            Undo::DeleteRoute(route) => format!("delete route {}", route),
            Undo::DeleteNatRule(rule) => format!("delete NAT rule for {}", rule.source),
        }
    }
}

/// An in-flight provisioning sequence
pub struct Transaction<'a, D: ResourceDriver> {
    driver: &'a D,
    label: String,
    machine: DynamicProvisionMachine<()>,
    undo: Vec<Undo>,
}

impl<'a, D: ResourceDriver> Transaction<'a, D> {
    fn begin(driver: &'a D, label: &str) -> Self {
        let mut machine = ProvisionMachine::new(()).into_dynamic();
        machine.handle(ProvisionMachineEvent::Begin).ok();

        Self {
            driver,
            label: label.to_string(),
            machine,
            undo: Vec::new(),
        }
    }

    /// Run `steps` as one transaction, rolling back on failure
    ///
    /// Rollback failures are logged and do not replace the original error.
    pub fn run<T>(
        driver: &'a D,
        label: &str,
        steps: impl FnOnce(&mut Self) -> error::Result<T>,
    ) -> error::Result<T> {
        let mut tx = Self::begin(driver, label);

        match steps(&mut tx) {
            Ok(value) => {
                tx.commit();
                Ok(value)
            }
            Err(e) => {
                tracing::error!("{} failed, rolling back: {}", tx.label, e);
                let cleanup = tx.rollback();
                if !cleanup.is_clean() {
                    tracing::warn!(
                        "Rollback of {} left {} resource(s) behind",
                        label,
                        cleanup.warnings().len()
                    );
                }
                Err(e)
            }
        }
    }

    /// Driver used by the steps
    pub fn driver(&self) -> &'a D {
        self.driver
    }

    /// Register the compensating action for a resource just created
    pub fn created(&mut self, undo: Undo) {
        tracing::debug!("{}: registered undo step '{}'", self.label, undo.describe());
        self.undo.push(undo);
    }

    pub fn state(&self) -> &str {
        self.machine.current_state()
    }

    fn commit(&mut self) {
        self.machine.handle(ProvisionMachineEvent::Commit).ok();
        self.undo.clear();
    }

    fn rollback(&mut self) -> Cleanup {
        self.machine.handle(ProvisionMachineEvent::Abort).ok();

        let mut cleanup = Cleanup::new();
        while let Some(step) = self.undo.pop() {
            cleanup.attempt(&step.describe(), step.apply(self.driver));
        }

        self.machine.handle(ProvisionMachineEvent::Settle).ok();
        cleanup
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::network::sim::{HostState, SimulatedHost};

    #[test]
    fn test_machine_transitions() {
        let mut machine = ProvisionMachine::new(()).into_dynamic();
        assert_eq!(machine.current_state(), "Pending");
        assert!(machine.handle(ProvisionMachineEvent::Commit).is_err());

        machine.handle(ProvisionMachineEvent::Begin).unwrap();
        machine.handle(ProvisionMachineEvent::Abort).unwrap();
        machine.handle(ProvisionMachineEvent::Settle).unwrap();
        assert_eq!(machine.current_state(), "RolledBack");
    }

    #[test]
    fn test_commit_keeps_resources() {
        let host = SimulatedHost::new();
        let result = Transaction::run(&host, "test", |tx| {
            assert_eq!(tx.state(), "Applying");
            tx.driver().create_bridge("br0")?;
            tx.created(Undo::DeleteLink("br0".into()));
            Ok(7)
        });

        assert_eq!(result.unwrap(), 7);
        assert!(host.has_link("br0"));
    }

    #[test]
    fn test_failure_undoes_in_reverse_order() {
        let host = SimulatedHost::new();
        let result: Result<()> = Transaction::run(&host, "test", |tx| {
            tx.driver().create_namespace("ns")?;
            tx.created(Undo::DeleteNamespace("ns".into()));
            tx.driver().create_veth_pair("a", "b")?;
            tx.created(Undo::DeleteLink("a".into()));
            Err(Error::ConfigConflict("boom".into()))
        });

        assert!(matches!(result, Err(Error::ConfigConflict(m)) if m == "boom"));
        assert_eq!(host.snapshot(), HostState::default());

        let calls = host.calls();
        let link = calls.iter().position(|c| c == "delete_link a").unwrap();
        let ns = calls.iter().position(|c| c == "delete_namespace ns").unwrap();
        assert!(link < ns);
    }

    #[test]
    fn test_rollback_failure_keeps_original_error() {
        let host = SimulatedHost::new();
        let result: Result<()> = Transaction::run(&host, "test", |tx| {
            tx.driver().create_bridge("br0")?;
            tx.created(Undo::DeleteLink("br0".into()));
            tx.driver().fail_on("delete_link");
            Err(Error::VpcNotFound("x".into()))
        });

        assert!(matches!(result, Err(Error::VpcNotFound(_))));
        assert!(host.has_link("br0"));
    }
}
