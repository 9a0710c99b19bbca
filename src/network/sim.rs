//! In-memory host used by tests
//!
//! Models enough kernel behaviour for the orchestrator's invariants to be
//! checked against host state: veth peers die together, deleting a
//! namespace destroys the links inside it, and creating a name twice fails.

use crate::error::{Error, Result};
use crate::network::driver::ResourceDriver;
use crate::network::rules::{Chain, FirewallRule, NatRule, Route};
use ipnet::Ipv4Net;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

/// (namespace, interface); `None` is the host namespace
type LinkKey = (Option<String>, String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    Bridge,
    Veth { peer: LinkKey },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub kind: LinkKind,
    pub master: Option<String>,
    pub up: bool,
}

/// Complete observable host state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostState {
    pub links: BTreeMap<LinkKey, Link>,
    pub namespaces: BTreeSet<String>,
    pub addresses: BTreeSet<(Option<String>, String, Ipv4Net)>,
    pub routes: Vec<(Option<String>, Route)>,
    pub nat: Vec<NatRule>,
    pub firewall: BTreeMap<String, Vec<FirewallRule>>,
    pub forwarding: bool,
}

/// Simulated host implementing [`ResourceDriver`]
#[derive(Debug, Default)]
pub struct SimulatedHost {
    state: RefCell<HostState>,
    calls: RefCell<Vec<String>>,
    fail_on: RefCell<BTreeSet<String>>,
}

fn key(netns: Option<&str>, name: &str) -> LinkKey {
    (netns.map(str::to_string), name.to_string())
}

fn failed(command: String, message: &str) -> Error {
    Error::CommandFailed {
        command,
        message: message.to_string(),
    }
}

impl SimulatedHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call of `op` fail
    pub fn fail_on(&self, op: &str) {
        self.fail_on.borrow_mut().insert(op.to_string());
    }

    /// Stop injecting failures
    pub fn clear_failures(&self) {
        self.fail_on.borrow_mut().clear();
    }

    pub fn snapshot(&self) -> HostState {
        self.state.borrow().clone()
    }

    /// Calls made so far, as `op target`
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Number of calls that create something
    pub fn creations(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with("create_") || c.starts_with("add_"))
            .count()
    }

    pub fn has_link(&self, name: &str) -> bool {
        self.state.borrow().links.contains_key(&key(None, name))
    }

    pub fn has_link_in(&self, netns: &str, name: &str) -> bool {
        self.state.borrow().links.contains_key(&key(Some(netns), name))
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.state.borrow().namespaces.contains(name)
    }

    pub fn master_of(&self, name: &str) -> Option<String> {
        self.state
            .borrow()
            .links
            .get(&key(None, name))
            .and_then(|l| l.master.clone())
    }

    pub fn is_up(&self, netns: Option<&str>, name: &str) -> bool {
        self.state
            .borrow()
            .links
            .get(&key(netns, name))
            .is_some_and(|l| l.up)
    }

    pub fn addresses_of(&self, netns: Option<&str>, iface: &str) -> Vec<Ipv4Net> {
        self.state
            .borrow()
            .addresses
            .iter()
            .filter(|(ns, name, _)| ns.as_deref() == netns && name == iface)
            .map(|(_, _, addr)| *addr)
            .collect()
    }

    pub fn routes_in(&self, netns: Option<&str>) -> Vec<Route> {
        self.state
            .borrow()
            .routes
            .iter()
            .filter(|(ns, _)| ns.as_deref() == netns)
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn nat_rules(&self) -> Vec<NatRule> {
        self.state.borrow().nat.clone()
    }

    pub fn firewall_rules(&self, netns: &str) -> Vec<FirewallRule> {
        self.state
            .borrow()
            .firewall
            .get(netns)
            .cloned()
            .unwrap_or_default()
    }

    pub fn forwarding(&self) -> bool {
        self.state.borrow().forwarding
    }

    /// Create a namespace behind the orchestrator's back
    pub fn inject_namespace(&self, name: &str) {
        self.state.borrow_mut().namespaces.insert(name.to_string());
    }

    /// Create a bridge behind the orchestrator's back
    pub fn inject_bridge(&self, name: &str) {
        self.state.borrow_mut().links.insert(
            key(None, name),
            Link {
                kind: LinkKind::Bridge,
                master: None,
                up: false,
            },
        );
    }

    /// Record a call and apply failure injection
    fn enter(&self, op: &str, target: &str) -> Result<()> {
        let command = format!("{} {}", op, target);
        self.calls.borrow_mut().push(command.clone());
        if self.fail_on.borrow().contains(op) {
            return Err(failed(command, "injected failure"));
        }
        Ok(())
    }

    /// Remove a link and everything hanging off it
    fn remove_link(state: &mut HostState, link: &LinkKey) {
        let Some(removed) = state.links.remove(link) else {
            return;
        };

        state
            .addresses
            .retain(|(ns, name, _)| !(ns == &link.0 && name == &link.1));
        state.routes.retain(|(ns, route)| {
            !(ns == &link.0 && route.dev.as_deref() == Some(link.1.as_str()))
        });

        match removed.kind {
            LinkKind::Veth { peer } => Self::remove_link(state, &peer),
            LinkKind::Bridge => {
                for other in state.links.values_mut() {
                    if other.master.as_deref() == Some(link.1.as_str()) {
                        other.master = None;
                    }
                }
            }
        }
    }

    fn require_link(state: &HostState, link: &LinkKey, command: &str) -> Result<()> {
        if state.links.contains_key(link) {
            Ok(())
        } else {
            Err(failed(
                command.to_string(),
                &format!("Cannot find device \"{}\"", link.1),
            ))
        }
    }
}

impl ResourceDriver for SimulatedHost {
    fn create_bridge(&self, name: &str) -> Result<()> {
        self.enter("create_bridge", name)?;
        let mut state = self.state.borrow_mut();
        if state.links.contains_key(&key(None, name)) {
            return Err(failed(format!("create_bridge {}", name), "File exists"));
        }
        state.links.insert(
            key(None, name),
            Link {
                kind: LinkKind::Bridge,
                master: None,
                up: false,
            },
        );
        Ok(())
    }

    fn link_exists(&self, name: &str) -> Result<bool> {
        self.enter("link_exists", name)?;
        Ok(self.has_link(name))
    }

    fn delete_link(&self, name: &str) -> Result<()> {
        self.enter("delete_link", name)?;
        Self::remove_link(&mut self.state.borrow_mut(), &key(None, name));
        Ok(())
    }

    fn set_link_up(&self, name: &str, netns: Option<&str>) -> Result<()> {
        self.enter("set_link_up", name)?;
        let mut state = self.state.borrow_mut();

        // Loopback exists in every namespace
        if name == "lo" {
            return match netns {
                Some(ns) if !state.namespaces.contains(ns) => {
                    Err(failed("set_link_up lo".to_string(), "Cannot open network namespace"))
                }
                _ => Ok(()),
            };
        }

        match state.links.get_mut(&key(netns, name)) {
            Some(link) => {
                link.up = true;
                Ok(())
            }
            None => Err(failed(
                format!("set_link_up {}", name),
                &format!("Cannot find device \"{}\"", name),
            )),
        }
    }

    fn add_address(&self, iface: &str, addr: &Ipv4Net, netns: Option<&str>) -> Result<()> {
        self.enter("add_address", &format!("{} {}", iface, addr))?;
        let mut state = self.state.borrow_mut();
        Self::require_link(&state, &key(netns, iface), "add_address")?;
        state
            .addresses
            .insert((netns.map(str::to_string), iface.to_string(), *addr));
        Ok(())
    }

    fn delete_address(&self, iface: &str, addr: &Ipv4Net) -> Result<()> {
        self.enter("delete_address", &format!("{} {}", iface, addr))?;
        self.state
            .borrow_mut()
            .addresses
            .remove(&(None, iface.to_string(), *addr));
        Ok(())
    }

    fn create_namespace(&self, name: &str) -> Result<()> {
        self.enter("create_namespace", name)?;
        let mut state = self.state.borrow_mut();
        if !state.namespaces.insert(name.to_string()) {
            return Err(failed(format!("create_namespace {}", name), "File exists"));
        }
        Ok(())
    }

    fn delete_namespace(&self, name: &str) -> Result<()> {
        self.enter("delete_namespace", name)?;
        let mut state = self.state.borrow_mut();
        if !state.namespaces.remove(name) {
            return Ok(());
        }

        let inside: Vec<LinkKey> = state
            .links
            .keys()
            .filter(|(ns, _)| ns.as_deref() == Some(name))
            .cloned()
            .collect();
        for link in inside {
            Self::remove_link(&mut state, &link);
        }

        state.routes.retain(|(ns, _)| ns.as_deref() != Some(name));
        state.addresses.retain(|(ns, _, _)| ns.as_deref() != Some(name));
        state.firewall.remove(name);
        Ok(())
    }

    fn list_namespaces(&self) -> Result<Vec<String>> {
        self.enter("list_namespaces", "")?;
        Ok(self.state.borrow().namespaces.iter().cloned().collect())
    }

    fn list_bridges(&self) -> Result<Vec<String>> {
        self.enter("list_bridges", "")?;
        Ok(self
            .state
            .borrow()
            .links
            .iter()
            .filter(|((ns, _), link)| ns.is_none() && link.kind == LinkKind::Bridge)
            .map(|((_, name), _)| name.clone())
            .collect())
    }

    fn create_veth_pair(&self, name: &str, peer: &str) -> Result<()> {
        self.enter("create_veth_pair", &format!("{} {}", name, peer))?;
        let mut state = self.state.borrow_mut();
        let a = key(None, name);
        let b = key(None, peer);
        if state.links.contains_key(&a) || state.links.contains_key(&b) {
            return Err(failed(format!("create_veth_pair {}", name), "File exists"));
        }

        state.links.insert(
            a.clone(),
            Link {
                kind: LinkKind::Veth { peer: b.clone() },
                master: None,
                up: false,
            },
        );
        state.links.insert(
            b,
            Link {
                kind: LinkKind::Veth { peer: a },
                master: None,
                up: false,
            },
        );
        Ok(())
    }

    fn attach_to_bridge(&self, link: &str, bridge: &str) -> Result<()> {
        self.enter("attach_to_bridge", &format!("{} {}", link, bridge))?;
        let mut state = self.state.borrow_mut();
        Self::require_link(&state, &key(None, bridge), "attach_to_bridge")?;
        match state.links.get_mut(&key(None, link)) {
            Some(l) => {
                l.master = Some(bridge.to_string());
                Ok(())
            }
            None => Err(failed(
                format!("attach_to_bridge {}", link),
                &format!("Cannot find device \"{}\"", link),
            )),
        }
    }

    fn move_to_namespace(&self, link: &str, netns: &str) -> Result<()> {
        self.enter("move_to_namespace", &format!("{} {}", link, netns))?;
        let mut state = self.state.borrow_mut();
        if !state.namespaces.contains(netns) {
            return Err(failed(
                format!("move_to_namespace {}", link),
                "Invalid \"netns\" value",
            ));
        }

        let from = key(None, link);
        let to = key(Some(netns), link);
        Self::require_link(&state, &from, "move_to_namespace")?;
        if state.links.contains_key(&to) {
            return Err(failed(format!("move_to_namespace {}", link), "File exists"));
        }

        let Some(mut moved) = state.links.remove(&from) else {
            return Ok(());
        };
        moved.master = None;
        moved.up = false;

        // Keep the peer's back-reference pointing at the new location
        if let LinkKind::Veth { peer } = &moved.kind {
            if let Some(other) = state.links.get_mut(peer) {
                other.kind = LinkKind::Veth { peer: to.clone() };
            }
        }
        state.links.insert(to, moved);
        Ok(())
    }

    fn add_route(&self, route: &Route, netns: Option<&str>) -> Result<()> {
        self.enter("add_route", &route.to_string())?;
        let mut state = self.state.borrow_mut();
        if let Some(dev) = &route.dev {
            Self::require_link(&state, &key(netns, dev), "add_route")?;
        }

        let entry = (netns.map(str::to_string), route.clone());
        if !state.routes.contains(&entry) {
            state.routes.push(entry);
        }
        Ok(())
    }

    fn delete_route(&self, route: &Route) -> Result<()> {
        self.enter("delete_route", &route.to_string())?;
        self.state
            .borrow_mut()
            .routes
            .retain(|(ns, r)| !(ns.is_none() && r == route));
        Ok(())
    }

    fn add_nat_rule(&self, rule: &NatRule) -> Result<()> {
        self.enter("add_nat_rule", &rule.source.to_string())?;
        let mut state = self.state.borrow_mut();
        if !state.nat.contains(rule) {
            state.nat.push(rule.clone());
        }
        Ok(())
    }

    fn delete_nat_rule(&self, rule: &NatRule) -> Result<()> {
        self.enter("delete_nat_rule", &rule.source.to_string())?;
        self.state.borrow_mut().nat.retain(|r| r != rule);
        Ok(())
    }

    fn add_firewall_rule(&self, netns: &str, rule: &FirewallRule) -> Result<()> {
        self.enter("add_firewall_rule", &format!("{} {}", netns, rule))?;
        let mut state = self.state.borrow_mut();
        if !state.namespaces.contains(netns) {
            return Err(failed(
                format!("add_firewall_rule {}", netns),
                "Cannot open network namespace",
            ));
        }
        state
            .firewall
            .entry(netns.to_string())
            .or_default()
            .push(rule.clone());
        Ok(())
    }

    fn flush_chain(&self, netns: &str, chain: Chain) -> Result<()> {
        self.enter("flush_chain", &format!("{} {}", netns, chain))?;
        let mut state = self.state.borrow_mut();
        if !state.namespaces.contains(netns) {
            return Err(failed(
                format!("flush_chain {}", netns),
                "Cannot open network namespace",
            ));
        }
        if let Some(rules) = state.firewall.get_mut(netns) {
            rules.retain(|r| r.chain != chain);
        }
        Ok(())
    }

    fn enable_ip_forwarding(&self) -> Result<()> {
        self.enter("enable_ip_forwarding", "")?;
        self.state.borrow_mut().forwarding = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_veth_peers_die_together() {
        let host = SimulatedHost::new();
        host.create_veth_pair("a", "b").unwrap();
        host.delete_link("b").unwrap();
        assert!(!host.has_link("a"));
    }

    #[test]
    fn test_namespace_delete_takes_links_with_it() {
        let host = SimulatedHost::new();
        host.create_namespace("ns1").unwrap();
        host.create_veth_pair("host-end", "ns-end").unwrap();
        host.move_to_namespace("ns-end", "ns1").unwrap();
        assert!(host.has_link_in("ns1", "ns-end"));

        host.delete_namespace("ns1").unwrap();
        assert!(!host.has_link("host-end"));
        assert_eq!(host.snapshot(), HostState::default());
    }

    #[test]
    fn test_duplicate_creation_fails() {
        let host = SimulatedHost::new();
        host.create_bridge("br0").unwrap();
        assert!(host.create_bridge("br0").is_err());
        host.create_namespace("ns").unwrap();
        assert!(host.create_namespace("ns").is_err());
    }

    #[test]
    fn test_injected_failure() {
        let host = SimulatedHost::new();
        host.fail_on("create_bridge");
        assert!(matches!(
            host.create_bridge("br0"),
            Err(Error::CommandFailed { .. })
        ));
        host.clear_failures();
        assert!(host.create_bridge("br0").is_ok());
    }
}
