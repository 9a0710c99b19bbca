//! Firewall policy engine
//!
//! Policy documents are JSON: a single rule set or a list of them.
//!
//! ```json
//! {
//!   "subnet": "10.0.1.0/24",
//!   "ingress": [{"port": 80, "protocol": "tcp", "action": "allow"}],
//!   "egress":  [{"port": "any", "protocol": "any", "action": "deny"}]
//! }
//! ```
//!
//! The whole document is validated before anything is installed. Each rule
//! set then replaces the INPUT and OUTPUT chains of the namespace whose
//! subnet CIDR matches exactly.

use crate::error::{Error, Result};
use crate::network::ip;
use crate::network::{Chain, FirewallRule, ResourceDriver, Verdict};
use crate::store::StateStore;
use ipnet::Ipv4Net;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

const ANY: &str = "any";
const ALLOW: &str = "allow";

/// A policy file: one rule set or an ordered list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PolicyDocument {
    Many(Vec<RuleSet>),
    One(RuleSet),
}

impl PolicyDocument {
    pub fn rule_sets(&self) -> &[RuleSet] {
        match self {
            PolicyDocument::Many(sets) => sets,
            PolicyDocument::One(set) => std::slice::from_ref(set),
        }
    }
}

/// Rules for one subnet
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSet {
    pub subnet: String,
    #[serde(default)]
    pub ingress: Vec<Rule>,
    #[serde(default)]
    pub egress: Vec<Rule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Rule {
    pub port: PortSpec,
    pub protocol: String,
    pub action: String,
}

/// `"any"`, a number, or a numeric string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PortSpec {
    Number(u64),
    Text(String),
}

impl PortSpec {
    /// `None` for any port
    fn resolve(&self) -> std::result::Result<Option<u16>, String> {
        let number = match self {
            PortSpec::Text(text) if text.eq_ignore_ascii_case(ANY) => return Ok(None),
            PortSpec::Text(text) => text
                .trim()
                .parse::<u64>()
                .map_err(|_| format!("invalid port '{}'", text))?,
            PortSpec::Number(n) => *n,
        };

        match u16::try_from(number) {
            Ok(port) if port > 0 => Ok(Some(port)),
            _ => Err(format!("port {} is out of range", number)),
        }
    }
}

/// Translate one rule into a filter rule on `chain`
fn translate(rule: &Rule, chain: Chain) -> std::result::Result<FirewallRule, String> {
    let port = rule.port.resolve()?;

    let protocol = rule.protocol.trim();
    let protocol = if protocol.eq_ignore_ascii_case(ANY) {
        None
    } else if !protocol.is_empty() && protocol.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(protocol.to_ascii_lowercase())
    } else {
        return Err(format!("invalid protocol '{}'", rule.protocol));
    };

    if let (Some(port), None) = (port, &protocol) {
        return Err(format!("port {} requires a concrete protocol", port));
    }

    let verdict = if rule.action == ALLOW {
        Verdict::Accept
    } else {
        Verdict::Drop
    };

    Ok(FirewallRule {
        chain,
        protocol,
        port,
        verdict,
    })
}

/// A validated rule set, ready to install
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRuleSet {
    pub subnet: Ipv4Net,
    /// Ingress rules followed by egress rules, in document order
    pub rules: Vec<FirewallRule>,
}

/// Validate a whole document
pub fn compile(document: &PolicyDocument) -> Result<Vec<CompiledRuleSet>> {
    document
        .rule_sets()
        .iter()
        .enumerate()
        .map(|(index, set)| {
            let invalid = |what: String| {
                Error::PolicyInvalid(format!("rule set {} ({}): {}", index + 1, set.subnet, what))
            };

            let subnet = ip::validate(&set.subnet).map_err(|e| invalid(e.to_string()))?;

            let ingress = set.ingress.iter().map(|r| (r, Chain::Input));
            let egress = set.egress.iter().map(|r| (r, Chain::Output));
            let rules = ingress
                .chain(egress)
                .map(|(rule, chain)| translate(rule, chain).map_err(&invalid))
                .collect::<Result<Vec<_>>>()?;

            Ok(CompiledRuleSet { subnet, rules })
        })
        .collect()
}

/// Locate a policy file, falling back to the policies directory
pub fn resolve_path(path: &Path, policies_dir: &Path) -> PathBuf {
    if path.exists() || path.is_absolute() {
        return path.to_path_buf();
    }
    let candidate = policies_dir.join(path);
    if candidate.exists() {
        candidate
    } else {
        path.to_path_buf()
    }
}

/// Read and parse a policy file
pub fn load(path: &Path) -> Result<PolicyDocument> {
    let content = fs::read_to_string(path).map_err(|e| Error::PolicyRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    serde_json::from_str(&content).map_err(|e| Error::PolicyInvalid(e.to_string()))
}

/// Outcome of applying a document
#[derive(Debug, Default, PartialEq)]
pub struct PolicyReport {
    /// (subnet, namespace, rules installed)
    pub applied: Vec<(Ipv4Net, String, usize)>,
    /// Subnets no VPC owns
    pub skipped: Vec<Ipv4Net>,
}

/// Installs policy documents into subnet namespaces
pub struct PolicyEngine<'a, D: ResourceDriver> {
    store: &'a StateStore,
    driver: &'a D,
}

impl<'a, D: ResourceDriver> PolicyEngine<'a, D> {
    pub fn new(store: &'a StateStore, driver: &'a D) -> Self {
        Self { store, driver }
    }

    /// Namespace of the first subnet (in VPC then subnet name order) whose
    /// CIDR equals `subnet`
    fn find_namespace(&self, subnet: &Ipv4Net) -> Result<Option<String>> {
        for (name, record) in self.store.scan()? {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!("Skipping unreadable record {}: {}", name, e);
                    continue;
                }
            };

            if let Some(found) = record.subnets.values().find(|s| &s.cidr == subnet) {
                return Ok(Some(found.namespace.clone()));
            }
        }
        Ok(None)
    }

    /// Validate then apply every rule set in order
    pub fn apply(&self, document: &PolicyDocument) -> Result<PolicyReport> {
        let compiled = compile(document)?;

        let _lock = self.store.lock_exclusive()?;
        let mut report = PolicyReport::default();

        for set in compiled {
            let Some(ns) = self.find_namespace(&set.subnet)? else {
                tracing::warn!("No namespace found for subnet {}", set.subnet);
                report.skipped.push(set.subnet);
                continue;
            };

            tracing::info!("Applying {} rule(s) to {} ({})", set.rules.len(), ns, set.subnet);
            self.driver.flush_chain(&ns, Chain::Input)?;
            self.driver.flush_chain(&ns, Chain::Output)?;

            for rule in &set.rules {
                self.driver.add_firewall_rule(&ns, rule)?;
            }

            report.applied.push((set.subnet, ns, set.rules.len()));
        }

        Ok(report)
    }
}
