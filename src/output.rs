//! Rendering of command results for stdout
//!
//! Every renderer returns a `String`; `main` decides where it goes.

use crate::deploy::Deployment;
use crate::error::Result;
use crate::fleet::TeardownReport;
use crate::policy::PolicyReport;
use crate::store::{PeeringRecord, VpcRecord};
use crate::vpc::Cleanup;
use serde_json::json;
use std::fmt::Write;

/// Full topology of one VPC
pub fn inspect(record: &VpcRecord, as_json: bool) -> Result<String> {
    if as_json {
        return Ok(serde_json::to_string_pretty(record)?);
    }

    let mut out = String::new();
    writeln!(out, "VPC: {}", record.name).ok();
    writeln!(out, "CIDR: {}", record.cidr).ok();
    writeln!(out, "Bridge: {}", record.bridge).ok();
    writeln!(out, "Internet Interface: {}", record.internet_iface).ok();
    writeln!(out, "Created: {}", record.created.to_rfc3339()).ok();

    writeln!(out, "\nSubnets:").ok();
    if record.subnets.is_empty() {
        writeln!(out, "  (none)").ok();
    }
    for (name, subnet) in &record.subnets {
        writeln!(out, "  {}:", name).ok();
        writeln!(out, "    CIDR: {}", subnet.cidr).ok();
        writeln!(out, "    Type: {}", subnet.kind).ok();
        writeln!(out, "    Namespace: {}", subnet.namespace).ok();
        writeln!(out, "    Gateway: {}", subnet.gateway).ok();
        writeln!(out, "    Host IP: {}", subnet.host_ip).ok();
    }

    if !record.peers.is_empty() {
        writeln!(out, "\nPeers:").ok();
        for peering in record.peers.values() {
            writeln!(out, "  {}: {}", peering.peer, render_cidrs(peering)).ok();
        }
    }

    Ok(out)
}

/// `inspect --json` reports lookup failures in-band
pub fn inspect_error(message: &str) -> Result<String> {
    Ok(serde_json::to_string(&json!({ "error": message }))?)
}

fn render_cidrs(peering: &PeeringRecord) -> String {
    peering
        .allowed_cidrs
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Summary table of all VPCs
pub fn list(records: &[VpcRecord], as_json: bool) -> Result<String> {
    if as_json {
        let data: Vec<serde_json::Value> = records
            .iter()
            .map(|r| {
                json!({
                    "name": r.name,
                    "cidr": r.cidr.to_string(),
                    "subnets": r.subnets.len(),
                    "peers": r.peers.keys().collect::<Vec<_>>(),
                })
            })
            .collect();
        return Ok(serde_json::to_string_pretty(&data)?);
    }

    if records.is_empty() {
        return Ok("No VPCs found\n".to_string());
    }

    let mut out = String::new();
    writeln!(out, "{:<20} {:<18} {:<8} {:<6}", "NAME", "CIDR", "SUBNETS", "PEERS").ok();
    writeln!(out, "{}", "-".repeat(55)).ok();
    for r in records {
        writeln!(
            out,
            "{:<20} {:<18} {:<8} {:<6}",
            r.name,
            r.cidr.to_string(),
            r.subnets.len(),
            r.peers.len()
        )
        .ok();
    }
    Ok(out)
}

/// Outcome of apply-policy
pub fn policy_report(report: &PolicyReport) -> String {
    let mut out = String::new();
    for (subnet, ns, count) in &report.applied {
        writeln!(out, "Applied {} rule(s) to {} ({})", count, ns, subnet).ok();
    }
    for subnet in &report.skipped {
        writeln!(out, "Skipped {}: no matching subnet", subnet).ok();
    }
    out
}

/// Outcome of deploy-app
pub fn deployment(deployment: &Deployment) -> String {
    format!(
        "Deployed {} in {}\n  Script: {}\n  PID file: {}\n",
        deployment.app,
        deployment.namespace,
        deployment.script.display(),
        deployment.pid_file.display()
    )
}

/// Outcome of teardown-all
pub fn teardown_report(report: &TeardownReport) -> String {
    let mut out = String::new();
    writeln!(
        out,
        "Deleted {} VPC(s), swept {} namespace(s) and {} bridge(s)",
        report.deleted.len(),
        report.swept_namespaces.len(),
        report.swept_bridges.len()
    )
    .ok();
    for name in &report.discarded {
        writeln!(out, "Discarded unreadable record {}", name).ok();
    }
    out.push_str(&warnings(&report.cleanup));
    out
}

/// Best-effort step failures, one per line
pub fn warnings(cleanup: &Cleanup) -> String {
    let mut out = String::new();
    for warning in cleanup.warnings() {
        writeln!(out, "Warning: {}", warning).ok();
    }
    out
}
