//! iproute2 / iptables adapter
//!
//! Implements [`ResourceDriver`] by shelling out to `ip`, `iptables` and
//! `sysctl`. Every invocation is bounded by the configured timeout; a child
//! that outlives it is killed and reaped.

use crate::error::{Error, Result};
use crate::network::driver::ResourceDriver;
use crate::network::inventory;
use crate::network::rules::{Chain, FirewallRule, NatRule, Route};
use ipnet::Ipv4Net;
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Stderr fragments meaning "already there" on an add
const ALREADY_EXISTS: &[&str] = &["File exists", "Address already assigned"];

/// Stderr fragments meaning "already gone" on a delete
const ALREADY_GONE: &[&str] = &[
    "Cannot find device",
    "does not exist",
    "No such file",
    "No such process",
    "Cannot assign requested address",
    "does a matching rule exist",
];

/// Read a child pipe to the end on its own thread
fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn collect(reader: Option<JoinHandle<String>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

/// Captured result of a finished command
#[derive(Debug)]
struct CommandOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

/// Driver backed by the host's `ip` and `iptables` binaries
#[derive(Debug, Clone)]
pub struct IpRouteDriver {
    timeout: Duration,
}

impl IpRouteDriver {
    /// Create a driver whose commands are killed after `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Spawn a command and wait for it, enforcing the timeout
    fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let command = render(program, args);
        tracing::debug!("Executing: {}", command);

        let mut child = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::CommandFailed {
                command: command.clone(),
                message: e.to_string(),
            })?;

        // Drained concurrently so a chatty child never blocks on a full pipe
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    return Ok(CommandOutput {
                        success: status.success(),
                        stdout: collect(stdout),
                        stderr: collect(stderr),
                    });
                }
                Ok(None) => {
                    if start.elapsed() > self.timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        tracing::warn!("Command timed out: {}", command);
                        return Err(Error::CommandTimeout {
                            command,
                            secs: self.timeout.as_secs(),
                        });
                    }
                    thread::sleep(Duration::from_millis(20));
                }
                Err(e) => {
                    return Err(Error::CommandFailed {
                        command,
                        message: format!("Failed to wait on process: {}", e),
                    });
                }
            }
        }
    }

    /// Run a command that must succeed, returning its stdout
    fn exec(&self, program: &str, args: &[String]) -> Result<String> {
        self.exec_tolerating(program, args, &[])
    }

    /// Run a command, treating failures whose stderr contains one of
    /// `tolerated` as success
    fn exec_tolerating(&self, program: &str, args: &[String], tolerated: &[&str]) -> Result<String> {
        let output = self.run(program, args)?;
        if output.success {
            return Ok(output.stdout);
        }

        if is_tolerated(&output.stderr, tolerated) {
            tracing::debug!(
                "Ignoring benign failure of '{}': {}",
                render(program, args),
                output.stderr.trim()
            );
            return Ok(output.stdout);
        }

        Err(Error::CommandFailed {
            command: render(program, args),
            message: output.stderr.trim().to_string(),
        })
    }

    fn ip(&self, netns: Option<&str>, args: &[&str]) -> Result<String> {
        self.exec("ip", &ip_args(netns, args))
    }

    fn ip_tolerating(&self, netns: Option<&str>, args: &[&str], tolerated: &[&str]) -> Result<String> {
        self.exec_tolerating("ip", &ip_args(netns, args), tolerated)
    }

    /// Run iptables inside a namespace
    fn netns_iptables(&self, netns: &str, args: Vec<String>) -> Result<String> {
        let mut full = vec![
            "netns".to_string(),
            "exec".to_string(),
            netns.to_string(),
            "iptables".to_string(),
        ];
        full.extend(args);
        self.exec("ip", &full)
    }

    fn nat_args(op: &str, rule: &NatRule) -> Vec<String> {
        let mut args = vec![
            "-t".to_string(),
            "nat".to_string(),
            op.to_string(),
            "POSTROUTING".to_string(),
        ];
        args.extend(rule.to_args());
        args
    }
}

/// Build `ip` arguments, selecting a namespace with `-n` when given
fn ip_args(netns: Option<&str>, args: &[&str]) -> Vec<String> {
    let mut full = Vec::with_capacity(args.len() + 2);
    if let Some(ns) = netns {
        full.push("-n".to_string());
        full.push(ns.to_string());
    }
    full.extend(args.iter().map(|a| a.to_string()));
    full
}

fn render(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

fn is_tolerated(stderr: &str, tolerated: &[&str]) -> bool {
    tolerated.iter().any(|fragment| stderr.contains(fragment))
}

impl ResourceDriver for IpRouteDriver {
    fn create_bridge(&self, name: &str) -> Result<()> {
        self.ip(None, &["link", "add", "name", name, "type", "bridge"])?;
        Ok(())
    }

    fn link_exists(&self, name: &str) -> Result<bool> {
        let output = self.run("ip", &ip_args(None, &["link", "show", name]))?;
        if output.success {
            return Ok(true);
        }
        if is_tolerated(&output.stderr, ALREADY_GONE) {
            return Ok(false);
        }
        Err(Error::CommandFailed {
            command: format!("ip link show {}", name),
            message: output.stderr.trim().to_string(),
        })
    }

    fn delete_link(&self, name: &str) -> Result<()> {
        self.ip_tolerating(None, &["link", "del", name], ALREADY_GONE)?;
        Ok(())
    }

    fn set_link_up(&self, name: &str, netns: Option<&str>) -> Result<()> {
        self.ip(netns, &["link", "set", name, "up"])?;
        Ok(())
    }

    fn add_address(&self, iface: &str, addr: &Ipv4Net, netns: Option<&str>) -> Result<()> {
        let addr = addr.to_string();
        self.ip_tolerating(netns, &["addr", "add", addr.as_str(), "dev", iface], ALREADY_EXISTS)?;
        Ok(())
    }

    fn delete_address(&self, iface: &str, addr: &Ipv4Net) -> Result<()> {
        let addr = addr.to_string();
        self.ip_tolerating(None, &["addr", "del", addr.as_str(), "dev", iface], ALREADY_GONE)?;
        Ok(())
    }

    fn create_namespace(&self, name: &str) -> Result<()> {
        self.ip(None, &["netns", "add", name])?;
        Ok(())
    }

    fn delete_namespace(&self, name: &str) -> Result<()> {
        self.ip_tolerating(None, &["netns", "del", name], ALREADY_GONE)?;
        Ok(())
    }

    fn list_namespaces(&self) -> Result<Vec<String>> {
        let output = self.ip(None, &["netns", "list"])?;
        Ok(inventory::parse_namespaces(&output))
    }

    fn list_bridges(&self) -> Result<Vec<String>> {
        let output = self.ip(None, &["-o", "link", "show", "type", "bridge"])?;
        Ok(inventory::parse_link_names(&output))
    }

    fn create_veth_pair(&self, name: &str, peer: &str) -> Result<()> {
        self.ip(None, &["link", "add", name, "type", "veth", "peer", "name", peer])?;
        Ok(())
    }

    fn attach_to_bridge(&self, link: &str, bridge: &str) -> Result<()> {
        self.ip(None, &["link", "set", link, "master", bridge])?;
        Ok(())
    }

    fn move_to_namespace(&self, link: &str, netns: &str) -> Result<()> {
        self.ip(None, &["link", "set", link, "netns", netns])?;
        Ok(())
    }

    fn add_route(&self, route: &Route, netns: Option<&str>) -> Result<()> {
        let spec = route.to_args();
        let mut args = vec!["route", "add"];
        args.extend(spec.iter().map(String::as_str));
        self.ip_tolerating(netns, &args, ALREADY_EXISTS)?;
        Ok(())
    }

    fn delete_route(&self, route: &Route) -> Result<()> {
        let spec = route.to_args();
        let mut args = vec!["route", "del"];
        args.extend(spec.iter().map(String::as_str));
        self.ip_tolerating(None, &args, ALREADY_GONE)?;
        Ok(())
    }

    fn add_nat_rule(&self, rule: &NatRule) -> Result<()> {
        let check = self.run("iptables", &Self::nat_args("-C", rule))?;
        if check.success {
            tracing::debug!("NAT rule for {} already present", rule.source);
            return Ok(());
        }

        self.exec("iptables", &Self::nat_args("-A", rule))?;
        Ok(())
    }

    fn delete_nat_rule(&self, rule: &NatRule) -> Result<()> {
        self.exec_tolerating("iptables", &Self::nat_args("-D", rule), ALREADY_GONE)?;
        Ok(())
    }

    fn add_firewall_rule(&self, netns: &str, rule: &FirewallRule) -> Result<()> {
        let mut args = vec!["-A".to_string()];
        args.extend(rule.to_args());
        self.netns_iptables(netns, args)?;
        Ok(())
    }

    fn flush_chain(&self, netns: &str, chain: Chain) -> Result<()> {
        self.netns_iptables(netns, vec!["-F".to_string(), chain.as_str().to_string()])?;
        Ok(())
    }

    fn enable_ip_forwarding(&self) -> Result<()> {
        self.exec(
            "sysctl",
            &["-w".to_string(), "net.ipv4.ip_forward=1".to_string()],
        )?;
        Ok(())
    }
}
