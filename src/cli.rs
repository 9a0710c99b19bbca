//! Command-line interface for vpcctl
//!
//! Uses clap with derive for type-safe CLI parsing

use crate::manifest::DEFAULT_CONFIG_FILE;
use crate::store::SubnetType;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// vpcctl - host-local VPCs on Linux bridges and network namespaces
#[derive(Parser)]
#[command(name = "vpcctl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path (defaults to vpcctl.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Create a new VPC
    CreateVpc {
        /// VPC name
        #[arg(long)]
        name: String,

        /// VPC CIDR block (e.g., 10.0.0.0/16)
        #[arg(long)]
        cidr: String,

        /// Uplink interface used for NAT
        #[arg(long)]
        internet_iface: String,
    },

    /// Add a subnet to a VPC
    AddSubnet {
        /// VPC name
        #[arg(long)]
        vpc: String,

        /// Subnet name
        #[arg(long)]
        name: String,

        /// Subnet CIDR, contained in the VPC CIDR
        #[arg(long)]
        cidr: String,

        /// Subnet type
        #[arg(long = "type", value_enum)]
        kind: SubnetType,
    },

    /// Deploy an application in a subnet
    DeployApp {
        /// VPC name
        #[arg(long)]
        vpc: String,

        /// Subnet name
        #[arg(long)]
        subnet: String,

        /// Application name
        #[arg(long)]
        name: String,

        /// Command to run
        #[arg(long)]
        cmd: String,
    },

    /// Apply a firewall policy file
    ApplyPolicy {
        /// Policy JSON file (relative names are also looked up in policies_dir)
        #[arg(long)]
        policy_file: PathBuf,
    },

    /// Peer two VPCs
    Peer {
        /// First VPC
        #[arg(long)]
        vpc_a: String,

        /// Second VPC
        #[arg(long)]
        vpc_b: String,

        /// Comma-separated CIDRs routed across the peering
        #[arg(long)]
        allowed_cidrs: String,
    },

    /// Remove a peering between two VPCs
    Unpeer {
        /// First VPC
        #[arg(long)]
        vpc_a: String,

        /// Second VPC
        #[arg(long)]
        vpc_b: String,
    },

    /// Inspect a VPC
    Inspect {
        /// VPC name
        #[arg(long)]
        vpc: String,
    },

    /// List all VPCs
    ListVpcs,

    /// Delete a VPC and all its resources
    DeleteVpc {
        /// VPC name
        #[arg(long)]
        name: String,
    },

    /// Delete all VPCs and sweep leftover resources
    TeardownAll,

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completion for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Commands {
    /// Whether the command changes host network state
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            Commands::Inspect { .. } | Commands::ListVpcs | Commands::Completion { .. }
        )
    }
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Config path and whether it was given explicitly
    pub fn config_path(&self) -> (PathBuf, bool) {
        match &self.config {
            Some(path) => (path.clone(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        }
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "vpcctl", &mut std::io::stdout());
    }
}
