//! vpcctl - host-local VPC manager
//!
//! Builds isolated virtual networks out of Linux bridges, network
//! namespaces, veth pairs and iptables rules, with one JSON state record
//! per VPC as the source of truth.

mod cli;
mod deploy;
mod error;
mod fleet;
mod logging;
mod manifest;
mod network;
mod output;
mod peering;
mod policy;
mod store;
mod sys;
mod vpc;

use cli::{Cli, Commands};
use deploy::AppDeployer;
use error::Result;
use fleet::FleetReconciler;
use network::IpRouteDriver;
use peering::PeeringManager;
use policy::PolicyEngine;
use store::StateStore;
use vpc::VpcManager;

fn main() {
    if let Err(e) = run() {
        tracing::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse_args();

    // Commands that don't require config
    if let Commands::Completion { shell } = cli.command {
        Cli::generate_completion(shell);
        return Ok(());
    }

    let (config_path, explicit) = cli.config_path();
    let config = manifest::load(&config_path, explicit)?;
    config.ensure_dirs()?;
    let global = &config.config;

    logging::init(&global.log_file(), cli.verbose)?;

    if cli.command.is_mutating() {
        sys::ensure_privileged()?;
    }

    let driver = IpRouteDriver::new(global.command_timeout());
    let store = StateStore::new(&global.state_dir, global.retry.clone())?;
    let vpcs = VpcManager::new(&store, &driver);

    match cli.command {
        Commands::CreateVpc {
            name,
            cidr,
            internet_iface,
        } => {
            let record = vpcs.create_vpc(&name, &cidr, &internet_iface)?;
            if cli.json {
                println!("{}", output::inspect(&record, true)?);
            } else {
                println!("VPC {} ready ({}, bridge {})", record.name, record.cidr, record.bridge);
            }
        }
        Commands::AddSubnet {
            vpc,
            name,
            cidr,
            kind,
        } => {
            let subnet = vpcs.add_subnet(&vpc, &name, &cidr, kind)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&subnet)?);
            } else {
                println!(
                    "Subnet {} ready in VPC {} ({} {}, namespace {})",
                    name, vpc, subnet.kind, subnet.cidr, subnet.namespace
                );
            }
        }
        Commands::DeployApp {
            vpc,
            subnet,
            name,
            cmd,
        } => {
            let deployer = AppDeployer::new(vpcs, &global.run_dir);
            let deployment = deployer.deploy(&vpc, &subnet, &name, &cmd)?;
            print!("{}", output::deployment(&deployment));
        }
        Commands::ApplyPolicy { policy_file } => {
            let path = policy::resolve_path(&policy_file, &global.policies_dir);
            let document = policy::load(&path)?;
            let report = PolicyEngine::new(&store, &driver).apply(&document)?;
            print!("{}", output::policy_report(&report));
        }
        Commands::Peer {
            vpc_a,
            vpc_b,
            allowed_cidrs,
        } => {
            let peering = PeeringManager::new(&store, &driver).peer(&vpc_a, &vpc_b, &allowed_cidrs)?;
            println!(
                "Peered {} <-> {} ({})",
                vpc_a,
                vpc_b,
                peering
                    .allowed_cidrs
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            );
        }
        Commands::Unpeer { vpc_a, vpc_b } => {
            let cleanup = PeeringManager::new(&store, &driver).unpeer(&vpc_a, &vpc_b)?;
            eprint!("{}", output::warnings(&cleanup));
            println!("Unpeered {} <-> {}", vpc_a, vpc_b);
        }
        Commands::Inspect { vpc } => match vpcs.inspect(&vpc) {
            Ok(record) => println!("{}", output::inspect(&record, cli.json)?.trim_end()),
            Err(e) if cli.json => println!("{}", output::inspect_error(&e.to_string())?),
            Err(e) => return Err(e),
        },
        Commands::ListVpcs => {
            let records = vpcs.list()?;
            println!("{}", output::list(&records, cli.json)?.trim_end());
        }
        Commands::DeleteVpc { name } => {
            let cleanup = vpcs.delete_vpc(&name)?;
            eprint!("{}", output::warnings(&cleanup));
            println!("VPC {} deleted", name);
        }
        Commands::TeardownAll => {
            let report = FleetReconciler::new(&store, &driver).teardown_all()?;
            print!("{}", output::teardown_report(&report));
        }
        // Already handled above
        Commands::Completion { .. } => unreachable!(),
    }

    Ok(())
}
