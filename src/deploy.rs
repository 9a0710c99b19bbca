//! Application deployment into subnet namespaces
//!
//! An app is a shell command started in the background inside a subnet's
//! namespace. A wrapper script under the run directory records the
//! command's pid so it can be found (and killed) later.

use crate::error::{Error, Result};
use crate::network::ResourceDriver;
use crate::network::naming;
use crate::vpc::VpcManager;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// A prepared (script written, not yet launched) deployment
#[derive(Debug, Clone, PartialEq)]
pub struct Deployment {
    pub app: String,
    pub namespace: String,
    pub script: PathBuf,
    pub pid_file: PathBuf,
}

impl Deployment {
    /// Command line that runs the script inside the namespace
    pub fn launch_args(&self) -> Vec<String> {
        vec![
            "netns".to_string(),
            "exec".to_string(),
            self.namespace.clone(),
            "/bin/sh".to_string(),
            self.script.display().to_string(),
        ]
    }
}

/// Quote a string for POSIX sh
fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

/// Wrapper script: start `cmd` in the background, record its pid, wait
pub fn render_script(run_dir: &Path, cmd: &str, pid_file: &Path) -> String {
    format!(
        "#!/bin/sh\ncd {}\n{} &\necho $! > {}\nwait\n",
        shell_quote(&run_dir.display().to_string()),
        cmd,
        shell_quote(&pid_file.display().to_string()),
    )
}

/// Deploys apps into subnets
pub struct AppDeployer<'a, D: ResourceDriver> {
    vpcs: VpcManager<'a, D>,
    run_dir: PathBuf,
}

impl<'a, D: ResourceDriver> AppDeployer<'a, D> {
    pub fn new(vpcs: VpcManager<'a, D>, run_dir: impl Into<PathBuf>) -> Self {
        Self {
            vpcs,
            run_dir: run_dir.into(),
        }
    }

    /// Resolve the subnet and write the wrapper script
    pub fn prepare(&self, vpc: &str, subnet: &str, app: &str, cmd: &str) -> Result<Deployment> {
        naming::validate_name("app", app)?;
        if cmd.trim().is_empty() {
            return Err(Error::InvalidCommand("must not be empty".into()));
        }

        let subnet = self.vpcs.subnet(vpc, subnet)?;

        fs::create_dir_all(&self.run_dir)?;
        let script = self.run_dir.join(format!("app-{}.sh", app));
        let pid_file = self.run_dir.join(format!("{}.pid", app));

        fs::write(&script, render_script(&self.run_dir, cmd, &pid_file))?;
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755))?;
        tracing::debug!("Wrote app script {}", script.display());

        Ok(Deployment {
            app: app.to_string(),
            namespace: subnet.namespace,
            script,
            pid_file,
        })
    }

    /// Start the script detached from this process; returns the launcher pid
    pub fn launch(&self, deployment: &Deployment) -> Result<u32> {
        let pid = spawn_detached("ip", &deployment.launch_args())?;
        tracing::info!(
            "App {} deployed in namespace {} (launcher pid {})",
            deployment.app,
            deployment.namespace,
            pid
        );
        Ok(pid)
    }

    /// Prepare and launch
    pub fn deploy(&self, vpc: &str, subnet: &str, app: &str, cmd: &str) -> Result<Deployment> {
        let deployment = self.prepare(vpc, subnet, app, cmd)?;
        self.launch(&deployment)?;
        Ok(deployment)
    }
}

/// Spawn a process in its own process group with no inherited stdio
fn spawn_detached(program: &str, args: &[String]) -> Result<u32> {
    let command = format!("{} {}", program, args.join(" "));
    tracing::debug!("Executing: {}", command);

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()
        .map_err(|e| Error::CommandFailed {
            command,
            message: e.to_string(),
        })?;

    Ok(child.id())
}
