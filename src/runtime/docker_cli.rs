use std::{path::Path, process::Command};

use tracing::{debug, trace};

use super::{ContainerRuntime, InstanceSummary, NetworkSummary};
use crate::{error::RuntimeError, path_translator::translate_path, sandbox_spec::SandboxSpec};

const SHORT_ID_LEN: usize = 12;

/// [`ContainerRuntime`] backed by the `docker` command line.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
}

impl DockerCli {
    pub fn new() -> Self {
        Self::with_program("docker")
    }

    /// Use another docker-compatible CLI (`podman`, a wrapper script, ...).
    pub fn with_program(program: impl Into<String>) -> Self {
        DockerCli {
            program: program.into(),
        }
    }

    /// Whether the CLI can be found on `PATH`.
    pub fn is_available(&self) -> bool {
        which::which(&self.program).is_ok()
    }

    fn exec<S: AsRef<str>>(&self, args: &[S]) -> Result<String, RuntimeError> {
        let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
        let command = format!("{} {}", self.program, args.join(" "));
        trace!(%command, "running");

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|source| RuntimeError::Spawn {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(RuntimeError::Command {
                command,
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

/// Arguments of `docker run` for `spec`, without the program name.
pub(crate) fn run_args(spec: &SandboxSpec) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "run".into(),
        "--detach".into(),
        "--privileged".into(),
        "--name".into(),
        spec.name.clone(),
        "--network".into(),
        spec.network.clone(),
    ];
    for mount in &spec.mounts {
        args.push("--volume".into());
        args.push(format!(
            "{}:{}:{}",
            translate_path(&mount.host_path),
            mount.sandbox_path,
            mount.mode.as_str()
        ));
    }
    for (key, value) in &spec.env {
        args.push("--env".into());
        args.push(format!("{key}={value}"));
    }
    for port in &spec.ports {
        args.push("--publish".into());
        args.push(format!("{}:{}/tcp", port.host_port, port.sandbox_port));
    }
    args.extend(spec.extra_options.iter().cloned());
    args.push(spec.image.clone());
    args.push(spec.entrypoint.clone());
    args.extend(spec.args.iter().cloned());
    args
}

fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

fn parse_instance_line(line: &str) -> Option<InstanceSummary> {
    let mut parts = line.split('\t');
    let id = parts.next()?.trim();
    let name = parts.next()?.trim();
    let state = parts.next().unwrap_or_default().trim();
    if id.is_empty() || name.is_empty() {
        return None;
    }
    Some(InstanceSummary {
        id: short_id(id),
        name: name.trim_start_matches('/').to_string(),
        running: state.eq_ignore_ascii_case("running"),
    })
}

impl ContainerRuntime for DockerCli {
    fn version(&self) -> Result<String, RuntimeError> {
        self.exec(&["version", "--format", "{{.Server.APIVersion}}"])
    }

    fn run_liveness_probe(&self) -> Result<(), RuntimeError> {
        self.exec(&["run", "--rm", "hello-world"]).map(|_| ())
    }

    fn list_networks(&self, name: &str) -> Result<Vec<NetworkSummary>, RuntimeError> {
        let filter = format!("name={name}");
        let out = self.exec(&[
            "network",
            "ls",
            "--filter",
            filter.as_str(),
            "--format",
            "{{.ID}}\t{{.Name}}",
        ])?;
        Ok(out
            .lines()
            .filter_map(|line| line.split_once('\t'))
            .filter(|(_, n)| n.trim() == name)
            .map(|(id, n)| NetworkSummary {
                id: short_id(id.trim()),
                name: n.trim().to_string(),
            })
            .collect())
    }

    fn create_network(&self, name: &str, subnet_cidr: &str) -> Result<String, RuntimeError> {
        let out = self.exec(&["network", "create", "--subnet", subnet_cidr, name])?;
        let id = out.lines().last().unwrap_or_default().trim();
        if id.is_empty() {
            return Err(RuntimeError::UnexpectedOutput {
                command: format!("{} network create", self.program),
                output: out,
            });
        }
        Ok(short_id(id))
    }

    fn image_exists(&self, tag: &str) -> Result<bool, RuntimeError> {
        let out = self.exec(&["images", "--quiet", tag])?;
        Ok(!out.is_empty())
    }

    fn pull_image(&self, tag: &str) -> Result<(), RuntimeError> {
        self.exec(&["pull", tag]).map(|_| ())
    }

    fn tag_image(&self, source: &str, target: &str) -> Result<(), RuntimeError> {
        self.exec(&["tag", source, target]).map(|_| ())
    }

    fn build_image(&self, context: &Path, dockerfile: &str, tag: &str) -> Result<(), RuntimeError> {
        let dockerfile = context.join(dockerfile).to_string_lossy().into_owned();
        let context = context.to_string_lossy().into_owned();
        self.exec(&[
            "build",
            "--file",
            dockerfile.as_str(),
            "--tag",
            tag,
            context.as_str(),
        ])
        .map(|_| ())
    }

    fn remove_image(&self, tag: &str) -> Result<(), RuntimeError> {
        self.exec(&["image", "rm", "--force", tag]).map(|_| ())
    }

    fn run(&self, spec: &SandboxSpec) -> Result<String, RuntimeError> {
        let args = run_args(spec);
        debug!(name = %spec.name, ?args, "docker run");
        let out = self.exec(&args)?;
        let id = out.lines().last().unwrap_or_default().trim();
        if id.is_empty() {
            return Err(RuntimeError::UnexpectedOutput {
                command: format!("{} run", self.program),
                output: out,
            });
        }
        Ok(short_id(id))
    }

    fn list_instances(
        &self,
        prefix: &str,
        include_stopped: bool,
    ) -> Result<Vec<InstanceSummary>, RuntimeError> {
        let filter = format!("name={prefix}");
        let mut args = vec!["ps"];
        if include_stopped {
            args.push("--all");
        }
        args.extend([
            "--filter",
            filter.as_str(),
            "--format",
            "{{.ID}}\t{{.Names}}\t{{.State}}",
        ]);
        let out = self.exec(&args)?;
        Ok(out
            .lines()
            .filter_map(parse_instance_line)
            .filter(|instance| instance.name.starts_with(prefix))
            .collect())
    }

    fn exit_code(&self, id: &str) -> Result<i64, RuntimeError> {
        let out = self.exec(&["inspect", "--format", "{{.State.ExitCode}}", id])?;
        out.trim()
            .parse()
            .map_err(|_| RuntimeError::UnexpectedOutput {
                command: format!("{} inspect {id}", self.program),
                output: out,
            })
    }

    fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        self.exec(&["stop", id]).map(|_| ())
    }

    fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        self.exec(&["rm", "--force", id]).map(|_| ())
    }
}
