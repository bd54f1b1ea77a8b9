//! Access to the container runtime.
//!
//! Every component receives the runtime as an explicit `&dyn ContainerRuntime` handle,
//! constructed once at process start. [`DockerCli`] is the production implementation; tests
//! provide scripted ones.

mod docker_cli;

use std::path::Path;

pub use docker_cli::DockerCli;

use crate::{error::RuntimeError, sandbox_spec::SandboxSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSummary {
    pub id: String,
    pub name: String,
}

/// One line of the runtime's instance listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSummary {
    pub id: String,
    pub name: String,
    pub running: bool,
}

/// Operations the arena needs from a container runtime.
///
/// All calls are blocking. Name-based listings return only instances whose name *starts*
/// with the given prefix.
pub trait ContainerRuntime {
    /// API version reported by the runtime daemon.
    fn version(&self) -> Result<String, RuntimeError>;

    /// Run a trivial workload to the end.
    fn run_liveness_probe(&self) -> Result<(), RuntimeError>;

    /// Networks named exactly `name`.
    fn list_networks(&self, name: &str) -> Result<Vec<NetworkSummary>, RuntimeError>;

    /// Create a bridge network, returns its identifier.
    fn create_network(&self, name: &str, subnet_cidr: &str) -> Result<String, RuntimeError>;

    fn image_exists(&self, tag: &str) -> Result<bool, RuntimeError>;

    fn pull_image(&self, tag: &str) -> Result<(), RuntimeError>;

    fn tag_image(&self, source: &str, target: &str) -> Result<(), RuntimeError>;

    /// Build `tag` from `context`, using `dockerfile` relative to the context.
    fn build_image(&self, context: &Path, dockerfile: &str, tag: &str) -> Result<(), RuntimeError>;

    fn remove_image(&self, tag: &str) -> Result<(), RuntimeError>;

    /// Start a detached instance, returns its identifier.
    fn run(&self, spec: &SandboxSpec) -> Result<String, RuntimeError>;

    /// Instances whose name starts with `prefix`. Stopped ones are included only when
    /// `include_stopped` is set.
    fn list_instances(
        &self,
        prefix: &str,
        include_stopped: bool,
    ) -> Result<Vec<InstanceSummary>, RuntimeError>;

    /// Exit code of a stopped instance.
    fn exit_code(&self, id: &str) -> Result<i64, RuntimeError>;

    fn stop(&self, id: &str) -> Result<(), RuntimeError>;

    /// Force-remove an instance.
    fn remove(&self, id: &str) -> Result<(), RuntimeError>;
}
