use std::fmt::Display;

use tracing::{debug, error, info, instrument, warn};

use crate::{error::ArenaError, runtime::ContainerRuntime, sandbox_spec::SandboxSpec};

/// Lifecycle of one instance, as seen by the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Submitted, not yet seen running.
    Pending,
    Running,
    Exited(i64),
    Removed,
}

/// Handle on a launched instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxInstance {
    pub id: String,
    pub name: String,
    pub state: InstanceState,
}

impl Display for SandboxInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Starts and removes the instances of a match.
#[derive(Clone, Copy)]
pub struct MatchLauncher<'r> {
    runtime: &'r dyn ContainerRuntime,
}

impl<'r> MatchLauncher<'r> {
    pub fn new(runtime: &'r dyn ContainerRuntime) -> Self {
        MatchLauncher { runtime }
    }

    pub fn runtime(&self) -> &'r dyn ContainerRuntime {
        self.runtime
    }

    /// Submit every spec, in order.
    ///
    /// Stops at the first failure. Instances started before it are left running; tearing them
    /// down is up to the caller.
    #[instrument(skip_all)]
    pub fn launch(&self, specs: &[SandboxSpec]) -> Result<Vec<SandboxInstance>, ArenaError> {
        let mut instances = Vec::with_capacity(specs.len());
        for (index, spec) in specs.iter().enumerate() {
            let id = self.runtime.run(spec).map_err(|source| {
                error!(name = %spec.name, "could not launch instance: {source}");
                ArenaError::Launch {
                    index,
                    name: spec.name.clone(),
                    source,
                }
            })?;
            info!(name = %spec.name, %id, "launched instance");
            instances.push(SandboxInstance {
                id,
                name: spec.name.clone(),
                state: InstanceState::Pending,
            });
        }
        Ok(instances)
    }

    /// Stop and force-remove every instance whose name starts with `prefix`.
    ///
    /// Never fails: this runs on cleanup paths, errors are logged and the next instance is
    /// handled. Returns the number of instances removed.
    #[instrument(skip(self))]
    pub fn teardown(&self, prefix: &str) -> usize {
        debug!("removing game containers");
        let instances = match self.runtime.list_instances(prefix, true) {
            Ok(instances) => instances,
            Err(e) => {
                error!("could not list instances to remove: {e}");
                return 0;
            }
        };

        let mut removed = 0;
        for instance in instances {
            if instance.running {
                if let Err(e) = self.runtime.stop(&instance.id) {
                    warn!(name = %instance.name, "could not stop instance: {e}");
                }
            }
            match self.runtime.remove(&instance.id) {
                Ok(()) => removed += 1,
                Err(e) => warn!(name = %instance.name, "could not remove instance: {e}"),
            }
        }
        debug!(removed, "teardown finished");
        removed
    }
}
