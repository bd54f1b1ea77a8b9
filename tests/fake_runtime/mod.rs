#![allow(dead_code)]

use std::{path::Path, sync::Mutex};

use sc_arena::{
    error::RuntimeError,
    runtime::{ContainerRuntime, InstanceSummary, NetworkSummary},
    sandbox_spec::SandboxSpec,
};
use tracing::{Level, Metadata};
use tracing_subscriber::{
    fmt,
    layer::{Context, Filter, SubscriberExt},
    Layer, Registry,
};

struct CustomLevelFilter;
impl<S> Filter<S> for CustomLevelFilter {
    fn enabled(&self, meta: &Metadata<'_>, _cx: &Context<'_, S>) -> bool {
        meta.level() <= &Level::DEBUG
    }
}

pub fn init_debug_logger() {
    let format = tracing_subscriber::fmt::format()
        .without_time()
        .with_ansi(true)
        .with_level(true)
        .with_thread_names(true)
        .with_target(false);

    let reg = Registry::default().with(
        fmt::layer()
            .with_test_writer()
            .event_format(format)
            .with_filter(CustomLevelFilter),
    );

    let _ = tracing::subscriber::set_global_default(reg);
}

/// How a launched instance behaves.
#[derive(Debug, Clone, Copy)]
pub struct Plan {
    /// Number of running-instance listings the instance survives.
    pub lifetime: usize,
    pub exit_code: i64,
}

#[derive(Debug, Clone)]
struct Instance {
    id: String,
    name: String,
    running: bool,
    remaining: usize,
    exit_code: i64,
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<String>,
    networks: Vec<NetworkSummary>,
    images: Vec<String>,
    instances: Vec<Instance>,
    plans: Vec<(String, Plan)>,
    default_plan: Option<Plan>,
    fail_run_at: Option<usize>,
    runs: usize,
    failing_queries: usize,
    unreachable: bool,
    next_id: usize,
}

/// Scripted in-memory runtime recording every call.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<State>,
}

fn failure(command: &str) -> RuntimeError {
    RuntimeError::Command {
        command: command.to_string(),
        status: 1,
        stderr: "scripted failure".to_string(),
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instances whose name ends with `suffix` follow `plan`.
    pub fn with_plan(self, suffix: &str, lifetime: usize, exit_code: i64) -> Self {
        self.state
            .lock()
            .unwrap()
            .plans
            .push((suffix.to_string(), Plan { lifetime, exit_code }));
        self
    }

    pub fn with_default_plan(self, lifetime: usize, exit_code: i64) -> Self {
        self.state.lock().unwrap().default_plan = Some(Plan { lifetime, exit_code });
        self
    }

    /// The `index`-th call to `run` fails.
    pub fn failing_run_at(self, index: usize) -> Self {
        self.state.lock().unwrap().fail_run_at = Some(index);
        self
    }

    /// The next `count` running-instance listings fail.
    pub fn failing_queries(self, count: usize) -> Self {
        self.state.lock().unwrap().failing_queries = count;
        self
    }

    pub fn unreachable(self) -> Self {
        self.state.lock().unwrap().unreachable = true;
        self
    }

    pub fn with_image(self, tag: &str) -> Self {
        self.state.lock().unwrap().images.push(tag.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Names of the instances still known to the runtime.
    pub fn instance_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.instances.iter().map(|i| i.name.clone()).collect()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

impl ContainerRuntime for FakeRuntime {
    fn version(&self) -> Result<String, RuntimeError> {
        self.record("version".into());
        if self.state.lock().unwrap().unreachable {
            return Err(RuntimeError::Spawn {
                command: "docker version".into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no docker"),
            });
        }
        Ok("1.43".into())
    }

    fn run_liveness_probe(&self) -> Result<(), RuntimeError> {
        self.record("probe".into());
        Ok(())
    }

    fn list_networks(&self, name: &str) -> Result<Vec<NetworkSummary>, RuntimeError> {
        self.record(format!("list_networks {name}"));
        let state = self.state.lock().unwrap();
        Ok(state
            .networks
            .iter()
            .filter(|n| n.name == name)
            .cloned()
            .collect())
    }

    fn create_network(&self, name: &str, subnet_cidr: &str) -> Result<String, RuntimeError> {
        self.record(format!("create_network {name} {subnet_cidr}"));
        let mut state = self.state.lock().unwrap();
        let id = format!("net{}", state.networks.len());
        state.networks.push(NetworkSummary {
            id: id.clone(),
            name: name.to_string(),
        });
        Ok(id)
    }

    fn image_exists(&self, tag: &str) -> Result<bool, RuntimeError> {
        self.record(format!("image_exists {tag}"));
        Ok(self.state.lock().unwrap().images.iter().any(|i| i == tag))
    }

    fn pull_image(&self, tag: &str) -> Result<(), RuntimeError> {
        self.record(format!("pull {tag}"));
        self.state.lock().unwrap().images.push(tag.to_string());
        Ok(())
    }

    fn tag_image(&self, source: &str, target: &str) -> Result<(), RuntimeError> {
        self.record(format!("tag {source} {target}"));
        self.state.lock().unwrap().images.push(target.to_string());
        Ok(())
    }

    fn build_image(&self, context: &Path, dockerfile: &str, tag: &str) -> Result<(), RuntimeError> {
        self.record(format!("build {tag}"));
        if !context.join(dockerfile).is_file() {
            return Err(failure("build"));
        }
        self.state.lock().unwrap().images.push(tag.to_string());
        Ok(())
    }

    fn remove_image(&self, tag: &str) -> Result<(), RuntimeError> {
        self.record(format!("remove_image {tag}"));
        self.state.lock().unwrap().images.retain(|i| i != tag);
        Ok(())
    }

    fn run(&self, spec: &SandboxSpec) -> Result<String, RuntimeError> {
        self.record(format!("run {}", spec.name));
        let mut state = self.state.lock().unwrap();
        let index = state.runs;
        state.runs += 1;
        if state.fail_run_at == Some(index) {
            return Err(failure("run"));
        }

        let plan = state
            .plans
            .iter()
            .find(|(suffix, _)| spec.name.ends_with(suffix.as_str()))
            .map(|(_, plan)| *plan)
            .or(state.default_plan)
            .unwrap_or(Plan {
                lifetime: 1,
                exit_code: 0,
            });
        let id = format!("id{:02}", state.next_id);
        state.next_id += 1;
        state.instances.push(Instance {
            id: id.clone(),
            name: spec.name.clone(),
            running: true,
            remaining: plan.lifetime,
            exit_code: plan.exit_code,
        });
        Ok(id)
    }

    fn list_instances(
        &self,
        prefix: &str,
        include_stopped: bool,
    ) -> Result<Vec<InstanceSummary>, RuntimeError> {
        self.record(if include_stopped {
            format!("list_all {prefix}")
        } else {
            format!("list_running {prefix}")
        });
        let mut state = self.state.lock().unwrap();
        if !include_stopped {
            if state.failing_queries > 0 {
                state.failing_queries -= 1;
                return Err(failure("ps"));
            }
            for instance in state.instances.iter_mut().filter(|i| i.running) {
                if instance.remaining == 0 {
                    instance.running = false;
                } else {
                    instance.remaining -= 1;
                }
            }
        }
        Ok(state
            .instances
            .iter()
            .filter(|i| i.name.starts_with(prefix))
            .filter(|i| include_stopped || i.running)
            .map(|i| InstanceSummary {
                id: i.id.clone(),
                name: i.name.clone(),
                running: i.running,
            })
            .collect())
    }

    fn exit_code(&self, id: &str) -> Result<i64, RuntimeError> {
        self.record(format!("exit_code {id}"));
        let state = self.state.lock().unwrap();
        state
            .instances
            .iter()
            .find(|i| i.id == id && !i.running)
            .map(|i| i.exit_code)
            .ok_or_else(|| failure("inspect"))
    }

    fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(format!("stop {id}"));
        let mut state = self.state.lock().unwrap();
        if let Some(instance) = state.instances.iter_mut().find(|i| i.id == id) {
            instance.running = false;
        }
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(format!("remove {id}"));
        self.state.lock().unwrap().instances.retain(|i| i.id != id);
        Ok(())
    }
}
