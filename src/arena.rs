//! One match, end to end.
//!
//! [`Arena::run_match`] chains the building blocks of the crate:
//!
//! ```text
//! players + MatchConfig
//!     -> sandbox_spec::build      (one SandboxSpec per player)
//!     -> LifecycleMonitor::start  (launch, settle, check)
//!     -> viewers                  (headful only)
//!     -> LifecycleMonitor::await_termination
//!     -> LifecycleMonitor::finish (teardown, exactly once)
//!     -> result::extract          (+ result.json)
//! ```
//!
//! Provisioning (network and image) is not part of a match; run it once beforehand with a
//! [`Provisioner`](crate::provisioner::Provisioner).

use std::{fs, time::Instant};

use tracing::{info, instrument, warn};

use crate::{
    cancel::CancellationToken,
    configuration::{MatchConfig, MonitorSettings},
    error::ArenaError,
    launcher::MatchLauncher,
    monitor::LifecycleMonitor,
    player::Player,
    result::{self, MatchResult},
    runtime::ContainerRuntime,
    sandbox_spec::{self, SandboxSpec},
    vnc::Viewer,
};

/// Runs matches, one at a time, on a container runtime.
pub struct Arena<'r> {
    runtime: &'r dyn ContainerRuntime,
    settings: MonitorSettings,
}

impl<'r> Arena<'r> {
    pub fn new(runtime: &'r dyn ContainerRuntime, settings: MonitorSettings) -> Self {
        Arena { runtime, settings }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    /// Play one match and return its result.
    ///
    /// `wait` is called between two polls of the runtime and is expected to block for about
    /// the poll interval. Crashes and realtime timeouts are reported in the returned
    /// [`MatchResult`]; cancellation is reported as [`ArenaError::Cancelled`] once every
    /// instance has been removed.
    ///
    /// # Errors
    ///
    /// - [`ArenaError::Configuration`] if the map is missing or the players are invalid,
    ///   before anything is created.
    /// - [`ArenaError::Launch`], [`ArenaError::NothingRunning`] and
    ///   [`ArenaError::ContainerQuery`], after teardown.
    #[instrument(skip_all, fields(match_name = %config.match_name()))]
    pub fn run_match(
        &self,
        players: &[Player],
        config: &MatchConfig,
        wait: &mut dyn FnMut(),
        viewer: &dyn Viewer,
        cancel: &CancellationToken,
    ) -> Result<MatchResult, ArenaError> {
        let map = config.map_path();
        if !map.is_file() {
            return Err(ArenaError::Configuration(format!(
                "map or replay {map:?} could not be found"
            )));
        }
        sandbox_spec::validate(players, config)?;

        prepare_match_dir(config)?;
        let specs = sandbox_spec::build(players, config)?;

        let mut monitor = LifecycleMonitor::new(
            MatchLauncher::new(self.runtime),
            self.settings,
            config.instance_prefix(),
        );
        let time_start = Instant::now();
        let started = monitor.start(&specs, cancel);
        if started.is_ok() && !config.headless() {
            open_viewers(config, &specs, viewer);
        }
        let outcome = started.and_then(|()| monitor.await_termination(wait, cancel));
        let termination = monitor.finish(outcome)?;
        let elapsed = time_start.elapsed();

        let result = result::extract(config, players, &termination, elapsed);
        result::write_result_json(&result, config, players)?;
        info!("game {} recorded", config.match_name());
        Ok(result)
    }
}

/// Remove the results of a previous match with the same name and create the output
/// directories.
pub fn prepare_match_dir(config: &MatchConfig) -> Result<(), ArenaError> {
    let match_dir = config.match_dir();
    if match_dir.exists() {
        info!("removing existing game results of {}", config.match_name());
        fs::remove_dir_all(&match_dir).map_err(|e| ArenaError::filesystem(&match_dir, e))?;
    }
    for dir in [config.log_dir(), config.crash_dir()] {
        fs::create_dir_all(&dir).map_err(|e| ArenaError::filesystem(&dir, e))?;
    }
    Ok(())
}

fn open_viewers(config: &MatchConfig, specs: &[SandboxSpec], viewer: &dyn Viewer) {
    let shown = if config.show_all_viewers { specs.len() } else { 1 };
    for spec in specs.iter().take(shown) {
        let Some(port) = spec.vnc_host_port() else {
            continue;
        };
        info!(
            "launching vnc viewer for {} on address {}:{port}",
            spec.name,
            config.vnc_host()
        );
        if let Err(e) = viewer.open(config.vnc_host(), port) {
            warn!("could not launch vnc viewer for {}: {e}", spec.name);
        }
    }
    info!(
        "In headful mode, you must specify and start the game manually. \
         Select the map, wait for bots to join the game and then start the game."
    );
}
