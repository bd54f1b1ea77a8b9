//! Supervision of a running match.
//!
//! The [`LifecycleMonitor`] drives one match through
//! `Launching → AwaitingTermination → Terminated(..)`:
//!
//! 1. [`start`](LifecycleMonitor::start) launches every instance, waits for the settle delay
//!    and checks that at least one of them is running.
//! 2. [`await_termination`](LifecycleMonitor::await_termination) polls the runtime until no
//!    instance of the match is running anymore. Between two polls the caller's wait callback is
//!    invoked; this is the only suspension point and the only place where cancellation is
//!    honoured.
//! 3. [`finish`](LifecycleMonitor::finish) tears the instances down, exactly once, whatever
//!    happened before, and turns the outcome into the final phase.
//!
//! The match ends normally when its instances exit by themselves. Exit codes then decide
//! between [`TerminalState::Normal`], [`TerminalState::Crashed`] and
//! [`TerminalState::RealtimeTimedOut`]; none of them is an error.

use std::{
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info, instrument, warn};

use crate::{
    cancel::CancellationToken,
    configuration::MonitorSettings,
    error::ArenaError,
    launcher::{InstanceState, MatchLauncher, SandboxInstance},
    runtime::InstanceSummary,
    sandbox_spec::{SandboxSpec, EXIT_CODE_REALTIME_OUTED},
};

const RETRY_DELAY: Duration = Duration::from_millis(200);

/// How a match ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    Normal,
    Crashed,
    RealtimeTimedOut,
    Cancelled,
}

impl TerminalState {
    /// Whether the invoking process should report failure.
    pub fn is_failure(&self) -> bool {
        !matches!(self, TerminalState::Normal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    Launching,
    AwaitingTermination,
    Terminated(TerminalState),
}

/// Outcome of a match that was not cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Termination {
    pub state: TerminalState,
    /// Instance name and exit code, for every instance that had exited.
    pub exit_codes: Vec<(String, i64)>,
}

/// Any realtime-out wins over a crash, any non-zero code is a crash.
pub fn classify(exit_codes: &[i64]) -> TerminalState {
    if exit_codes.contains(&EXIT_CODE_REALTIME_OUTED) {
        TerminalState::RealtimeTimedOut
    } else if exit_codes.iter().any(|&code| code != 0) {
        TerminalState::Crashed
    } else {
        TerminalState::Normal
    }
}

/// A signal also reaches the runtime CLI children, so a runtime call failing once `cancel` is
/// set was interrupted.
fn interrupted(error: ArenaError, cancel: &CancellationToken) -> ArenaError {
    if cancel.is_cancelled() && !matches!(error, ArenaError::Cancelled) {
        debug!("runtime call interrupted: {error}");
        ArenaError::Cancelled
    } else {
        error
    }
}

pub struct LifecycleMonitor<'r> {
    launcher: MatchLauncher<'r>,
    settings: MonitorSettings,
    prefix: String,
    phase: MatchPhase,
    instances: Vec<SandboxInstance>,
    torn_down: bool,
}

impl<'r> LifecycleMonitor<'r> {
    /// Monitor the instances whose name starts with `prefix`.
    pub fn new(launcher: MatchLauncher<'r>, settings: MonitorSettings, prefix: impl Into<String>) -> Self {
        LifecycleMonitor {
            launcher,
            settings,
            prefix: prefix.into(),
            phase: MatchPhase::Launching,
            instances: vec![],
            torn_down: false,
        }
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn instances(&self) -> &[SandboxInstance] {
        &self.instances
    }

    /// `start`, `await_termination` and `finish` in one go.
    pub fn run(
        &mut self,
        specs: &[SandboxSpec],
        wait: &mut dyn FnMut(),
        cancel: &CancellationToken,
    ) -> Result<Termination, ArenaError> {
        let outcome = self
            .start(specs, cancel)
            .and_then(|()| self.await_termination(wait, cancel));
        self.finish(outcome)
    }

    /// Launch the match and check that it is running.
    ///
    /// On error, partially launched instances are still there: pass the error to
    /// [`finish`](Self::finish).
    #[instrument(skip_all, fields(prefix = %self.prefix))]
    pub fn start(&mut self, specs: &[SandboxSpec], cancel: &CancellationToken) -> Result<(), ArenaError> {
        self.launch_and_settle(specs, cancel)
            .map_err(|e| interrupted(e, cancel))
    }

    fn launch_and_settle(&mut self, specs: &[SandboxSpec], cancel: &CancellationToken) -> Result<(), ArenaError> {
        self.phase = MatchPhase::Launching;
        self.instances = self.launcher.launch(specs)?;

        debug!("checking if game has launched properly...");
        if cancel.sleep(self.settings.settle_delay) {
            return Err(ArenaError::Cancelled);
        }
        let running = self.query()?;
        self.mark_running(&running);
        if !self.instances.iter().any(|i| i.state == InstanceState::Running) {
            return Err(ArenaError::NothingRunning(self.prefix.clone()));
        }

        self.phase = MatchPhase::AwaitingTermination;
        Ok(())
    }

    /// Poll until no instance of the match runs anymore, calling `wait` between polls.
    ///
    /// Returns [`ArenaError::Cancelled`] if `cancel` is set when `wait` returns or when a runtime
    /// call fails after it was set, and [`ArenaError::ContainerQuery`] if the runtime cannot be
    /// queried.
    #[instrument(skip_all, fields(prefix = %self.prefix))]
    pub fn await_termination(
        &mut self,
        wait: &mut dyn FnMut(),
        cancel: &CancellationToken,
    ) -> Result<Termination, ArenaError> {
        self.poll_until_exited(wait, cancel)
            .map_err(|e| interrupted(e, cancel))
    }

    fn poll_until_exited(
        &mut self,
        wait: &mut dyn FnMut(),
        cancel: &CancellationToken,
    ) -> Result<Termination, ArenaError> {
        info!("waiting until game {} is finished...", self.prefix.trim_end_matches('_'));
        let mut alone_since: Option<Instant> = None;

        loop {
            let running = self.query()?;
            if running.is_empty() {
                break;
            }
            self.mark_running(&running);

            if let Some(timeout) = self.settings.lingering_timeout {
                if running.len() == 1 && self.instances.len() > 1 {
                    let since = *alone_since.get_or_insert_with(Instant::now);
                    if since.elapsed() > timeout {
                        warn!(
                            "one lingering container has been found after single container \
                             timeout ({timeout:?}), the game probably crashed"
                        );
                        let exit_codes = self.collect_exit_codes(&running)?;
                        return Ok(Termination {
                            state: TerminalState::Crashed,
                            exit_codes,
                        });
                    }
                } else {
                    alone_since = None;
                }
            }

            debug!(running = ?running.iter().map(|i| &i.name).collect::<Vec<_>>(), "waiting");
            wait();
            if cancel.is_cancelled() {
                return Err(ArenaError::Cancelled);
            }
        }

        let exit_codes = self.collect_exit_codes(&[])?;
        let codes: Vec<i64> = exit_codes.iter().map(|(_, code)| *code).collect();
        let state = classify(&codes);
        debug!(?exit_codes, ?state, "all instances exited");
        Ok(Termination { state, exit_codes })
    }

    /// Tear the match down (once) and settle the final phase.
    ///
    /// `Ok` outcomes are returned unchanged; errors are propagated after teardown.
    pub fn finish(
        &mut self,
        outcome: Result<Termination, ArenaError>,
    ) -> Result<Termination, ArenaError> {
        if let Err(ArenaError::Cancelled) = outcome {
            warn!("Caught interrupt, shutting down containers");
            warn!("This can take a moment, please wait.");
        }

        if self.torn_down {
            debug!("match already torn down");
        } else {
            self.launcher.teardown(&self.prefix);
            self.torn_down = true;
            for instance in &mut self.instances {
                instance.state = InstanceState::Removed;
            }
        }

        match outcome {
            Ok(termination) => {
                self.phase = MatchPhase::Terminated(termination.state);
                Ok(termination)
            }
            Err(ArenaError::Cancelled) => {
                self.phase = MatchPhase::Terminated(TerminalState::Cancelled);
                info!("Game cancelled.");
                Err(ArenaError::Cancelled)
            }
            Err(e) => Err(e),
        }
    }

    fn query(&self) -> Result<Vec<InstanceSummary>, ArenaError> {
        let mut attempt = 0;
        loop {
            match self.launcher.runtime().list_instances(&self.prefix, false) {
                Ok(running) => return Ok(running),
                Err(e) if attempt < self.settings.query_retries => {
                    attempt += 1;
                    warn!(attempt, "could not query instances, retrying: {e}");
                    thread::sleep(RETRY_DELAY);
                }
                Err(e) => return Err(ArenaError::ContainerQuery(e)),
            }
        }
    }

    fn mark_running(&mut self, running: &[InstanceSummary]) {
        for instance in &mut self.instances {
            if running.iter().any(|r| r.id == instance.id) {
                instance.state = InstanceState::Running;
            }
        }
    }

    /// Exit codes of every launched instance not listed in `still_running`.
    fn collect_exit_codes(
        &mut self,
        still_running: &[InstanceSummary],
    ) -> Result<Vec<(String, i64)>, ArenaError> {
        let runtime = self.launcher.runtime();
        let mut codes = Vec::with_capacity(self.instances.len());
        for instance in &mut self.instances {
            if still_running.iter().any(|r| r.id == instance.id) {
                continue;
            }
            let code = runtime
                .exit_code(&instance.id)
                .map_err(ArenaError::ContainerQuery)?;
            instance.state = InstanceState::Exited(code);
            codes.push((instance.name.clone(), code));
        }
        Ok(codes)
    }
}

#[cfg(test)]
mod classify_tests {
    use super::*;

    #[test]
    fn exit_code_classification() {
        assert_eq!(classify(&[0, 2]), TerminalState::RealtimeTimedOut);
        assert_eq!(classify(&[0, 1]), TerminalState::Crashed);
        assert_eq!(classify(&[0, 0]), TerminalState::Normal);
        assert_eq!(classify(&[1, 2]), TerminalState::RealtimeTimedOut);
        assert_eq!(classify(&[137]), TerminalState::Crashed);
        assert_eq!(classify(&[]), TerminalState::Normal);
    }
}
