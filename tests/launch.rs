use std::{collections::BTreeMap, thread, time::Duration};

use fake_runtime::FakeRuntime;
use sc_arena::{
    cancel::CancellationToken,
    configuration::MonitorSettings,
    error::ArenaError,
    launcher::{InstanceState, MatchLauncher},
    monitor::{LifecycleMonitor, MatchPhase, TerminalState},
    sandbox_spec::SandboxSpec,
};

mod fake_runtime;

const PREFIX: &str = "GAME_T_";

fn spec(player: &str) -> SandboxSpec {
    SandboxSpec {
        name: format!("{PREFIX}{player}"),
        image: "starcraft:test".into(),
        network: "sc_net".into(),
        mounts: vec![],
        env: BTreeMap::new(),
        ports: vec![],
        entrypoint: "/app/play_bot.sh".into(),
        args: vec![],
        extra_options: vec![],
    }
}

fn two_specs() -> Vec<SandboxSpec> {
    vec![spec("alpha"), spec("beta")]
}

fn settings() -> MonitorSettings {
    MonitorSettings::new().with_settle_delay(Duration::ZERO)
}

fn run_match(
    runtime: &FakeRuntime,
    settings: MonitorSettings,
) -> (Result<TerminalState, ArenaError>, usize) {
    let mut waits = 0;
    let mut monitor = LifecycleMonitor::new(MatchLauncher::new(runtime), settings, PREFIX);
    let res = monitor
        .run(&two_specs(), &mut || waits += 1, &CancellationToken::new())
        .map(|t| t.state);
    (res, waits)
}

#[test]
fn launch_failure_reports_index_and_leaves_earlier_instances() {
    let runtime = FakeRuntime::new().failing_run_at(1);
    let launcher = MatchLauncher::new(&runtime);

    let err = launcher.launch(&two_specs()).unwrap_err();
    match err {
        ArenaError::Launch { index, name, .. } => {
            assert_eq!(index, 1);
            assert_eq!(name, "GAME_T_beta");
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(runtime.instance_names(), ["GAME_T_alpha"]);

    assert_eq!(launcher.teardown(PREFIX), 1);
    assert!(runtime.instance_names().is_empty());
}

#[test]
fn failed_launch_is_torn_down_by_the_monitor() {
    let runtime = FakeRuntime::new().failing_run_at(1);
    let (res, waits) = run_match(&runtime, settings());

    assert!(matches!(res, Err(ArenaError::Launch { index: 1, .. })));
    assert_eq!(waits, 0);
    assert_eq!(runtime.count_calls("list_all"), 1);
    assert!(runtime.instance_names().is_empty());
}

#[test]
fn teardown_only_touches_the_match_prefix() {
    let runtime = FakeRuntime::new().with_default_plan(10, 0);
    let launcher = MatchLauncher::new(&runtime);
    let other = SandboxSpec {
        name: "GAME_OTHER_alpha".into(),
        ..spec("x")
    };
    launcher.launch(&[spec("alpha"), other]).unwrap();

    assert_eq!(launcher.teardown(PREFIX), 1);
    assert_eq!(runtime.instance_names(), ["GAME_OTHER_alpha"]);
    // nothing left, nothing fails
    assert_eq!(launcher.teardown(PREFIX), 0);
}

#[test]
fn no_instance_on_first_poll_terminates_normally() {
    fake_runtime::init_debug_logger();
    let runtime = FakeRuntime::new().with_default_plan(1, 0);
    let (res, waits) = run_match(&runtime, settings());

    assert_eq!(res.unwrap(), TerminalState::Normal);
    assert!(waits <= 1);
    assert_eq!(runtime.count_calls("list_all"), 1);
    assert!(runtime.instance_names().is_empty());
}

#[test]
fn exit_codes_are_classified() {
    for (codes, expected) in [
        ([0, 2], TerminalState::RealtimeTimedOut),
        ([0, 1], TerminalState::Crashed),
        ([0, 0], TerminalState::Normal),
    ] {
        let runtime = FakeRuntime::new()
            .with_plan("alpha", 2, codes[0])
            .with_plan("beta", 3, codes[1]);
        let (res, waits) = run_match(&runtime, settings());

        assert_eq!(res.unwrap(), expected, "{codes:?}");
        assert_eq!(waits, 2);
        assert_eq!(runtime.count_calls("list_all"), 1);
    }
}

#[test]
fn early_exit_codes_are_not_lost() {
    // alpha crashes long before beta ends
    let runtime = FakeRuntime::new()
        .with_plan("alpha", 1, 1)
        .with_plan("beta", 4, 0);
    let (res, _) = run_match(&runtime, settings());
    assert_eq!(res.unwrap(), TerminalState::Crashed);
}

#[test]
fn nothing_running_after_settle_is_a_launch_error() {
    let runtime = FakeRuntime::new().with_default_plan(0, 0);
    let (res, waits) = run_match(&runtime, settings());

    let err = res.unwrap_err();
    assert!(matches!(err, ArenaError::NothingRunning(_)));
    assert!(err.is_launch_error());
    assert_eq!(waits, 0);
    assert_eq!(runtime.count_calls("list_all"), 1);
}

#[test]
fn cancellation_mid_poll_tears_down_once() {
    let runtime = FakeRuntime::new().with_default_plan(100, 0);
    let cancel = CancellationToken::new();
    let mut monitor = LifecycleMonitor::new(MatchLauncher::new(&runtime), settings(), PREFIX);

    let mut waits = 0;
    let mut wait = || {
        waits += 1;
        if waits == 2 {
            cancel.cancel();
        }
    };
    let res = monitor.run(&two_specs(), &mut wait, &cancel);

    assert!(matches!(res, Err(ArenaError::Cancelled)));
    assert_eq!(waits, 2);
    assert_eq!(monitor.phase(), MatchPhase::Terminated(TerminalState::Cancelled));
    assert_eq!(runtime.count_calls("list_all"), 1);
    assert_eq!(runtime.count_calls("stop"), 2);
    assert!(runtime.instance_names().is_empty());
    assert!(monitor
        .instances()
        .iter()
        .all(|i| i.state == InstanceState::Removed));

    // a second finish does not tear down again
    let _ = monitor.finish(Err(ArenaError::Cancelled));
    assert_eq!(runtime.count_calls("list_all"), 1);
}

#[test]
fn cancellation_from_another_thread() {
    let runtime = FakeRuntime::new().with_default_plan(usize::MAX, 0);
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        canceller.cancel();
    });

    let mut monitor = LifecycleMonitor::new(MatchLauncher::new(&runtime), settings(), PREFIX);
    let mut wait = || {
        cancel.sleep(Duration::from_millis(5));
    };
    let res = monitor.run(&two_specs(), &mut wait, &cancel);
    handle.join().unwrap();

    assert!(matches!(res, Err(ArenaError::Cancelled)));
    assert!(runtime.instance_names().is_empty());
}

#[test]
fn launch_failing_after_an_interrupt_is_a_cancellation() {
    // the signal hit the runtime CLI while the second instance was being started
    let runtime = FakeRuntime::new().failing_run_at(1);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut monitor = LifecycleMonitor::new(MatchLauncher::new(&runtime), settings(), PREFIX);

    let res = monitor.run(&two_specs(), &mut || {}, &cancel);

    assert!(matches!(res, Err(ArenaError::Cancelled)));
    assert_eq!(monitor.phase(), MatchPhase::Terminated(TerminalState::Cancelled));
    assert_eq!(runtime.count_calls("list_all"), 1);
    assert!(runtime.instance_names().is_empty());
}

#[test]
fn query_errors_are_retried_when_configured() {
    let runtime = FakeRuntime::new().with_default_plan(2, 0).failing_queries(1);
    let (res, _) = run_match(&runtime, settings().with_query_retries(1));
    assert_eq!(res.unwrap(), TerminalState::Normal);

    let runtime = FakeRuntime::new().with_default_plan(2, 0).failing_queries(1);
    let (res, waits) = run_match(&runtime, settings());
    assert!(matches!(res, Err(ArenaError::ContainerQuery(_))));
    assert_eq!(waits, 0);
    assert_eq!(runtime.count_calls("list_all"), 1);
    assert!(runtime.instance_names().is_empty());
}

#[test]
fn lingering_instance_is_a_crash() {
    let runtime = FakeRuntime::new()
        .with_plan("alpha", 1, 0)
        .with_plan("beta", 1000, 0);
    let settings = settings().with_lingering_timeout(Some(Duration::from_millis(1)));
    let mut monitor = LifecycleMonitor::new(MatchLauncher::new(&runtime), settings, PREFIX);

    let termination = monitor
        .run(
            &two_specs(),
            &mut || thread::sleep(Duration::from_millis(5)),
            &CancellationToken::new(),
        )
        .unwrap();

    assert_eq!(termination.state, TerminalState::Crashed);
    assert_eq!(termination.exit_codes, [("GAME_T_alpha".to_string(), 0)]);
    assert!(runtime.instance_names().is_empty());
}
