use super::*;
use crate::control::ControlSurface;
use crate::events::MonitorEvent;
use crate::mock::{MockVmController, ScriptedProbe, VmCall};
use crate::probe::ProbeFailure;
use crate::recovery::RecoveryConfig;
use crate::vm::StartMode;
use tokio::sync::broadcast;
use tokio::time::Instant;

const VM: &str = "HomeAssistant";

struct Harness {
    monitor: Arc<HealthMonitor>,
    store: Arc<StatusStore>,
    probe: Arc<ScriptedProbe>,
    vm: Arc<MockVmController>,
    control: ControlSurface,
    events: broadcast::Receiver<MonitorEvent>,
}

fn timings() -> MonitorTimings {
    MonitorTimings {
        boot_grace: Duration::from_secs(60),
        check_interval: Duration::from_secs(30),
    }
}

fn harness(probe: ScriptedProbe) -> Harness {
    let store = Arc::new(StatusStore::new());
    let event_bus = Arc::new(EventBus::new(256));
    let events = event_bus.subscribe();
    let probe = Arc::new(probe);
    let vm = Arc::new(MockVmController::new(true));

    let recovery = RecoveryController::new(
        RecoveryConfig {
            vm_name: VM.to_string(),
            start_mode: StartMode::Headless,
            power_off_grace: Duration::from_secs(5),
        },
        vm.clone(),
        Arc::clone(&event_bus),
    );

    let monitor = Arc::new(HealthMonitor::new(
        Arc::clone(&store),
        probe.clone(),
        recovery,
        Arc::clone(&event_bus),
        timings(),
    ));

    let control = ControlSurface::new(VM, Arc::clone(&store), event_bus);

    Harness {
        monitor,
        store,
        probe,
        vm,
        control,
        events,
    }
}

fn failure() -> ProbeOutcome {
    ProbeOutcome::Failure(ProbeFailure::Timeout(Duration::from_secs(5)))
}

/// Status transitions published so far
fn drain_transitions(events: &mut broadcast::Receiver<MonitorEvent>) -> Vec<(Status, Status)> {
    let mut transitions = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let MonitorEvent::StatusChanged { from, to, .. } = event {
            transitions.push((from, to));
        }
    }
    transitions
}

fn drain_messages(events: &mut broadcast::Receiver<MonitorEvent>) -> Vec<String> {
    let mut messages = Vec::new();
    while let Ok(event) = events.try_recv() {
        messages.push(event.message());
    }
    messages
}

#[tokio::test(start_paused = true)]
async fn test_success_success_failure_success_scenario() {
    let mut h = harness(ScriptedProbe::new(vec![
        ProbeOutcome::Success,
        ProbeOutcome::Success,
        failure(),
        ProbeOutcome::Success,
    ]));

    assert_eq!(h.store.status(), Status::Unknown);

    assert_eq!(h.monitor.tick().await, TickOutcome::Online);
    assert_eq!(h.store.status(), Status::Online);
    assert_eq!(drain_messages(&mut h.events), vec!["The VM is online"]);

    // Already online: no event
    assert_eq!(h.monitor.tick().await, TickOutcome::Online);
    assert_eq!(h.store.status(), Status::Online);
    assert!(drain_messages(&mut h.events).is_empty());

    match h.monitor.tick().await {
        TickOutcome::Recovered(report) => assert!(report.started),
        other => panic!("Expected recovery, got {:?}", other),
    }
    assert_eq!(h.store.status(), Status::Restarting);
    assert_eq!(
        drain_messages(&mut h.events),
        vec!["The VM is offline", "Restarting VM", "The VM is starting"]
    );

    assert_eq!(h.monitor.tick().await, TickOutcome::Online);
    assert_eq!(h.store.status(), Status::Online);
    assert_eq!(drain_messages(&mut h.events), vec!["The VM is online"]);

    assert_eq!(h.probe.call_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_online_event_is_edge_triggered() {
    let mut h = harness(ScriptedProbe::always(ProbeOutcome::Success));

    for _ in 0..5 {
        h.monitor.tick().await;
    }

    assert_eq!(
        drain_transitions(&mut h.events),
        vec![(Status::Unknown, Status::Online)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_failure_runs_recovery_in_order() {
    let h = harness(ScriptedProbe::always_failing());

    h.monitor.tick().await;

    assert_eq!(
        h.vm.calls(),
        vec![VmCall::IsRunning, VmCall::PowerOff, VmCall::Start(StartMode::Headless)]
    );
    assert!(h.vm.is_powered());
}

#[tokio::test(start_paused = true)]
async fn test_persistent_failure_cycles_offline_and_restarting() {
    let mut h = harness(ScriptedProbe::always_failing());

    for _ in 0..3 {
        h.monitor.tick().await;
    }

    assert_eq!(
        drain_transitions(&mut h.events),
        vec![
            (Status::Unknown, Status::Offline),
            (Status::Offline, Status::Restarting),
            (Status::Restarting, Status::Offline),
            (Status::Offline, Status::Restarting),
            (Status::Restarting, Status::Offline),
            (Status::Offline, Status::Restarting),
        ]
    );

    let starts = h
        .vm
        .calls()
        .into_iter()
        .filter(|call| matches!(call, VmCall::Start(_)))
        .count();
    assert_eq!(starts, 3);
}

#[tokio::test(start_paused = true)]
async fn test_pause_freezes_status_and_skips_probe() {
    let mut h = harness(ScriptedProbe::new(vec![ProbeOutcome::Success, failure()]));

    h.monitor.tick().await;
    assert_eq!(h.store.status(), Status::Online);
    drain_messages(&mut h.events);

    h.control.pause();
    for _ in 0..5 {
        assert_eq!(h.monitor.tick().await, TickOutcome::Idle);
    }

    assert_eq!(h.store.status(), Status::Online);
    assert_eq!(h.probe.call_count(), 1);
    assert!(h.vm.calls().is_empty());
    assert_eq!(drain_messages(&mut h.events), vec!["Pausing monitoring..."]);

    // Resuming picks up the failing probe on the next tick
    h.control.resume();
    assert!(matches!(h.monitor.tick().await, TickOutcome::Recovered(_)));
    assert_eq!(h.store.status(), Status::Restarting);
}

#[tokio::test(start_paused = true)]
async fn test_paused_from_start_stays_unknown() {
    let h = harness(ScriptedProbe::always_failing());

    h.control.pause();
    for _ in 0..5 {
        h.monitor.tick().await;
    }

    assert_eq!(h.store.status(), Status::Unknown);
    assert_eq!(h.probe.call_count(), 0);
    assert!(h.vm.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_pause_mid_probe_applies_next_tick() {
    let h = harness(ScriptedProbe::always_failing().with_latency(Duration::from_secs(4)));

    let tick = {
        let monitor = Arc::clone(&h.monitor);
        tokio::spawn(async move { monitor.tick().await })
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    h.control.pause();

    // The in-flight probe still completes and triggers recovery
    assert!(matches!(tick.await.unwrap(), TickOutcome::Recovered(_)));
    assert_eq!(h.probe.call_count(), 1);

    assert_eq!(h.monitor.tick().await, TickOutcome::Idle);
    assert_eq!(h.probe.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_tick_after_stop_does_nothing() {
    let h = harness(ScriptedProbe::always_failing());

    h.control.stop();

    assert_eq!(h.monitor.tick().await, TickOutcome::Stopped);
    assert_eq!(h.probe.call_count(), 0);
    assert!(h.vm.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_run_probes_after_boot_grace_then_every_interval() {
    let h = harness(ScriptedProbe::always(ProbeOutcome::Success));
    let start = Instant::now();

    let task = {
        let monitor = Arc::clone(&h.monitor);
        tokio::spawn(async move { monitor.run().await })
    };

    tokio::time::sleep_until(start + Duration::from_secs(59)).await;
    assert_eq!(h.probe.call_count(), 0);

    // Probes at 60, 90, 120
    tokio::time::sleep_until(start + Duration::from_secs(125)).await;
    assert_eq!(h.probe.call_count(), 3);
    assert_eq!(h.store.status(), Status::Online);

    h.control.stop();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_run_waits_boot_grace_after_recovery() {
    let h = harness(ScriptedProbe::new(vec![failure(), ProbeOutcome::Success]));
    let start = Instant::now();

    let task = {
        let monitor = Arc::clone(&h.monitor);
        tokio::spawn(async move { monitor.run().await })
    };

    // Probe fails at 60, recovery takes 5s, boot grace 60s, interval 30s: next probe at 155
    tokio::time::sleep_until(start + Duration::from_secs(150)).await;
    assert_eq!(h.probe.call_count(), 1);
    assert_eq!(h.store.status(), Status::Restarting);

    tokio::time::sleep_until(start + Duration::from_secs(160)).await;
    assert_eq!(h.probe.call_count(), 2);
    assert_eq!(h.store.status(), Status::Online);

    h.control.stop();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_mid_interval_ends_loop() {
    let h = harness(ScriptedProbe::always(ProbeOutcome::Success));
    let start = Instant::now();

    let task = {
        let monitor = Arc::clone(&h.monitor);
        tokio::spawn(async move { monitor.run().await })
    };

    tokio::time::sleep_until(start + Duration::from_secs(75)).await;
    assert_eq!(h.probe.call_count(), 1);

    h.control.stop();
    task.await.unwrap();

    // The loop exits without waiting out the interval
    assert!(start.elapsed() < Duration::from_secs(90));
    assert!(h.probe.call_count() <= 2);
    assert!(!h.store.is_running());

    h.control.resume();
    assert!(!h.store.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_boot_grace_ends_loop() {
    let h = harness(ScriptedProbe::always(ProbeOutcome::Success));

    let task = {
        let monitor = Arc::clone(&h.monitor);
        tokio::spawn(async move { monitor.run().await })
    };

    tokio::time::sleep(Duration::from_secs(10)).await;
    h.control.stop();
    task.await.unwrap();

    assert_eq!(h.probe.call_count(), 0);
    assert_eq!(h.store.status(), Status::Unknown);
}

#[tokio::test(start_paused = true)]
async fn test_stop_does_not_interrupt_recovery() {
    let h = harness(ScriptedProbe::always_failing());
    let start = Instant::now();

    let task = {
        let monitor = Arc::clone(&h.monitor);
        tokio::spawn(async move { monitor.run().await })
    };

    // Probe at 60 fails; the power-off grace runs until 65
    tokio::time::sleep_until(start + Duration::from_secs(62)).await;
    assert_eq!(h.vm.calls(), vec![VmCall::IsRunning, VmCall::PowerOff]);

    h.control.stop();
    task.await.unwrap();

    assert_eq!(
        h.vm.calls(),
        vec![VmCall::IsRunning, VmCall::PowerOff, VmCall::Start(StartMode::Headless)]
    );
    assert_eq!(h.probe.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_every_outcome_sequence_follows_state_machine() {
    // All sequences of six probe outcomes
    for mask in 0u32..64 {
        let outcomes: Vec<ProbeOutcome> = (0..6)
            .map(|bit| {
                if mask & (1 << bit) == 0 {
                    ProbeOutcome::Success
                } else {
                    failure()
                }
            })
            .collect();

        let mut h = harness(ScriptedProbe::new(outcomes.clone()));
        let mut last = Status::Unknown;

        for outcome in &outcomes {
            h.monitor.tick().await;
            let status = h.store.status();
            match outcome {
                ProbeOutcome::Success => assert_eq!(status, Status::Online),
                ProbeOutcome::Failure(_) => assert_eq!(status, Status::Restarting),
            }
            last = status;
        }

        let transitions = drain_transitions(&mut h.events);
        for (from, to) in &transitions {
            assert!(from.can_transition_to(*to), "mask {}: {} -> {}", mask, from, to);
        }

        // Events chain together and end at the final status
        for pair in transitions.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
        assert_eq!(transitions.last().map(|t| t.1), Some(last));
    }
}
