//! Integration tests for the LoopService cycle: glucose → mode upkeep →
//! bounds → events.
//!
//! These drive the service through [`MockEnv`] exactly as a platform loop
//! would, one `tick` per five-minute cycle.

use std::sync::Arc;

use apscore::adapters::mem_store::MemStore;
use apscore::app::commands::AppCommand;
use apscore::app::events::AppEvent;
use apscore::app::ports::ConfigPort;
use apscore::app::service::LoopService;
use apscore::config::{ApsMode, SystemConfig};
use apscore::constraints::ConstraintAggregator;
use apscore::mode::record::reasons_from;
use apscore::mode::{
    ModeChangeRequest, ModeController, ModeHistory, ModeRecord, OperatingMode, StorageModeHistory,
};
use apscore::objectives::ObjectiveProgress;

use crate::mock_env::{MIN, MockEnv, RecordingSink, T0};

type Service = LoopService<StorageModeHistory<MemStore>>;

fn make_service(config: SystemConfig) -> Service {
    let gate = Arc::new(ObjectiveProgress::completed());
    LoopService::new(
        config,
        ConstraintAggregator::standard(gate.clone()),
        ModeController::new(StorageModeHistory::open(MemStore::new()), gate),
    )
}

fn make_app(config: SystemConfig) -> (Service, MockEnv, RecordingSink) {
    let mut app = make_service(config);
    let mut env = MockEnv::new();
    env.steady(120.0, 2.0);
    let mut sink = RecordingSink::new();
    app.start(&mut sink);
    (app, env, sink)
}

fn closed_config() -> SystemConfig {
    SystemConfig {
        aps_mode: ApsMode::Closed,
        ..SystemConfig::default()
    }
}

// ── Start-up ──────────────────────────────────────────────────

#[test]
fn fresh_start_is_disabled_loop() {
    let (app, _env, sink) = make_app(SystemConfig::default());
    assert_eq!(app.mode(), OperatingMode::DisabledLoop);
    assert_eq!(sink.events, vec![AppEvent::Started(OperatingMode::DisabledLoop)]);
}

#[test]
fn start_restores_latest_record() {
    let mut history = StorageModeHistory::open(MemStore::new());
    let record = ModeRecord {
        id: history.allocate_id(),
        timestamp_ms: T0 - 60 * MIN,
        utc_offset_ms: 0,
        mode: OperatingMode::OpenLoop,
        planned_duration_ms: 0,
        auto_forced: false,
        reasons: reasons_from("user"),
        reference_id: None,
    };
    history.append(&record).unwrap();

    let gate = Arc::new(ObjectiveProgress::completed());
    let mut app = LoopService::new(
        SystemConfig::default(),
        ConstraintAggregator::standard(gate.clone()),
        ModeController::new(history, gate),
    );
    let mut sink = RecordingSink::new();
    assert_eq!(app.start(&mut sink), OperatingMode::OpenLoop);
    assert_eq!(app.snapshot().active_record.map(|r| r.id), Some(0));
}

// ── Glucose ───────────────────────────────────────────────────

#[test]
fn tick_reports_trend_and_telemetry() {
    let (mut app, mut env, mut sink) = make_app(SystemConfig::default());
    sink.clear();

    let report = app.tick(&mut env, &mut sink);
    assert_eq!(report.cycle, 1);
    let status = report.status().expect("fresh glucose");
    assert_eq!(status.glucose, 120.0);
    assert!((status.delta - 2.0).abs() < 1e-9, "delta {}", status.delta);
    assert_eq!(app.last_status(), Some(status));

    let telemetry = sink
        .events
        .iter()
        .find_map(|e| match e {
            AppEvent::Telemetry(t) => Some(t.clone()),
            _ => None,
        })
        .expect("telemetry every cycle");
    assert_eq!(telemetry.cycle, 1);
    assert_eq!(telemetry.glucose, Some(120.0));
    assert_eq!(telemetry.max_bolus_u, 3.0);
    assert_eq!(telemetry.max_basal_u_per_h, 1.0);
}

#[test]
fn stale_glucose_is_reported_and_withheld() {
    let mut app = make_service(SystemConfig::default());
    let mut env = MockEnv::new();
    env.reading(110.0, 15).reading(112.0, 10);
    let mut sink = RecordingSink::new();

    let report = app.tick(&mut env, &mut sink);
    assert!(report.glucose.is_none());
    assert!(app.last_status().is_none());
    assert!(sink.events.contains(&AppEvent::GlucoseStale {
        newest_ms: Some(T0 - 10 * MIN)
    }));
}

#[test]
fn missing_glucose_reports_no_reading() {
    let mut app = make_service(SystemConfig::default());
    let mut env = MockEnv::new();
    let mut sink = RecordingSink::new();

    app.tick(&mut env, &mut sink);
    assert!(sink.events.contains(&AppEvent::GlucoseStale { newest_ms: None }));
}

#[test]
fn artifact_readings_are_skipped() {
    let (mut app, mut env, mut sink) = make_app(SystemConfig::default());
    env.step(5, 20.0);

    let status = app.tick(&mut env, &mut sink).status().expect("older fresh reading");
    // Newest valid reading is 5 minutes old: still fresh.
    assert_eq!(status.glucose, 120.0);
}

// ── Mode commands ─────────────────────────────────────────────

#[test]
fn change_mode_command_replies_and_emits() {
    let (mut app, mut env, mut sink) = make_app(SystemConfig::default());

    let reply = app.handle_command(
        AppCommand::ChangeMode(ModeChangeRequest::user(OperatingMode::OpenLoop)),
        &mut env,
        &mut sink,
    );
    assert!(reply.success, "{}", reply.comment);
    assert_eq!(reply.comment, "loop disabled -> open loop");
    assert_eq!(app.mode(), OperatingMode::OpenLoop);
    assert!(sink.events.contains(&AppEvent::ModeChanged {
        from: OperatingMode::DisabledLoop,
        to: OperatingMode::OpenLoop,
        record_id: 0,
        auto_forced: false,
    }));
}

#[test]
fn closed_loop_rejected_when_preferences_say_open() {
    let (mut app, mut env, mut sink) = make_app(SystemConfig::default());

    let reply = app.handle_command(
        AppCommand::ChangeMode(ModeChangeRequest::user(OperatingMode::ClosedLoop)),
        &mut env,
        &mut sink,
    );
    assert!(!reply.success);
    assert!(
        reply.comment.contains("closed loop disabled in preferences"),
        "{}",
        reply.comment
    );
    assert_eq!(app.mode(), OperatingMode::DisabledLoop);
    assert_eq!(
        sink.count(|e| matches!(e, AppEvent::ModeChangeRejected { .. })),
        1
    );
}

#[test]
fn no_profile_rejects_every_change() {
    let (mut app, mut env, mut sink) = make_app(closed_config());
    env.profile = None;

    let reply = app.handle_command(
        AppCommand::ChangeMode(ModeChangeRequest::user(OperatingMode::OpenLoop)),
        &mut env,
        &mut sink,
    );
    assert!(!reply.success);
    assert_eq!(reply.comment, "no active profile");
}

#[test]
fn allowed_next_modes_follow_preferences() {
    let (app, mut env, _sink) = make_app(SystemConfig::default());
    let allowed = app.allowed_next_modes(&mut env);
    assert!(allowed.contains(&OperatingMode::OpenLoop.into()));
    assert!(allowed.contains(&OperatingMode::SuperBolus.into()));
    assert!(!allowed.contains(&OperatingMode::ClosedLoop.into()));
    assert!(!allowed.contains(&OperatingMode::ClosedLoopLgs.into()));

    let (app, mut env, _sink) = make_app(closed_config());
    assert!(
        app.allowed_next_modes(&mut env)
            .contains(&OperatingMode::ClosedLoop.into())
    );
}

// ── Pump synchronisation ──────────────────────────────────────

#[test]
fn pump_suspension_forces_and_resumes() {
    let (mut app, mut env, mut sink) = make_app(closed_config());
    app.handle_command(
        AppCommand::ChangeMode(ModeChangeRequest::user(OperatingMode::ClosedLoop)),
        &mut env,
        &mut sink,
    );
    sink.clear();

    env.pump.suspended = true;
    env.step(5, 122.0);
    let report = app.tick(&mut env, &mut sink);
    assert_eq!(report.mode, OperatingMode::SuspendedByPump);
    assert!(!report.bounds.loop_invocation.value());
    let record = app.snapshot().active_record.unwrap();
    assert!(record.auto_forced);
    assert_eq!(record.planned_duration_ms, 60 * MIN);
    assert!(sink.events.contains(&AppEvent::ModeChanged {
        from: OperatingMode::ClosedLoop,
        to: OperatingMode::SuspendedByPump,
        record_id: 1,
        auto_forced: true,
    }));

    // Still suspended on the next cycle: nothing new is written.
    env.step(5, 124.0);
    app.tick(&mut env, &mut sink);
    assert_eq!(app.snapshot().active_record.unwrap().id, 1);

    env.pump.suspended = false;
    env.step(5, 126.0);
    let report = app.tick(&mut env, &mut sink);
    assert_eq!(report.mode, OperatingMode::ClosedLoop);
    assert_eq!(app.snapshot().active_record.unwrap().id, 2);
}

#[test]
fn long_pump_suspension_is_reissued() {
    let (mut app, mut env, mut sink) = make_app(SystemConfig::default());
    env.pump.suspended = true;
    app.tick(&mut env, &mut sink);
    assert_eq!(app.mode(), OperatingMode::SuspendedByPump);

    env.advance(60);
    app.tick(&mut env, &mut sink);
    let snap = app.snapshot();
    assert_eq!(snap.mode, OperatingMode::SuspendedByPump);
    let record = snap.active_record.unwrap();
    assert_eq!(record.id, 1);
    assert_eq!(record.timestamp_ms, T0 + 60 * MIN);
    assert_eq!(snap.expires_at_ms, Some(T0 + 120 * MIN));
}

// ── Temporary-mode expiry ─────────────────────────────────────

#[test]
fn expired_temporary_mode_resumes_to_best_permitted() {
    let (mut app, mut env, mut sink) = make_app(closed_config());
    let reply = app.handle_command(
        AppCommand::ChangeMode(
            ModeChangeRequest::user(OperatingMode::DisconnectedPump).for_minutes(15),
        ),
        &mut env,
        &mut sink,
    );
    assert!(reply.success, "{}", reply.comment);
    assert_eq!(reply.comment, "loop disabled -> pump disconnected for 15 min");

    env.step(10, 121.0);
    assert_eq!(app.tick(&mut env, &mut sink).mode, OperatingMode::DisconnectedPump);

    env.step(5, 122.0);
    let report = app.tick(&mut env, &mut sink);
    assert_eq!(report.mode, OperatingMode::ClosedLoop);
    let record = app.snapshot().active_record.unwrap();
    assert!(record.auto_forced);
    assert!(record.reasons.starts_with("expiry"));
}

#[test]
fn short_temporary_duration_is_rejected() {
    let (mut app, mut env, mut sink) = make_app(SystemConfig::default());
    let reply = app.handle_command(
        AppCommand::ChangeMode(ModeChangeRequest::user(OperatingMode::SuperBolus).for_minutes(3)),
        &mut env,
        &mut sink,
    );
    assert!(!reply.success);
    assert_eq!(reply.comment, "super bolus needs more than 5 min, got 3 min");
    assert_eq!(app.mode(), OperatingMode::DisabledLoop);

    // The minimum itself is still too short.
    let reply = app.handle_command(
        AppCommand::ChangeMode(ModeChangeRequest::user(OperatingMode::SuperBolus).for_minutes(5)),
        &mut env,
        &mut sink,
    );
    assert!(!reply.success);
    assert_eq!(reply.comment, "super bolus needs more than 5 min, got 5 min");
    assert_eq!(app.mode(), OperatingMode::DisabledLoop);
}

// ── Configuration ─────────────────────────────────────────────

#[test]
fn update_config_marks_dirty_and_saves() {
    let (mut app, mut env, mut sink) = make_app(SystemConfig::default());
    assert!(!app.is_config_dirty(), "should not be dirty on start");

    let new_cfg = SystemConfig {
        max_bolus_u: 2.0,
        ..SystemConfig::default()
    };
    let reply = app.handle_command(AppCommand::UpdateConfig(new_cfg.clone()), &mut env, &mut sink);
    assert!(reply.success);
    assert!(app.is_config_dirty());
    assert_eq!(app.tick(&mut env, &mut sink).bounds.max_bolus.value(), 2.0);

    let store = MemStore::new();
    assert!(app.save_config_if_dirty(&store));
    assert!(!app.is_config_dirty());
    assert!(!app.save_config_if_dirty(&store), "nothing left to save");
    assert_eq!(store.load().unwrap(), new_cfg);
}

#[test]
fn invalid_config_is_rejected_unchanged() {
    let (mut app, mut env, mut sink) = make_app(SystemConfig::default());
    let bad = SystemConfig {
        max_bolus_u: 250.0,
        ..SystemConfig::default()
    };
    let reply = app.handle_command(AppCommand::UpdateConfig(bad), &mut env, &mut sink);
    assert!(!reply.success);
    assert!(!app.is_config_dirty());
    assert_eq!(app.config().max_bolus_u, SystemConfig::default().max_bolus_u);
    assert!(sink.events.contains(&AppEvent::ConfigRejected("max_bolus_u must be 0–100")));
}

#[test]
fn save_config_command_schedules_save() {
    let (mut app, mut env, mut sink) = make_app(SystemConfig::default());
    let reply = app.handle_command(AppCommand::SaveConfig, &mut env, &mut sink);
    assert!(reply.success);
    assert!(app.is_config_dirty());
}
