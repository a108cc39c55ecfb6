//! Integration tests for the operating-mode state machine driven directly,
//! without the loop service: objective gating, temporary-mode rules,
//! persistence failures and shared access.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use apscore::ModeChangeError;
use apscore::adapters::mem_store::MemStore;
use apscore::app::ports::StorageError;
use apscore::config::{ApsMode, SystemConfig};
use apscore::constraints::{ConstraintAggregator, ConstraintContext, PumpCapabilities};
use apscore::mode::{
    ModeChangeRequest, ModeController, ModeHistory, ModeTarget, OperatingMode,
    SharedModeController, StorageModeHistory,
};
use apscore::objectives::ObjectiveProgress;
use apscore::profile::Profile;

use crate::mock_env::{FailingStore, MIN, T0};

fn ctx<'a>(config: &'a SystemConfig, profile: &'a Profile, now_ms: i64) -> ConstraintContext<'a> {
    ConstraintContext {
        now_ms,
        utc_offset_ms: 0,
        config,
        profile: Some(profile),
        mode: OperatingMode::DisabledLoop,
        pump: PumpCapabilities::ready(),
        sensor: Default::default(),
    }
}

fn closed_config() -> SystemConfig {
    SystemConfig {
        aps_mode: ApsMode::Closed,
        ..SystemConfig::default()
    }
}

// ── Objective gating ──────────────────────────────────────────

#[test]
fn fresh_install_cannot_open_the_loop() {
    let gate = Arc::new(ObjectiveProgress::standard());
    let agg = ConstraintAggregator::standard(gate.clone());
    let mut mc = ModeController::new(StorageModeHistory::open(MemStore::new()), gate);
    let config = closed_config();
    let profile = Profile::flat("p", 1.0);

    let err = mc
        .handle_running_mode_change(
            &ModeChangeRequest::user(OperatingMode::OpenLoop),
            &agg,
            &ctx(&config, &profile, T0),
        )
        .unwrap_err();
    assert!(
        err.to_string()
            .contains("objective 1 not completed: Configure profile, pump and glucose source"),
        "{err}"
    );
    assert!(mc.history().is_empty());
}

#[test]
fn closed_loop_blocked_reason_is_reported_once() {
    let mut progress = ObjectiveProgress::standard();
    progress.set_setup_complete(true);
    progress.start(0, T0);
    let gate = Arc::new(progress);
    let agg = ConstraintAggregator::standard(gate.clone());
    let mut mc = ModeController::new(StorageModeHistory::open(MemStore::new()), gate);
    let config = closed_config();
    let profile = Profile::flat("p", 1.0);
    let c = ctx(&config, &profile, T0);

    mc.handle_running_mode_change(&ModeChangeRequest::user(OperatingMode::OpenLoop), &agg, &c)
        .unwrap();
    let err = mc
        .handle_running_mode_change(&ModeChangeRequest::user(OperatingMode::ClosedLoop), &agg, &c)
        .unwrap_err();
    let text = err.to_string();
    assert_eq!(text.matches("objective 2 not completed").count(), 1, "{text}");
    assert_eq!(mc.current(), OperatingMode::OpenLoop);
}

// ── Temporary modes ───────────────────────────────────────────

#[test]
fn temporary_mode_only_leaves_through_resume() {
    let gate = Arc::new(ObjectiveProgress::completed());
    let agg = ConstraintAggregator::standard(gate.clone());
    let mut mc = ModeController::new(StorageModeHistory::open(MemStore::new()), gate);
    let config = closed_config();
    let profile = Profile::flat("p", 1.0);
    let c = ctx(&config, &profile, T0);

    mc.handle_running_mode_change(
        &ModeChangeRequest::user(OperatingMode::SuspendedByUser).for_minutes(30),
        &agg,
        &c,
    )
    .unwrap();

    let err = mc
        .handle_running_mode_change(
            &ModeChangeRequest::user(OperatingMode::DisconnectedPump).for_minutes(30),
            &agg,
            &c,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        ModeChangeError::NotAllowed { ref reason, .. } if reason == "already suspended"
    ));

    let err = mc
        .handle_running_mode_change(&ModeChangeRequest::user(OperatingMode::OpenLoop), &agg, &c)
        .unwrap_err();
    assert!(err.to_string().ends_with("resume first"), "{err}");

    // Same mode again extends the suspension with a new record.
    let later = ctx(&config, &profile, T0 + 10 * MIN);
    let change = mc
        .handle_running_mode_change(
            &ModeChangeRequest::user(OperatingMode::SuspendedByUser).for_minutes(30),
            &agg,
            &later,
        )
        .unwrap();
    assert_eq!(change.record_id, Some(1));
    assert_eq!(mc.expires_at_ms(), Some(T0 + 40 * MIN));

    let change = mc
        .handle_running_mode_change(&ModeChangeRequest::user(ModeTarget::Resume), &agg, &later)
        .unwrap();
    assert_eq!(change.mode, OperatingMode::ClosedLoop);
    assert_eq!(mc.expires_at_ms(), None);
}

#[test]
fn resume_without_temporary_mode_is_rejected() {
    let gate = Arc::new(ObjectiveProgress::completed());
    let agg = ConstraintAggregator::standard(gate.clone());
    let mut mc = ModeController::new(StorageModeHistory::open(MemStore::new()), gate);
    let config = SystemConfig::default();
    let profile = Profile::flat("p", 1.0);
    let c = ctx(&config, &profile, T0);

    let err = mc
        .handle_running_mode_change(&ModeChangeRequest::user(ModeTarget::Resume), &agg, &c)
        .unwrap_err();
    assert!(err.to_string().contains("nothing to resume"));
}

#[test]
fn resume_under_lgs_preference_lands_on_lgs() {
    let gate = Arc::new(ObjectiveProgress::completed());
    let agg = ConstraintAggregator::standard(gate.clone());
    let mut mc = ModeController::new(StorageModeHistory::open(MemStore::new()), gate);
    let config = SystemConfig {
        aps_mode: ApsMode::Lgs,
        ..SystemConfig::default()
    };
    let profile = Profile::flat("p", 1.0);
    let c = ctx(&config, &profile, T0);

    let err = mc
        .handle_running_mode_change(
            &ModeChangeRequest::user(OperatingMode::SuperBolus).for_minutes(5),
            &agg,
            &c,
        )
        .unwrap_err();
    assert!(matches!(err, ModeChangeError::DurationTooShort { requested: Some(5), .. }));

    mc.handle_running_mode_change(
        &ModeChangeRequest::user(OperatingMode::SuperBolus).for_minutes(6),
        &agg,
        &c,
    )
    .unwrap();
    let change = mc
        .handle_running_mode_change(&ModeChangeRequest::user(ModeTarget::Resume), &agg, &c)
        .unwrap();
    assert_eq!(change.mode, OperatingMode::ClosedLoopLgs);
}

#[test]
fn resume_goes_to_open_loop_when_closed_loop_not_allowed() {
    let gate = Arc::new(ObjectiveProgress::completed());
    let agg = ConstraintAggregator::standard(gate.clone());
    let mut mc = ModeController::new(StorageModeHistory::open(MemStore::new()), gate);
    let profile = Profile::flat("p", 1.0);

    for aps_mode in [ApsMode::Open, ApsMode::Lgs, ApsMode::Closed] {
        let config = SystemConfig {
            aps_mode,
            ..SystemConfig::default()
        };
        let mut c = ctx(&config, &profile, T0);
        if aps_mode != ApsMode::Open {
            c.pump.supports_temp_basal = false;
        }
        assert!(!agg.is_closed_loop_allowed(&c).value());
        assert!(agg.is_loop_invocation_allowed(&c).value());

        mc.handle_running_mode_change(
            &ModeChangeRequest::user(OperatingMode::SuspendedByUser).for_minutes(10),
            &agg,
            &c,
        )
        .unwrap();
        let change = mc
            .handle_running_mode_change(&ModeChangeRequest::user(ModeTarget::Resume), &agg, &c)
            .unwrap();
        assert_eq!(change.mode, OperatingMode::OpenLoop, "{aps_mode:?}");
    }
}

// ── Persistence failures ──────────────────────────────────────

#[test]
fn failed_write_leaves_mode_unchanged_and_is_referenced_later() {
    let (store, fail) = FailingStore::new();
    let gate = Arc::new(ObjectiveProgress::completed());
    let agg = ConstraintAggregator::standard(gate.clone());
    let mut mc = ModeController::new(StorageModeHistory::open(store), gate);
    let config = SystemConfig::default();
    let profile = Profile::flat("p", 1.0);
    let c = ctx(&config, &profile, T0);

    fail.store(true, Ordering::SeqCst);
    let err = mc
        .handle_running_mode_change(&ModeChangeRequest::user(OperatingMode::OpenLoop), &agg, &c)
        .unwrap_err();
    assert_eq!(err, ModeChangeError::Persistence(StorageError::Full));
    assert_eq!(mc.current(), OperatingMode::DisabledLoop);
    assert_eq!(mc.dangling_id(), Some(0));

    fail.store(false, Ordering::SeqCst);
    let change = mc
        .handle_running_mode_change(&ModeChangeRequest::user(OperatingMode::OpenLoop), &agg, &c)
        .unwrap();
    assert_eq!(change.record_id, Some(1), "ids are never reused");
    let record = mc.history().latest().unwrap();
    assert_eq!(record.reference_id, Some(0));
    assert_eq!(mc.dangling_id(), None);
    assert!(mc.history().get(0).is_none());
}

// ── Shared access ─────────────────────────────────────────────

#[test]
fn readers_see_whole_transitions() {
    let gate = Arc::new(ObjectiveProgress::completed());
    let agg = ConstraintAggregator::standard(gate.clone());
    let shared = SharedModeController::new(ModeController::new(
        StorageModeHistory::open(MemStore::new()),
        gate,
    ));
    let config = closed_config();
    let profile = Profile::flat("p", 1.0);
    let c = ctx(&config, &profile, T0);

    std::thread::scope(|s| {
        s.spawn(|| {
            for target in [
                OperatingMode::OpenLoop,
                OperatingMode::ClosedLoop,
                OperatingMode::ClosedLoopLgs,
                OperatingMode::ClosedLoop,
            ] {
                shared
                    .request(&ModeChangeRequest::user(target), &agg, &c)
                    .unwrap();
            }
        });
        s.spawn(|| {
            for _ in 0..100 {
                let snap = shared.snapshot();
                match snap.active_record {
                    Some(r) => assert_eq!(r.mode, snap.mode),
                    None => assert_eq!(snap.mode, OperatingMode::DisabledLoop),
                }
            }
        });
    });

    let mc = shared.into_inner();
    assert_eq!(mc.current(), OperatingMode::ClosedLoop);
    assert_eq!(mc.history().len(), 4);
}
