//! Logging session integration tests.
//!
//! Sessions run against a started instrument over the simulation rig; the
//! assertions read the produced files back from the temporary storage root.

mod common;

use common::{Bench, records, wait_until};
use miap_common::config::ConfigLoader;
use miap_core::Ack;
use miap_core::faults::FaultCode;
use miap_core::settings::RuntimeSettings;
use std::fs;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const WAIT: Duration = Duration::from_secs(5);

/// iso, epoch ms, 3 channels, 2 temperatures, bus V/mA/mW.
const DIRECT_FIELDS: usize = 10;

// ─── Direct mode ────────────────────────────────────────────────────

#[test]
fn test_direct_session_records_and_queue_on_stop() {
    let bench = Bench::start();
    bench.rig.analog.set_model([0.5, 1.0, 1.5], [0.0; 3]);
    let inst = &bench.instrument;
    wait_until(WAIT, || inst.state_snapshot().acquisition.channels == [0.5, 1.0, 1.5]);

    assert_eq!(inst.start_logging("bench run", false, 0.05).unwrap(), Ack::LoggingStarted);
    let snap = inst.state_snapshot();
    assert!(snap.logging.active);
    assert!(!snap.logging.use_motion_cycle);
    let name = snap.logging.filename;
    assert!(name.starts_with("dev1_"));
    assert!(name.ends_with("_bench_run.csv"));

    wait_until(WAIT, || records(&bench.path(&name)).len() >= 2);
    assert_eq!(inst.stop_logging().unwrap(), Ack::LoggingStopped);

    let snap = inst.state_snapshot();
    assert!(!snap.logging.active);
    assert!(snap.logging.filename.is_empty());
    assert!(!snap.motion.enabled);
    assert!(!bench.path(&name).exists());
    assert_eq!(bench.files_in("to_upload"), [name.clone()]);

    let rows = records(&bench.path("to_upload").join(&name));
    assert!(rows.len() >= 2);
    for row in &rows {
        assert_eq!(row.len(), DIRECT_FIELDS);
        assert_eq!(row[2], "0.500000");
        assert_eq!(row[4], "1.500000");
    }
    assert_eq!(snap.acquisition.calibrated, [0.5, 1.0, 1.5]);

    let settings = RuntimeSettings::load(&bench.path("config.toml")).unwrap();
    assert!(!settings.logging.active);
    assert_eq!(settings.logging.postfix, "bench_run");
}

#[test]
fn test_second_start_rejected() {
    let bench = Bench::start();
    let inst = &bench.instrument;

    inst.start_logging("one", false, 0.05).unwrap();
    let err = inst.start_logging("two", false, 0.05).unwrap_err();
    assert_eq!(err.to_string(), "logging already active");
    assert!(inst.state_snapshot().logging.filename.ends_with("_one.csv"));
}

// ─── Motion cycle ───────────────────────────────────────────────────

#[test]
fn test_motion_cycle_pairs_zero_and_offset_windows() {
    let bench = Bench::start();
    // Channel 1 follows the physical position.
    bench.rig.analog.set_model([100.0, 0.0, 0.0], [1.0, 0.0, 0.0]);
    let inst = &bench.instrument;

    inst.start_logging("cycle", true, 0.05).unwrap();
    let name = inst.state_snapshot().logging.filename;
    wait_until(WAIT, || !records(&bench.path(&name)).is_empty());
    inst.stop_logging().unwrap();

    let rows = records(&bench.path("to_upload").join(&name));
    let first = &rows[0];
    assert_eq!(first.len(), DIRECT_FIELDS + 3);
    // Zero pass at the sensor, 30 steps behind the start.
    let zero: f64 = first[2].parse().unwrap();
    assert!((zero - 70.0).abs() < 1e-3, "zero pass {zero}");
    // Offset pass another cycle length back.
    let offset: f64 = first[10].parse().unwrap();
    assert!((offset - 50.0).abs() < 1e-3, "offset pass {offset}");

    let snap = inst.state_snapshot();
    assert!(!snap.logging.homed_once);
    assert!(!snap.motion.enabled);
    assert!(bench.rig.mechanics.pulses() >= 30 + 20);
}

#[test]
fn test_logging_move_refuses_manual_motion() {
    let bench = Bench::start_with(|c| {
        c.logging.cycle_steps = 3000;
        c.motion.default_speed_us = 100;
    });
    let inst = &bench.instrument;

    inst.start_logging("owned", true, 0.05).unwrap();
    wait_until(WAIT, || inst.state_snapshot().motion.session_move);

    let err = inst.stop_motion().unwrap_err();
    assert_eq!(err.to_string(), "stepper in use by the logging session");
    assert!(inst.zero_motion().is_err());
    assert!(inst.move_motion(10, true, 0).is_err());
    assert!(inst.state_snapshot().motion.moving);

    inst.stop_logging().unwrap();
    let snap = inst.state_snapshot();
    assert!(!snap.motion.session_move);
    assert!(!snap.motion.enabled);
    assert!(!snap.motion.abort);
}

// ─── Averaging window ───────────────────────────────────────────────

#[test]
fn test_overlong_window_is_clamped() {
    let bench = Bench::start_with(|c| c.logging.max_duration_s = 30.0);
    let inst = &bench.instrument;

    inst.start_logging("long", false, 1e30).unwrap();
    let snap = inst.state_snapshot();
    assert_eq!(snap.logging.averaging_duration_s, 30.0);
    let name = snap.logging.filename;

    thread::sleep(Duration::from_millis(50));
    assert_eq!(inst.stop_logging().unwrap(), Ack::LoggingStopped);
    assert_eq!(bench.files_in("to_upload"), [name]);
    assert!(!inst.state_snapshot().motion.abort);

    let settings = RuntimeSettings::load(&bench.path("config.toml")).unwrap();
    assert_eq!(settings.logging.duration_s, 30.0);
}

// ─── Storage contention ─────────────────────────────────────────────

#[test]
fn test_busy_storage_delays_record_without_loss() {
    let bench = Bench::start();
    let inst = &bench.instrument;

    inst.start_logging("held", false, 0.05).unwrap();
    let name = inst.state_snapshot().logging.filename;

    let guard = inst.storage().acquire_for(Duration::from_secs(1)).unwrap();
    wait_until(WAIT, || {
        inst.state_snapshot().faults.get(FaultCode::StorageBusy).is_some()
    });
    thread::sleep(Duration::from_millis(150));
    assert!(records(&bench.path(&name)).is_empty());
    let released_ms = epoch_ms();
    drop(guard);

    wait_until(WAIT, || !records(&bench.path(&name)).is_empty());
    let rows = records(&bench.path(&name));
    let stamp: u64 = rows[0][1].parse().unwrap();
    assert!(stamp < released_ms, "record stamped {stamp} after release {released_ms}");
    wait_until(WAIT, || {
        inst.state_snapshot().faults.get(FaultCode::StorageBusy).is_none()
    });
    inst.stop_logging().unwrap();
}

// ─── Rotation ───────────────────────────────────────────────────────

#[test]
fn test_rotation_queues_full_files() {
    let bench = Bench::start_with(|c| c.logging.rotation_period_s = 1);
    let inst = &bench.instrument;

    inst.start_logging("rot", false, 0.05).unwrap();
    let first = inst.state_snapshot().logging.filename;

    wait_until(WAIT, || inst.state_snapshot().logging.filename != first);
    assert_eq!(bench.files_in("to_upload"), [first.clone()]);
    let current = inst.state_snapshot().logging.filename;
    assert!(current.ends_with("_rot.csv"));
    assert!(bench.path(&current).exists());

    inst.stop_logging().unwrap();
    let queued = bench.files_in("to_upload");
    assert!(queued.len() >= 2);
    assert!(queued.contains(&first));
    assert!(queued.iter().all(|n| n.ends_with("_rot.csv")));
    assert!(!records(&bench.path("to_upload").join(&first)).is_empty());
}

// ─── Restart ────────────────────────────────────────────────────────

#[test]
fn test_restore_resumes_logging_and_shutdown_keeps_intent() {
    let bench = Bench::build(|_| {});
    fs::write(
        bench.path("config.toml"),
        "[logging]\nactive = true\npostfix = \"resume\"\nuse_motion_cycle = false\nduration_s = 0.05\n",
    )
    .unwrap();
    let inst = &bench.instrument;
    inst.start().unwrap();
    bench.wait_for_readings();

    assert!(inst.restore_settings().unwrap());
    let snap = inst.state_snapshot();
    assert!(snap.logging.active);
    let name = snap.logging.filename;
    assert!(name.ends_with("_resume.csv"));
    wait_until(WAIT, || !records(&bench.path(&name)).is_empty());

    inst.shutdown();
    assert!(!inst.state_snapshot().logging.active);
    assert_eq!(bench.files_in("to_upload"), [name]);
    let settings = RuntimeSettings::load(&bench.path("config.toml")).unwrap();
    assert!(settings.logging.active);
    assert_eq!(settings.logging.postfix, "resume");
}

// ─── Helpers ────────────────────────────────────────────────────────

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}
