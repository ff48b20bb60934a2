//! Restart sequencing: every path that ends in a reboot goes through the
//! pending-restart grace period first.

use modhub::config;
use modhub::error::{Outcome, ResultCode, messages};
use modhub::events::{Event, EventKind, SystemEventKind};

use crate::mock_hw::{Rig, record};

const GRACE_LIMIT_SECS: u64 = config::RESTART_GRACE_SECS as u64 + 3;

#[test]
fn restart_command_waits_for_grace_period() {
    let mut rig = Rig::new();
    rig.start();
    let pending = record(&rig.ctx().bus, EventKind::System);
    assert_eq!(rig.app.route_command("restart").unwrap(), Outcome::ok("Ok"));
    assert_eq!(*pending.borrow(), [Event::System(SystemEventKind::PendingRestart)]);
    assert!(!rig.app.restart_requested());

    let started = rig.time.now_ms();
    assert!(rig.run_until(GRACE_LIMIT_SECS, |r| r.app.restart_requested()));
    assert!(rig.time.now_ms() - started >= u64::from(config::RESTART_GRACE_SECS) * 1000);
}

#[test]
fn firmware_upload_then_restart() {
    let mut rig = Rig::new();
    rig.start();
    let image = [0xA5u8; 96];
    assert_eq!(
        rig.app.upload_begin(config::CORE_ID, "firmware", image.len()),
        Outcome::ok(messages::UPLOAD_STARTED)
    );
    assert_eq!(
        rig.app.upload_begin(config::CORE_ID, "firmware", image.len()).detail,
        messages::UPLOAD_IN_PROGRESS
    );
    for chunk in image.chunks(32) {
        assert!(rig.app.upload_block(config::CORE_ID, chunk).is_success());
    }
    assert_eq!(
        rig.app.upload_end(config::CORE_ID, true),
        Outcome::ok(messages::UPLOAD_FIRMWARE_DONE)
    );
    assert!(rig.run_until(GRACE_LIMIT_SECS, |r| r.app.restart_requested()));
}

#[test]
fn short_firmware_upload_fails_but_still_restarts() {
    let mut rig = Rig::new();
    rig.start();
    assert!(rig.app.upload_begin(config::CORE_ID, "firmware", 64).is_success());
    assert!(rig.app.upload_block(config::CORE_ID, &[0; 10]).is_success());
    let outcome = rig.app.upload_end(config::CORE_ID, true);
    assert_eq!(outcome.code, ResultCode::Error);
    assert!(rig.run_until(GRACE_LIMIT_SECS, |r| r.app.restart_requested()));
}

#[test]
fn rejected_uploads_do_not_restart() {
    let mut rig = Rig::new();
    rig.start();
    assert_eq!(rig.app.upload_begin(config::CORE_ID, "fs_image", 10), Outcome::unknown_command());
    assert_eq!(
        rig.app.upload_begin(config::CORE_ID, "firmware", 0).detail,
        messages::UPLOAD_INVALID_SIZE
    );
    assert_eq!(rig.app.upload_end(config::CORE_ID, true), Outcome::unknown_command());
    rig.run_secs(GRACE_LIMIT_SECS);
    assert!(!rig.app.restart_requested());
}

#[test]
fn nvs_clear_erases_and_restarts() {
    let mut rig = Rig::new();
    rig.start();
    rig.app.route_command("mqtt port 1884");
    rig.app.route_command("sleeptime 40");
    assert_eq!(rig.app.route_command("nvs wipe").unwrap().detail, messages::INVALID_VALUE);
    assert!(!rig.app.restart_requested());

    assert_eq!(rig.app.route_command("nvs clear").unwrap().detail, messages::OK);
    assert_eq!(rig.app.route_command("mqtt port").unwrap().detail, "1883");
    assert_eq!(rig.ctx().settings.sleep_time_ms(), config::DEFAULT_SLEEP_TIME_MS);
    assert!(rig.run_until(GRACE_LIMIT_SECS, |r| r.app.restart_requested()));
}

#[test]
fn exhausted_wifi_budget_with_restart_policy_reboots() {
    let mut rig = Rig::new();
    rig.store_wifi("nowhere", "password1");
    rig.ctx()
        .settings
        .set_byte(config::WIFI_ID, "cfgmethod", config::ConfigMethod::Restart.to_byte())
        .unwrap();
    rig.start();
    let budget_secs =
        u64::from(config::WIFI_CONNECT_RETRIES) * u64::from(config::WIFI_CONNECT_DELAY_SECS);
    rig.run_secs(budget_secs / 2);
    assert!(!rig.app.restart_requested());
    assert!(rig.run_until(budget_secs + GRACE_LIMIT_SECS + 5, |r| r.app.restart_requested()));
    assert!(rig.radio.requests().iter().all(|r| r.ssid == "nowhere"));
}
