//! Settings protocol end to end: READ / SAVE commands, the two-pass form
//! batch, escalation, macro expansion and configuration export/import.

use modhub::config::{self, ConfigMethod};
use modhub::error::{Outcome, ResultCode};

use crate::mock_hw::Rig;

fn batch(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs.iter().map(|(k, v)| ((*k).into(), (*v).into())).collect()
}

#[test]
fn read_and_save_through_commands() {
    let mut rig = Rig::new();
    rig.start();
    assert_eq!(rig.app.route_command("sleeptime").unwrap(), Outcome::ok("15"));
    assert_eq!(rig.app.route_command("sleeptime 40").unwrap(), Outcome::ok("40"));
    assert_eq!(rig.app.route_command("sleeptime 251").unwrap(), Outcome::invalid_value());
    assert_eq!(rig.app.route_command("mqtt port").unwrap(), Outcome::ok("1883"));
    assert_eq!(rig.app.route_command("mqtt qos 1").unwrap(), Outcome::unknown_option());
}

#[test]
fn invalid_batch_changes_nothing() {
    let mut rig = Rig::new();
    rig.start();
    let outcome = rig
        .app
        .dispatch_settings(config::MQTT_ID, &batch(&[("port", "8883"), ("host", "")]))
        .unwrap();
    assert_eq!(outcome.code, ResultCode::InvalidValue);
    assert_eq!(outcome.detail, "host: invalid value");
    assert_eq!(rig.app.route_command("mqtt port").unwrap().detail, "1883");

    let outcome = rig
        .app
        .dispatch_settings(config::MQTT_ID, &batch(&[("port", "8883"), ("qos", "1")]))
        .unwrap();
    assert_eq!(outcome.code, ResultCode::UnknownOption);
    assert_eq!(rig.app.route_command("mqtt port").unwrap().detail, "1883");
}

#[test]
fn batch_reports_most_severe_success() {
    let mut rig = Rig::new();
    rig.start();
    let outcome = rig
        .app
        .dispatch_settings(
            config::WIFI_ID,
            &batch(&[("module_id", "wifi"), ("cfgmethod", "wait"), ("hostname", "porch")]),
        )
        .unwrap();
    assert_eq!(outcome, Outcome::new(ResultCode::OkReinit, "Settings are applied"));

    let outcome = rig
        .app
        .dispatch_settings(config::WIFI_ID, &batch(&[("cfgmethod", "wait")]))
        .unwrap();
    assert_eq!(outcome.code, ResultCode::Ok);
}

#[test]
fn oversized_value_fails_the_whole_batch() {
    let mut rig = Rig::new();
    rig.start();
    let long = "x".repeat(600);
    let outcome = rig
        .app
        .dispatch_settings(config::WIFI_ID, &batch(&[("hostname", "porch"), ("ssid1", &long)]))
        .unwrap();
    assert_eq!(outcome.code, ResultCode::InvalidValue);
    assert_eq!(outcome.detail, "ssid1: invalid value");
    assert_eq!(rig.app.route_command("wifi hostname").unwrap().detail, "#TOPIC-#MAC4");
    assert_eq!(rig.app.route_command("wifi ssid1").unwrap().detail, "");
}

#[test]
fn saved_config_method_takes_effect_without_restart() {
    let mut rig = Rig::new();
    rig.store_wifi("nowhere", "secret99");
    rig.ctx()
        .settings
        .set_byte(config::WIFI_ID, "cfgmethod", ConfigMethod::Retry.to_byte())
        .unwrap();
    rig.start();
    rig.run_secs(20);
    assert_eq!(rig.radio.access_point(), None);

    let outcome = rig.app.route_command("wifi cfgmethod manager").unwrap();
    assert_eq!(outcome, Outcome::new(ResultCode::OkReinit, "manager"));
    let wait = u64::from(config::WIFI_RECONFIG_DELAY_SECS) + 3;
    assert!(rig.run_until(wait, |r| r.radio.access_point().is_some()));
}

#[test]
fn port_change_reconnects_the_session() {
    let mut rig = Rig::new();
    rig.online();
    let ctx = rig.ctx();
    let outcome = rig
        .app
        .dispatch_settings(config::MQTT_ID, &batch(&[("port", "1884")]))
        .unwrap();
    assert_eq!(outcome.code, ResultCode::OkReinit);

    rig.run_secs(1);
    assert!(!ctx.state.mqtt_connected());
    let grace = u64::from(config::MQTT_RECONNECT_SECS) + 3;
    assert!(rig.run_until(grace, |_| ctx.state.mqtt_connected()));
    assert_eq!(rig.broker.sessions().len(), 2);
}

#[test]
fn hostname_macros_follow_topic_and_mac() {
    let mut rig = Rig::new();
    rig.ctx()
        .settings
        .set_string(config::MQTT_ID, config::MQTT_TOPIC_OPTION, "kitchen")
        .unwrap();
    rig.online();
    assert_eq!(rig.radio.requests()[0].hostname, "kitchen-7882");
    assert_eq!(rig.broker.payloads("tele/kitchen/LWT"), ["Online"]);
}

#[test]
fn exported_configuration_restores_another_device() {
    let mut source = Rig::new();
    source.start();
    source.app.route_command("mqtt port 1884");
    source.app.route_command("mqtt topic porch");
    source.app.route_command("wifi ssid2 backup");
    source.app.route_command("sleeptime 30");
    let archive = source.app.export_all();

    let mut target = Rig::new();
    target.start();
    let bytes = archive.as_bytes();
    assert!(target.app.upload_begin(config::CORE_ID, "config", bytes.len()).is_success());
    for chunk in bytes.chunks(64) {
        assert!(target.app.upload_block(config::CORE_ID, chunk).is_success());
    }
    assert!(target.app.upload_end(config::CORE_ID, true).is_success());
    target.app.drain_requests();

    assert_eq!(target.app.export(config::MQTT_ID), source.app.export(config::MQTT_ID));
    assert_eq!(target.app.export(config::WIFI_ID), source.app.export(config::WIFI_ID));
    assert_eq!(target.ctx().settings.sleep_time_ms(), 30);
}

#[test]
fn malformed_configuration_upload_is_rejected() {
    let mut rig = Rig::new();
    rig.start();
    let body = b"not json at all";
    assert!(rig.app.upload_begin(config::CORE_ID, "config", body.len()).is_success());
    assert!(rig.app.upload_block(config::CORE_ID, body).is_success());
    assert!(rig.app.upload_end(config::CORE_ID, true).is_error());
    assert_eq!(rig.app.drain_requests(), 0);
}
