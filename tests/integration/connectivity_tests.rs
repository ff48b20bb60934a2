//! WiFi and MQTT behaviour of a whole device: connect, fall back, drop
//! and recover, and the command round trip through the broker.

use modhub::config;
use modhub::error::ResultCode;
use modhub::events::{ConnectivityKind, Event, EventKind};

use crate::mock_hw::{Rig, record};

#[test]
fn stored_credentials_bring_up_wifi_then_mqtt() {
    let mut rig = Rig::new();
    let ctx = rig.ctx();
    let events = record(&ctx.bus, EventKind::Connectivity);
    rig.online();

    assert!(ctx.state.wifi_connected());
    assert_eq!(rig.radio.requests()[0].hostname, format!("device-{}", crate::mock_hw::MAC4));
    assert_eq!(rig.broker.sessions()[0].client_id, "modhub_7882");
    assert_eq!(rig.broker.payloads("tele/device/LWT"), ["Online"]);

    let order: Vec<_> = events
        .borrow()
        .iter()
        .filter_map(|e| match e {
            Event::Connectivity { kind, connected: true } => Some(*kind),
            _ => None,
        })
        .collect();
    assert_eq!(order, [ConnectivityKind::Wifi, ConnectivityKind::Mqtt]);
}

#[test]
fn device_info_is_announced_on_connect() {
    let mut rig = Rig::new();
    rig.online();
    let info = rig.broker.payloads("tele/device/core");
    assert!(info.iter().any(|p| p.contains("Info1")));
    assert!(info.iter().any(|p| p.contains("Info2")));
}

#[test]
fn no_credentials_starts_access_point_manager() {
    let mut rig = Rig::new();
    rig.start();
    let ctx = rig.ctx();
    assert!(rig.run_until(5, |_| ctx.state.access_point_active()));
    assert_eq!(rig.radio.access_point().as_deref(), Some(config::WIFI_AP_SSID));
    assert!(!ctx.state.wifi_connected());
    assert!(rig.broker.sessions().is_empty());
}

#[test]
fn broker_command_round_trip() {
    let mut rig = Rig::new();
    rig.online();

    rig.broker.inject("cmnd/device/sleeptime", "20");
    rig.run_secs(1);
    assert_eq!(rig.ctx().settings.sleep_time_ms(), 20);
    let replies = rig.broker.payloads("stat/device/core");
    assert!(replies.iter().any(|p| p.contains(r#""cmd":"sleeptime""#)));

    rig.broker.inject("cmnd/device/wifi", "status");
    rig.run_secs(1);
    let status = rig.broker.payloads("stat/device/wifi");
    assert_eq!(status.len(), 1);
    assert!(status[0].contains(r#""State":"connected""#));
}

#[test]
fn unknown_broker_command_is_answered() {
    let mut rig = Rig::new();
    rig.online();
    rig.broker.inject("cmnd/device/frobnicate", "");
    rig.run_secs(1);
    let replies = rig.broker.payloads("stat/device/core");
    assert!(replies.iter().any(|p| p.contains("frobnicate") && p.contains("Unknown option")));
}

#[test]
fn broker_drop_reconnects_after_interval() {
    let mut rig = Rig::new();
    rig.online();
    let ctx = rig.ctx();

    rig.broker.drop_connection();
    rig.run_secs(1);
    assert!(!ctx.state.mqtt_connected());

    let grace = u64::from(config::MQTT_RECONNECT_SECS) + 3;
    assert!(rig.run_until(grace, |_| ctx.state.mqtt_connected()));
    assert_eq!(rig.broker.sessions().len(), 2);
}

#[test]
fn unreachable_broker_keeps_retrying() {
    let mut rig = Rig::new();
    rig.broker.set_reachable(false);
    rig.radio.add_network("home", "secret99");
    rig.store_wifi("home", "secret99");
    rig.start();
    let ctx = rig.ctx();
    assert!(rig.run_until(15, |_| ctx.state.wifi_connected()));

    rig.run_secs(3 * u64::from(config::MQTT_RECONNECT_SECS));
    assert!(!ctx.state.mqtt_connected());

    rig.broker.set_reachable(true);
    let grace = u64::from(config::MQTT_RECONNECT_SECS) + 3;
    assert!(rig.run_until(grace, |_| ctx.state.mqtt_connected()));
}

#[test]
fn mqtt_does_not_retry_while_wifi_is_down() {
    let mut rig = Rig::new();
    rig.online();
    let ctx = rig.ctx();

    rig.radio.remove_network("home");
    let check = u64::from(config::WIFI_CHECK_SECS) + 2;
    assert!(rig.run_until(check, |_| !ctx.state.wifi_connected()));
    rig.broker.drop_connection();
    rig.run_secs(2 * u64::from(config::MQTT_RECONNECT_SECS));
    assert!(!ctx.state.mqtt_connected());
    assert_eq!(rig.broker.sessions().len(), 1);

    rig.radio.add_network("home", "secret99");
    assert!(rig.run_until(30, |_| ctx.state.wifi_connected()));
    let grace = u64::from(config::MQTT_RECONNECT_SECS) + 3;
    assert!(rig.run_until(grace, |_| ctx.state.mqtt_connected()));
    assert_eq!(rig.broker.sessions().len(), 2);
}

#[test]
fn credentials_change_under_manager_fallback_opens_access_point() {
    let mut rig = Rig::new();
    rig.store_wifi("old", "password1");
    rig.start();
    rig.run_secs(6);
    assert_eq!(rig.radio.access_point(), None);

    let entries = vec![("ssid1".to_owned(), "home".to_owned())];
    let outcome = rig.app.dispatch_settings(config::WIFI_ID, &entries).unwrap();
    assert_eq!(outcome.code, ResultCode::OkReinit);
    let ctx = rig.ctx();
    assert!(rig.run_until(5, |_| ctx.state.access_point_active()));
}

#[test]
fn new_credentials_reconfigure_the_link() {
    let mut rig = Rig::new();
    rig.radio.add_network("home", "secret99");
    rig.store_wifi("old", "password1");
    rig.ctx()
        .settings
        .set_byte(config::WIFI_ID, "cfgmethod", config::ConfigMethod::Retry.to_byte())
        .unwrap();
    rig.start();
    let ctx = rig.ctx();
    rig.run_secs(6);
    assert!(!ctx.state.wifi_connected());

    let entries = vec![
        ("ssid1".to_owned(), "home".to_owned()),
        ("pwd1".to_owned(), "secret99".to_owned()),
    ];
    let outcome = rig.app.dispatch_settings(config::WIFI_ID, &entries).unwrap();
    assert!(outcome.is_success());
    assert!(rig.run_until(20, |_| ctx.state.wifi_connected()));
    assert_eq!(rig.radio.requests().last().unwrap().ssid, "home");
}
