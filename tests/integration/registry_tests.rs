//! Registry lifecycle through the service: start order, optional
//! components toggled by `core` options, and subscription hygiene.

use modhub::adapters::log_sink::LogRing;
use modhub::adapters::mqtt::SimTransport;
use modhub::adapters::nvs::NvsAdapter;
use modhub::adapters::wifi::SimRadio;
use modhub::components::BuiltinFactory;
use modhub::config;
use modhub::settings::Settings;

use crate::mock_hw::{MAC4, Sensor, Rig};

fn fresh_settings() -> Settings {
    Settings::new(Box::new(NvsAdapter::new().unwrap()), MAC4)
}

#[test]
fn modules_lists_newest_first() {
    let mut rig = Rig::new();
    rig.start();
    let outcome = rig.app.route_command("modules").unwrap();
    assert_eq!(
        outcome.detail,
        r#"{"modules":["sensor","mqtt","wifi","log","core"]}"#
    );
}

#[test]
fn optional_component_is_toggled_by_core_option() {
    let mut rig = Rig::new();
    rig.start();
    assert_eq!(rig.sensors.get(), 1);

    assert!(rig.app.route_command("core sensor false").unwrap().is_success());
    rig.app.run_once();
    assert_eq!(rig.sensors.get(), 0);
    assert!(!rig.app.registry().contains("sensor"));
    assert!(!rig.ctx().state.components().iter().any(|id| id == "sensor"));

    // unchanged value queues nothing
    rig.app.route_command("core sensor false");
    assert_eq!(rig.app.drain_requests(), 0);

    rig.app.route_command("core sensor true");
    rig.app.run_once();
    assert_eq!(rig.sensors.get(), 1);
}

#[test]
fn disabled_optional_stays_off_after_reboot() {
    let settings = fresh_settings();
    let mut first = Rig::with_settings(settings.clone());
    first.start();
    first.app.route_command("core sensor false");
    first.app.run_once();
    drop(first);

    let mut second = Rig::with_settings(settings);
    second.start();
    assert!(!second.app.registry().contains("sensor"));
    assert_eq!(second.app.registry().len(), 4);
}

#[test]
#[should_panic(expected = "live bus subscriptions")]
fn removal_with_leaked_subscription_panics() {
    let mut rig = Rig::build(fresh_settings(), SimRadio::new(), true);
    rig.start();
    rig.app.route_command("core sensor false");
    rig.app.drain_requests();
}

#[test]
fn duplicate_and_unknown_adds_are_ignored() {
    let mut rig = Rig::new();
    rig.start();
    let before = rig.app.registry().len();
    assert!(!rig.app.registry_mut().add(config::CORE_ID));
    assert!(!rig.app.registry_mut().add("ghost"));
    assert_eq!(rig.app.registry().len(), before);
}

#[test]
fn builtin_ids_cannot_be_optional() {
    let factory = BuiltinFactory::new(
        || Box::new(SimRadio::new()),
        || Box::new(SimTransport::new()),
        LogRing::new(4),
    )
    .with_optional(config::WIFI_ID, |id, ctx| {
        Box::new(Sensor::new(id, ctx, Default::default(), false))
    })
    .with_optional("sensor", |id, ctx| {
        Box::new(Sensor::new(id, ctx, Default::default(), false))
    });
    let ids: Vec<String> = factory.optional_ids().iter().map(ToString::to_string).collect();
    assert_eq!(ids, ["sensor"]);
}

#[test]
fn removed_component_no_longer_receives_commands() {
    let mut rig = Rig::new();
    rig.start();
    rig.app.route_command("core sensor false");
    rig.app.run_once();
    // with `sensor` gone the whole text goes to core, where `sensor` is an option
    let outcome = rig.app.route_command("sensor").unwrap();
    assert_eq!(outcome.detail, "false");
}
