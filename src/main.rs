//! modhub firmware entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  NvsAdapter     MonotonicClock   EspRadio     EspTransport     │
//! │  (StoragePort)  (Clock)          (WifiRadio)  (MqttTransport)  │
//! │  RingLogger     TaskDelay                                      │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │  AppService                                            │    │
//! │  │  Registry · Scheduler · MessageBus · Settings          │    │
//! │  │  core · log · wifi · mqtt                              │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```

use anyhow::{Context as _, Result};
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use log::{info, warn};

use modhub::adapters::log_sink::{self, LogRing};
use modhub::adapters::mqtt::EspTransport;
use modhub::adapters::nvs::NvsAdapter;
use modhub::adapters::time::{MonotonicClock, TaskDelay};
use modhub::adapters::wifi::{EspRadio, SimRadio};
use modhub::adapters::device_id;
use modhub::app::ports::WifiRadio;
use modhub::app::service::AppService;
use modhub::component::Context;
use modhub::components::BuiltinFactory;
use modhub::components::core::level_filter;
use modhub::events::MessageBus;
use modhub::settings::Settings;
use modhub::state::SystemState;
use modhub::{config, diagnostics};

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();

    let ring = LogRing::new(config::LOG_MAX_LINES);
    log_sink::install(ring.clone(), level_filter(config::DEFAULT_LOG_LEVEL))
        .map_err(|e| anyhow::anyhow!("logger install failed: {}", e))?;
    diagnostics::install_panic_handler();

    info!("╔══════════════════════════════════════╗");
    info!("║  {} v{}                         ║", config::PROJECT_NAME, config::VERSION);
    info!("╚══════════════════════════════════════╝");

    // ── 2. Settings store ─────────────────────────────────────
    let nvs = NvsAdapter::new().map_err(|e| anyhow::anyhow!("NVS init failed: {}", e))?;
    let mac = device_id::read_mac();
    let suffix = device_id::mac4_suffix(&mac);
    info!("Device: MAC {:02X?} (#MAC4 = {})", mac, suffix);
    let settings = Settings::new(Box::new(nvs), suffix);

    // ── 3. Radio and broker adapters ──────────────────────────
    let peripherals = Peripherals::take().context("peripherals already taken")?;
    let sysloop = EspSystemEventLoop::take().context("system event loop unavailable")?;
    let nvs_partition = EspDefaultNvsPartition::take().ok();
    let mut radio = Some(
        EspRadio::new(peripherals.modem, sysloop, nvs_partition)
            .context("WiFi driver init failed")?,
    );

    // The modem can be handed out once; a rebuilt wifi component gets an
    // inert radio.
    let factory = BuiltinFactory::new(
        move || match radio.take() {
            Some(r) => Box::new(r) as Box<dyn WifiRadio>,
            None => {
                warn!("WiFi: radio already owned, using an inert one");
                Box::new(SimRadio::new())
            }
        },
        || Box::new(EspTransport::new()),
        ring,
    );

    // ── 4. Application service ────────────────────────────────
    let ctx = Context::new(MessageBus::new(), settings, SystemState::new());
    let mut app = AppService::new(factory, ctx, MonotonicClock::new(), TaskDelay);
    app.start(&[config::CORE_ID, config::LOG_ID, config::WIFI_ID, config::MQTT_ID]);
    info!("System ready. Entering main loop.");

    // ── 5. Main loop ──────────────────────────────────────────
    loop {
        app.run_once();
        if app.restart_requested() {
            warn!("Restarting");
            log::logger().flush();
            // SAFETY: does not return; the chip resets.
            unsafe { esp_idf_sys::esp_restart() };
        }
    }
}
