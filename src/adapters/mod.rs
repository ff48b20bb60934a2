//! Adapters: concrete implementations of the port traits.
//!
//! | Adapter     | Implements      | Connects to                    |
//! |-------------|-----------------|--------------------------------|
//! | `nvs`       | StoragePort     | NVS / in-memory store          |
//! | `time`      | Clock, DelayNs  | ESP32 system timer / FreeRTOS  |
//! | `wifi`      | WifiRadio       | ESP-IDF WiFi STA + soft-AP     |
//! | `mqtt`      | MqttTransport   | ESP-IDF MQTT client            |
//! | `log_sink`  | log::Log        | Console + in-memory ring       |
//! | `device_id` |                 | eFuse factory MAC              |
//!
//! Every adapter has a host simulation behind `not(target_os = "espidf")`.

pub mod device_id;
pub mod log_sink;
pub mod mqtt;
pub mod nvs;
pub mod time;
pub mod wifi;
