//! WiFi radio adapter.
//!
//! Implements [`WifiRadio`], the boundary the WiFi state machine drives.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: [`EspRadio`] over `esp_idf_svc::wifi::EspWifi`.
//!   `connect` only starts the association; the state machine polls the
//!   link on its next check.
//! - **all other targets**: [`SimRadio`], a scripted radio with a table of
//!   reachable networks.  Clones share state so a test can change the
//!   environment while the state machine owns the radio.

use std::cell::RefCell;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::rc::Rc;

use log::{debug, info};

use crate::app::ports::{LinkInfo, LinkStatus, RadioError, StationRequest, WifiRadio};

// ───────────────────────────────────────────────────────────────
// Validation
// ───────────────────────────────────────────────────────────────

fn validate(request: &StationRequest) -> Result<(), RadioError> {
    if request.ssid.is_empty() || request.ssid.len() > 32 {
        return Err(RadioError::InvalidSsid);
    }
    if request.password.len() > 64 {
        return Err(RadioError::InvalidPassword);
    }
    Ok(())
}

// ───────────────────────────────────────────────────────────────
// Simulation radio
// ───────────────────────────────────────────────────────────────

const SIM_MAC: [u8; 6] = [0x02, 0x00, 0x5e, 0x10, 0x78, 0x82];
const SIM_BSSID: [u8; 6] = [0x02, 0x00, 0x5e, 0x10, 0x00, 0x01];
const SIM_CHANNEL: u8 = 6;
const SIM_RSSI: i8 = -58;

#[derive(Default)]
struct SimState {
    /// ssid → password
    networks: HashMap<String, String>,
    status: Option<LinkStatus>,
    ip: bool,
    access_point: Option<String>,
    stations: usize,
    requests: Vec<StationRequest>,
}

/// Host-side radio.  Association completes immediately when the SSID is
/// known and the password matches.
#[derive(Clone, Default)]
pub struct SimRadio {
    state: Rc<RefCell<SimState>>,
}

impl SimRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a network reachable.
    #[must_use]
    pub fn with_network(self, ssid: &str, password: &str) -> Self {
        self.add_network(ssid, password);
        self
    }

    pub fn add_network(&self, ssid: &str, password: &str) {
        self.state
            .borrow_mut()
            .networks
            .insert(ssid.into(), password.into());
    }

    /// Take a network away.  An associated station drops its link.
    pub fn remove_network(&self, ssid: &str) {
        let mut s = self.state.borrow_mut();
        s.networks.remove(ssid);
        let associated = s.requests.last().is_some_and(|r| r.ssid == ssid);
        if associated && s.status == Some(LinkStatus::Connected) {
            s.status = Some(LinkStatus::Disconnected);
            s.ip = false;
        }
    }

    pub fn set_station_count(&self, stations: usize) {
        self.state.borrow_mut().stations = stations;
    }

    /// Every connect request seen, oldest first.
    pub fn requests(&self) -> Vec<StationRequest> {
        self.state.borrow().requests.clone()
    }

    /// SSID of the soft-AP while it is up.
    pub fn access_point(&self) -> Option<String> {
        self.state.borrow().access_point.clone()
    }
}

impl WifiRadio for SimRadio {
    fn connect(&mut self, request: &StationRequest) -> Result<(), RadioError> {
        validate(request)?;
        let mut s = self.state.borrow_mut();
        s.requests.push(request.clone());
        let status = match s.networks.get(&request.ssid) {
            None => LinkStatus::NoSsidAvailable,
            Some(pwd) if *pwd != request.password => LinkStatus::ConnectFailed,
            Some(_) => LinkStatus::Connected,
        };
        debug!("WiFi(sim): '{}' -> {:?}", request.ssid, status);
        s.ip = status == LinkStatus::Connected;
        s.status = Some(status);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), RadioError> {
        let mut s = self.state.borrow_mut();
        s.status = Some(LinkStatus::Disconnected);
        s.ip = false;
        Ok(())
    }

    fn link_status(&self) -> LinkStatus {
        self.state.borrow().status.unwrap_or(LinkStatus::Idle)
    }

    fn has_ip(&self) -> bool {
        self.state.borrow().ip
    }

    fn start_access_point(&mut self, ssid: &str, _password: &str) -> Result<(), RadioError> {
        if ssid.is_empty() || ssid.len() > 32 {
            return Err(RadioError::InvalidSsid);
        }
        info!("WiFi(sim): access point '{}' up", ssid);
        self.state.borrow_mut().access_point = Some(ssid.into());
        Ok(())
    }

    fn stop_access_point(&mut self) -> Result<(), RadioError> {
        let mut s = self.state.borrow_mut();
        s.access_point = None;
        s.stations = 0;
        Ok(())
    }

    fn station_count(&self) -> usize {
        let s = self.state.borrow();
        if s.access_point.is_some() { s.stations } else { 0 }
    }

    /// DHCP leases come from 192.168.1.0/24 with the gateway as DNS.
    fn link_info(&self) -> Option<LinkInfo> {
        let s = self.state.borrow();
        if s.status != Some(LinkStatus::Connected) || !s.ip {
            return None;
        }
        let request = s.requests.last()?;
        let gateway = Ipv4Addr::new(192, 168, 1, 1);
        let (address, netmask, gateway, dns) = match request.static_ip {
            Some(ip) => (ip.address, ip.netmask, ip.gateway, ip.dns),
            None => (
                Ipv4Addr::new(192, 168, 1, 100),
                Ipv4Addr::new(255, 255, 255, 0),
                gateway,
                gateway,
            ),
        };
        Some(LinkInfo {
            ssid: request.ssid.clone(),
            bssid: SIM_BSSID,
            channel: SIM_CHANNEL,
            rssi: SIM_RSSI,
            address,
            netmask,
            gateway,
            dns,
            mac: SIM_MAC,
        })
    }
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF radio
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub use esp::EspRadio;

#[cfg(target_os = "espidf")]
mod esp {
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::hal::modem::Modem;
    use esp_idf_svc::ipv4::{
        self, ClientConfiguration as IpClientConfiguration, ClientSettings, Mask, Subnet,
    };
    use esp_idf_svc::netif::{EspNetif, NetifConfiguration, NetifStack};
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use esp_idf_svc::sys::{
        ESP_OK, EspError, esp_wifi_ap_get_sta_list, esp_wifi_sta_get_ap_info, wifi_ap_record_t,
        wifi_sta_list_t,
    };
    use esp_idf_svc::wifi::{
        AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi,
    };
    use log::warn;

    use super::validate;
    use crate::app::ports::{LinkInfo, LinkStatus, RadioError, StationRequest, WifiRadio};

    fn driver(e: EspError) -> RadioError {
        warn!("WiFi: driver error {}", e);
        RadioError::Driver
    }

    fn prefix_len(mask: std::net::Ipv4Addr) -> u8 {
        u32::from(mask).count_ones() as u8
    }

    fn mask_addr(bits: u8) -> std::net::Ipv4Addr {
        let bits = u32::from(bits.min(32));
        std::net::Ipv4Addr::from(u32::MAX.checked_shl(32 - bits).unwrap_or(0))
    }

    pub struct EspRadio {
        wifi: EspWifi<'static>,
        client: Option<ClientConfiguration>,
        attempted: bool,
    }

    impl EspRadio {
        pub fn new(
            modem: Modem,
            sysloop: EspSystemEventLoop,
            nvs: Option<EspDefaultNvsPartition>,
        ) -> Result<Self, EspError> {
            Ok(Self {
                wifi: EspWifi::new(modem, sysloop, nvs)?,
                client: None,
                attempted: false,
            })
        }

        fn apply_addressing(&mut self, request: &StationRequest) -> Result<(), EspError> {
            let ip_configuration = match request.static_ip {
                Some(ip) => IpClientConfiguration::Fixed(ClientSettings {
                    ip: ip.address,
                    subnet: Subnet {
                        gateway: ip.gateway,
                        mask: Mask(prefix_len(ip.netmask)),
                    },
                    dns: Some(ip.dns),
                    secondary_dns: None,
                }),
                None => IpClientConfiguration::DHCP(ipv4::DHCPClientSettings {
                    hostname: request.hostname.as_str().try_into().ok(),
                }),
            };
            let netif = EspNetif::new_with_conf(&NetifConfiguration {
                ip_configuration: Some(ipv4::Configuration::Client(ip_configuration)),
                stack: NetifStack::Sta,
                ..NetifConfiguration::wifi_default_client()
            })?;
            self.wifi.swap_netif_sta(netif)?;
            Ok(())
        }
    }

    impl WifiRadio for EspRadio {
        fn connect(&mut self, request: &StationRequest) -> Result<(), RadioError> {
            validate(request)?;
            let client = ClientConfiguration {
                ssid: request
                    .ssid
                    .as_str()
                    .try_into()
                    .map_err(|_| RadioError::InvalidSsid)?,
                password: request
                    .password
                    .as_str()
                    .try_into()
                    .map_err(|_| RadioError::InvalidPassword)?,
                auth_method: if request.password.is_empty() {
                    AuthMethod::None
                } else {
                    AuthMethod::WPA2Personal
                },
                ..Default::default()
            };
            self.apply_addressing(request).map_err(driver)?;
            self.wifi
                .set_configuration(&Configuration::Client(client.clone()))
                .map_err(driver)?;
            self.client = Some(client);
            if !self.wifi.is_started().map_err(driver)? {
                self.wifi.start().map_err(driver)?;
            }
            self.attempted = true;
            self.wifi.connect().map_err(driver)
        }

        fn disconnect(&mut self) -> Result<(), RadioError> {
            if self.wifi.is_connected().unwrap_or(false) {
                self.wifi.disconnect().map_err(driver)?;
            }
            Ok(())
        }

        fn link_status(&self) -> LinkStatus {
            match self.wifi.is_connected() {
                Ok(true) => LinkStatus::Connected,
                Ok(false) if self.attempted => LinkStatus::Disconnected,
                _ => LinkStatus::Idle,
            }
        }

        fn has_ip(&self) -> bool {
            self.wifi
                .sta_netif()
                .get_ip_info()
                .is_ok_and(|info| !info.ip.is_unspecified())
        }

        fn start_access_point(&mut self, ssid: &str, password: &str) -> Result<(), RadioError> {
            let ap = AccessPointConfiguration {
                ssid: ssid.try_into().map_err(|_| RadioError::InvalidSsid)?,
                password: password
                    .try_into()
                    .map_err(|_| RadioError::InvalidPassword)?,
                auth_method: AuthMethod::WPA2Personal,
                ..Default::default()
            };
            let cfg = match &self.client {
                Some(client) => Configuration::Mixed(client.clone(), ap),
                None => Configuration::AccessPoint(ap),
            };
            self.wifi.set_configuration(&cfg).map_err(driver)?;
            if !self.wifi.is_started().map_err(driver)? {
                self.wifi.start().map_err(driver)?;
            }
            Ok(())
        }

        fn stop_access_point(&mut self) -> Result<(), RadioError> {
            let cfg = match &self.client {
                Some(client) => Configuration::Client(client.clone()),
                None => Configuration::None,
            };
            self.wifi.set_configuration(&cfg).map_err(driver)
        }

        fn station_count(&self) -> usize {
            // SAFETY: zeroed is a valid empty list; the call fills it.
            let mut list: wifi_sta_list_t = unsafe { core::mem::zeroed() };
            if unsafe { esp_wifi_ap_get_sta_list(&mut list) } == ESP_OK {
                list.num as usize
            } else {
                0
            }
        }

        fn link_info(&self) -> Option<LinkInfo> {
            if !self.wifi.is_connected().unwrap_or(false) {
                return None;
            }
            // SAFETY: zeroed is a valid record; the call fills it.
            let mut record: wifi_ap_record_t = unsafe { core::mem::zeroed() };
            if unsafe { esp_wifi_sta_get_ap_info(&mut record) } != ESP_OK {
                return None;
            }
            let netif = self.wifi.sta_netif();
            let ip = netif.get_ip_info().ok()?;
            let ssid_len = record.ssid.iter().position(|b| *b == 0).unwrap_or(record.ssid.len());
            Some(LinkInfo {
                ssid: String::from_utf8_lossy(&record.ssid[..ssid_len]).into_owned(),
                bssid: record.bssid,
                channel: record.primary,
                rssi: record.rssi,
                address: ip.ip,
                netmask: mask_addr(ip.subnet.mask.0),
                gateway: ip.subnet.gateway,
                dns: ip.dns.unwrap_or(std::net::Ipv4Addr::UNSPECIFIED),
                mac: netif.get_mac().unwrap_or_default(),
            })
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
