//! Device identity derived from the ESP32 factory MAC address.
//!
//! The `#MAC4` settings macro expands to a 13-bit number taken from the
//! last two MAC bytes, so hostnames and client ids such as `device-7882`
//! stay stable across reboots and firmware updates.

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    // SAFETY: the buffer is the 6 bytes the call writes.
    unsafe {
        esp_idf_sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

/// Little-endian value of bytes 4 and 5, masked to 13 bits.
pub fn mac4_suffix(mac: &MacAddress) -> u16 {
    (u16::from(mac[4]) | (u16::from(mac[5]) << 8)) & 0x1FFF
}
