//! Emulated tuner device identity.
//!
//! Built once at startup from [`AppConfig`] and shared read-only with the
//! SSDP loops and the HTTP API.

use crate::config::AppConfig;

/// Static identity of the emulated tuner device.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    /// Stable 8-hex-digit device id.
    pub device_id: String,
    /// Device auth token; mirrors the device id like real units report.
    pub device_auth: String,
    pub friendly_name: String,
    pub manufacturer: String,
    pub model: String,
    pub firmware_name: String,
    pub firmware_version: String,
    pub tuner_count: u32,
    /// HTTP base URL clients should contact.
    pub base_url: String,
}

impl DeviceIdentity {
    pub fn new(config: &AppConfig) -> Self {
        let device_id = config
            .device_id
            .clone()
            .unwrap_or_else(|| derive_device_id(&config.host));
        Self {
            device_auth: device_id.clone(),
            device_id,
            friendly_name: config.friendly_name.clone(),
            manufacturer: config.manufacturer.clone(),
            model: config.model.clone(),
            firmware_name: config.firmware_name.clone(),
            firmware_version: config.firmware_version.clone(),
            tuner_count: config.tuner_count,
            base_url: config.base_url(),
        }
    }
}

/// Derive a stable 8-hex-digit device id from a network identifier.
///
/// FNV-1a over the seed, masked to 32 bits. The same host configuration
/// always yields the same id, so DVR clients keep recognizing the device
/// across restarts.
pub fn derive_device_id(seed: &str) -> String {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = FNV_OFFSET;
    for byte in seed.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    format!("{:08X}", hash & 0xFFFF_FFFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use std::path::PathBuf;

    fn config_with_id(device_id: Option<&str>) -> AppConfig {
        AppConfig {
            host: "10.0.0.7".to_string(),
            port: 6095,
            data_dir: PathBuf::from("/data"),
            device_id: device_id.map(str::to_string),
            friendly_name: config::DEFAULT_FRIENDLY_NAME.to_string(),
            tuner_count: config::DEFAULT_TUNER_COUNT,
            manufacturer: config::DEFAULT_MANUFACTURER.to_string(),
            model: config::DEFAULT_MODEL.to_string(),
            firmware_name: config::DEFAULT_FIRMWARE_NAME.to_string(),
            firmware_version: config::DEFAULT_FIRMWARE_VERSION.to_string(),
            streamlink: config::DEFAULT_STREAMLINK.to_string(),
            ytdlp: config::DEFAULT_YTDLP.to_string(),
        }
    }

    #[test]
    fn derived_id_is_stable_and_8_hex_digits() {
        let a = derive_device_id("10.0.0.7");
        let b = derive_device_id("10.0.0.7");
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_seeds_yield_different_ids() {
        assert_ne!(derive_device_id("10.0.0.7"), derive_device_id("10.0.0.8"));
    }

    #[test]
    fn explicit_override_wins() {
        let identity = DeviceIdentity::new(&config_with_id(Some("DEADBEEF")));
        assert_eq!(identity.device_id, "DEADBEEF");
        assert_eq!(identity.device_auth, "DEADBEEF");
    }

    #[test]
    fn identity_carries_base_url() {
        let identity = DeviceIdentity::new(&config_with_id(None));
        assert_eq!(identity.base_url, "http://10.0.0.7:6095");
        assert_eq!(identity.tuner_count, 2);
    }
}
