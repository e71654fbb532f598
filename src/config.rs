//! Merged runtime configuration.
//!
//! All settings are resolved once at startup (command line > config file >
//! built-in default) into an immutable [`AppConfig`] that is shared by
//! reference with every component. Nothing reads ambient globals after that.

use std::path::PathBuf;

use log::{debug, warn};

/// Default HTTP port advertised to DVR clients.
pub const DEFAULT_PORT: u16 = 6095;
/// Default directory holding the channel catalog and generated artifacts.
pub const DEFAULT_DATA_DIR: &str = "/data";
/// Default channel catalog filename inside the data directory.
pub const DEFAULT_CATALOG: &str = "channels.xml";

/// Defaults for the emulated tuner identity.
pub const DEFAULT_FRIENDLY_NAME: &str = "webtuner-proxy";
pub const DEFAULT_MANUFACTURER: &str = "Silicondust";
pub const DEFAULT_MODEL: &str = "HDTC-2US";
pub const DEFAULT_FIRMWARE_NAME: &str = "hdhomerun3_atsc";
pub const DEFAULT_FIRMWARE_VERSION: &str = "20200101";
pub const DEFAULT_TUNER_COUNT: u32 = 2;

/// Default external tool names, resolved through `PATH`.
pub const DEFAULT_STREAMLINK: &str = "streamlink";
pub const DEFAULT_YTDLP: &str = "yt-dlp";

/// Fully merged, immutable runtime configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Host/IP advertised in the base URL, playlists, and SSDP responses.
    pub host: String,
    /// HTTP listen port.
    pub port: u16,
    /// Directory holding the channel catalog and generated artifacts.
    pub data_dir: PathBuf,
    /// Explicit device id override (8 hex digits). Derived when unset.
    pub device_id: Option<String>,
    /// Friendly name reported to DVR clients.
    pub friendly_name: String,
    /// Advertised tuner count.
    pub tuner_count: u32,
    pub manufacturer: String,
    pub model: String,
    pub firmware_name: String,
    pub firmware_version: String,
    /// Path to the streamlink executable.
    pub streamlink: String,
    /// Path to the yt-dlp executable.
    pub ytdlp: String,
}

impl AppConfig {
    /// Base URL other components embed into lineups, playlists, and SSDP
    /// payloads.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Path to the default channel catalog.
    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join(DEFAULT_CATALOG)
    }
}

/// Determine the host/IP to advertise when none was configured.
///
/// Falls back to the loopback address when no usable interface is found,
/// which at least keeps the HTTP API reachable locally.
pub fn detect_host() -> String {
    match local_ip_address::local_ip() {
        Ok(ip) => {
            debug!("Autodetected local IP address: {}", ip);
            ip.to_string()
        }
        Err(e) => {
            warn!(
                "Failed to autodetect local IP address ({}), falling back to 127.0.0.1; \
                 set HOST_IP for LAN discovery to work",
                e
            );
            "127.0.0.1".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> AppConfig {
        AppConfig {
            host: "192.168.1.50".to_string(),
            port: 6095,
            data_dir: PathBuf::from("/data"),
            device_id: None,
            friendly_name: DEFAULT_FRIENDLY_NAME.to_string(),
            tuner_count: DEFAULT_TUNER_COUNT,
            manufacturer: DEFAULT_MANUFACTURER.to_string(),
            model: DEFAULT_MODEL.to_string(),
            firmware_name: DEFAULT_FIRMWARE_NAME.to_string(),
            firmware_version: DEFAULT_FIRMWARE_VERSION.to_string(),
            streamlink: DEFAULT_STREAMLINK.to_string(),
            ytdlp: DEFAULT_YTDLP.to_string(),
        }
    }

    #[test]
    fn base_url_formats_host_and_port() {
        let config = sample_config();
        assert_eq!(config.base_url(), "http://192.168.1.50:6095");
    }

    #[test]
    fn catalog_path_is_under_data_dir() {
        let config = sample_config();
        assert_eq!(config.catalog_path(), PathBuf::from("/data/channels.xml"));
    }
}
