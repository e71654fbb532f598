//! webtuner-proxy: virtual HDHomeRun tuner for internet live streams.
//!
//! Emulates an HDHomeRun network tuner so DVR software (Plex, Emby, Channels)
//! can record web live streams as if they were broadcast channels.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};

mod catalog;
mod config;
mod device;
mod epg;
mod logging;
mod playlist;
mod resolver;
mod ssdp;
mod stream;
mod web;

use config::AppConfig;
use device::DeviceIdentity;
use resolver::Resolver;
use web::state::{AppState, SessionRegistry};

/// webtuner-proxy - virtual HDHomeRun tuner for internet live streams
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host/IP advertised to DVR clients (autodetected when unset)
    #[arg(long, env = "HOST_IP")]
    host: Option<String>,

    /// HTTP listen port
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Directory holding the channel catalog and generated artifacts
    #[arg(short, long, env = "DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Device id override (8 hex digits, derived from the host when unset)
    #[arg(long, env = "HDHR_DEVICE_ID")]
    device_id: Option<String>,

    /// Friendly name reported to DVR clients
    #[arg(long, env = "HDHR_FRIENDLY_NAME")]
    friendly_name: Option<String>,

    /// Advertised tuner count
    #[arg(long, env = "HDHR_TUNER_COUNT")]
    tuner_count: Option<u32>,

    #[arg(long, env = "HDHR_MANUFACTURER", hide = true)]
    manufacturer: Option<String>,

    #[arg(long, env = "HDHR_MODEL", hide = true)]
    model: Option<String>,

    #[arg(long, env = "HDHR_FIRMWARE", hide = true)]
    firmware_name: Option<String>,

    #[arg(long, env = "HDHR_FIRMWARE_VERSION", hide = true)]
    firmware_version: Option<String>,

    /// Path to the streamlink executable
    #[arg(long)]
    streamlink: Option<String>,

    /// Path to the yt-dlp executable
    #[arg(long)]
    ytdlp: Option<String>,

    /// Configuration file path
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Directory where log files are stored
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Number of days to keep log files
    #[arg(long, default_value = "7")]
    log_retention_days: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Configuration file format.
#[derive(Debug, serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    device: DeviceSection,
    #[serde(default)]
    tools: ToolsSection,
    #[serde(default)]
    logging: LoggingSection,
}

#[derive(Debug, serde::Deserialize, Default)]
struct ServerSection {
    host: Option<String>,
    port: Option<u16>,
    data_dir: Option<String>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct DeviceSection {
    device_id: Option<String>,
    friendly_name: Option<String>,
    tuner_count: Option<u32>,
    manufacturer: Option<String>,
    model: Option<String>,
    firmware_name: Option<String>,
    firmware_version: Option<String>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct ToolsSection {
    streamlink: Option<String>,
    ytdlp: Option<String>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct LoggingSection {
    log_dir: Option<String>,
    retention_days: Option<u64>,
}

/// Older deployments configured the data directory as `M3U_DIR`.
fn legacy_data_dir() -> Option<PathBuf> {
    std::env::var("M3U_DIR").ok().map(PathBuf::from)
}

fn load_config(path: &PathBuf) -> Result<ConfigFile, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: ConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

/// Merge command line, config file, and defaults into the runtime config.
fn build_app_config(args: &Args, file: &ConfigFile) -> AppConfig {
    let host = args
        .host
        .clone()
        .or_else(|| file.server.host.clone())
        .unwrap_or_else(config::detect_host);
    let port = args
        .port
        .or(file.server.port)
        .unwrap_or(config::DEFAULT_PORT);
    let data_dir = args
        .data_dir
        .clone()
        .or_else(|| file.server.data_dir.clone().map(PathBuf::from))
        .or_else(legacy_data_dir)
        .unwrap_or_else(|| PathBuf::from(config::DEFAULT_DATA_DIR));

    AppConfig {
        host,
        port,
        data_dir,
        device_id: args.device_id.clone().or_else(|| file.device.device_id.clone()),
        friendly_name: args
            .friendly_name
            .clone()
            .or_else(|| file.device.friendly_name.clone())
            .unwrap_or_else(|| config::DEFAULT_FRIENDLY_NAME.to_string()),
        tuner_count: args
            .tuner_count
            .or(file.device.tuner_count)
            .unwrap_or(config::DEFAULT_TUNER_COUNT),
        manufacturer: args
            .manufacturer
            .clone()
            .or_else(|| file.device.manufacturer.clone())
            .unwrap_or_else(|| config::DEFAULT_MANUFACTURER.to_string()),
        model: args
            .model
            .clone()
            .or_else(|| file.device.model.clone())
            .unwrap_or_else(|| config::DEFAULT_MODEL.to_string()),
        firmware_name: args
            .firmware_name
            .clone()
            .or_else(|| file.device.firmware_name.clone())
            .unwrap_or_else(|| config::DEFAULT_FIRMWARE_NAME.to_string()),
        firmware_version: args
            .firmware_version
            .clone()
            .or_else(|| file.device.firmware_version.clone())
            .unwrap_or_else(|| config::DEFAULT_FIRMWARE_VERSION.to_string()),
        streamlink: args
            .streamlink
            .clone()
            .or_else(|| file.tools.streamlink.clone())
            .unwrap_or_else(|| config::DEFAULT_STREAMLINK.to_string()),
        ytdlp: args
            .ytdlp
            .clone()
            .or_else(|| file.tools.ytdlp.clone())
            .unwrap_or_else(|| config::DEFAULT_YTDLP.to_string()),
    }
}

/// Regenerate playlist and EPG artifacts for the default catalog, if present.
fn refresh_artifacts(config: &AppConfig) {
    let catalog_path = config.catalog_path();
    if !catalog_path.is_file() {
        info!(
            "No channel catalog at {}, skipping artifact generation",
            catalog_path.display()
        );
        return;
    }

    let base_url = config.base_url();
    let m3u_path = config.data_dir.join("channels.m3u");
    match playlist::generate(&catalog_path, &m3u_path, &base_url) {
        Ok(_) => {}
        Err(e) => warn!("Playlist generation failed: {}", e),
    }
    let epg_path = config.data_dir.join("channels_epg.xml");
    match epg::generate(&catalog_path, &epg_path, &base_url) {
        Ok(_) => {}
        Err(e) => warn!("EPG generation failed: {}", e),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load config file: explicit path > auto-detect > default
    let config_path = args.config.clone().or_else(|| {
        let default_path = PathBuf::from("webtuner-proxy.toml");
        if default_path.exists() {
            Some(default_path)
        } else {
            None
        }
    });
    let file_config = if let Some(config_path) = &config_path {
        match load_config(config_path) {
            Ok(c) => {
                eprintln!("Loaded config from: {}", config_path.display());
                c
            }
            Err(e) => {
                eprintln!("Failed to load config file: {}", e);
                return Err(e);
            }
        }
    } else {
        ConfigFile::default()
    };

    // Merge logging configs (command line takes precedence)
    let log_dir = if args.log_dir.to_string_lossy() != "logs" {
        args.log_dir.clone()
    } else {
        PathBuf::from(file_config.logging.log_dir.as_deref().unwrap_or("logs"))
    };
    let log_retention_days = if args.log_retention_days != 7 {
        args.log_retention_days
    } else {
        file_config.logging.retention_days.unwrap_or(7)
    };
    logging::init_logging(&log_dir, log_retention_days, args.verbose)?;

    let config = Arc::new(build_app_config(&args, &file_config));
    let identity = Arc::new(DeviceIdentity::new(&config));

    info!("webtuner-proxy starting...");
    info!("  Base URL:      {}", identity.base_url);
    info!("  Device ID:     {}", identity.device_id);
    info!("  Friendly name: {}", identity.friendly_name);
    info!("  Tuner count:   {}", identity.tuner_count);
    info!("  Data dir:      {}", config.data_dir.display());
    info!("  Tools:         {} / {}", config.streamlink, config.ytdlp);

    refresh_artifacts(&config);

    // SSDP discovery: M-SEARCH responder plus periodic alive notifications.
    ssdp::spawn(Arc::clone(&identity));

    let state = AppState {
        resolver: Arc::new(Resolver::new(&config.streamlink, &config.ytdlp)),
        sessions: Arc::new(SessionRegistry::new()),
        identity,
        config: Arc::clone(&config),
    };

    let listen_addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    if let Err(e) = web::start_web_server(listen_addr, state).await {
        error!("HTTP server error: {}", e);
        return Err(e);
    }
    Ok(())
}
