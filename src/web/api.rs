//! HTTP endpoints: HDHomeRun emulation, stream proxy, and artifact
//! generation/serving.

use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, Path, Query, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use log::{error, info, warn};
use quick_xml::escape::escape;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::catalog::{self, CatalogError};
use crate::config::DEFAULT_CATALOG;
use crate::epg;
use crate::playlist;
use crate::resolver::ResolveError;
use crate::stream;
use crate::web::state::AppState;

// ============================================================================
// Response documents
// ============================================================================

/// HDHomeRun device descriptor, as DVR clients expect it.
#[derive(Debug, Serialize)]
pub struct DiscoverResponse {
    #[serde(rename = "FriendlyName")]
    pub friendly_name: String,
    #[serde(rename = "Manufacturer")]
    pub manufacturer: String,
    #[serde(rename = "ModelNumber")]
    pub model_number: String,
    #[serde(rename = "FirmwareName")]
    pub firmware_name: String,
    #[serde(rename = "FirmwareVersion")]
    pub firmware_version: String,
    #[serde(rename = "DeviceID")]
    pub device_id: String,
    #[serde(rename = "DeviceAuth")]
    pub device_auth: String,
    #[serde(rename = "BaseURL")]
    pub base_url: String,
    #[serde(rename = "LineupURL")]
    pub lineup_url: String,
    #[serde(rename = "TunerCount")]
    pub tuner_count: u32,
}

/// One lineup entry.
#[derive(Debug, Serialize)]
pub struct LineupEntry {
    #[serde(rename = "GuideNumber")]
    pub guide_number: String,
    #[serde(rename = "GuideName")]
    pub guide_name: String,
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "Station", skip_serializing_if = "Option::is_none")]
    pub station: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LineupStatus {
    #[serde(rename = "ScanInProgress")]
    pub scan_in_progress: u32,
    #[serde(rename = "ScanPossible")]
    pub scan_possible: u32,
    #[serde(rename = "Source")]
    pub source: &'static str,
    #[serde(rename = "SourceList")]
    pub source_list: [&'static str; 1],
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct XmlQuery {
    pub xml: Option<String>,
}

// ============================================================================
// HDHomeRun emulation endpoints
// ============================================================================

/// Device discovery document; DVR clients poll this to detect the tuner.
pub async fn discover(State(state): State<AppState>) -> Json<DiscoverResponse> {
    let identity = &state.identity;
    Json(DiscoverResponse {
        friendly_name: identity.friendly_name.clone(),
        manufacturer: identity.manufacturer.clone(),
        model_number: identity.model.clone(),
        firmware_name: identity.firmware_name.clone(),
        firmware_version: identity.firmware_version.clone(),
        device_id: identity.device_id.clone(),
        device_auth: identity.device_auth.clone(),
        base_url: identity.base_url.clone(),
        lineup_url: format!("{}/lineup.json", identity.base_url),
        tuner_count: identity.tuner_count,
    })
}

/// Channel lineup in catalog order, each entry pointing at the stream proxy.
pub async fn lineup(State(state): State<AppState>) -> Json<Vec<LineupEntry>> {
    let channels = match catalog::load_catalog(&state.config.catalog_path()) {
        Ok(channels) => channels,
        Err(e) => {
            warn!("Lineup requested but catalog unavailable: {}", e);
            Vec::new()
        }
    };

    let base_url = &state.identity.base_url;
    let entries = channels
        .into_iter()
        .map(|channel| LineupEntry {
            guide_number: channel.channel_number.clone(),
            guide_name: channel.name.clone(),
            url: catalog::stream_url(base_url, &channel.source_url),
            station: (!channel.logo_url.is_empty()).then(|| channel.channel_number.clone()),
        })
        .collect();
    Json(entries)
}

/// Emulated tuners never scan.
pub async fn lineup_status() -> Json<LineupStatus> {
    Json(LineupStatus {
        scan_in_progress: 0,
        scan_possible: 0,
        source: "Cable",
        source_list: ["Cable"],
    })
}

/// Scan trigger: accepted, no-op.
pub async fn lineup_post() -> StatusCode {
    StatusCode::OK
}

/// UPnP device descriptor referenced by SSDP responses.
pub async fn device_xml(State(state): State<AppState>) -> impl IntoResponse {
    let identity = &state.identity;
    let body = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
    <specVersion>
        <major>1</major>
        <minor>0</minor>
    </specVersion>
    <URLBase>{base_url}</URLBase>
    <device>
        <deviceType>urn:schemas-upnp-org:device:MediaServer:1</deviceType>
        <friendlyName>{friendly_name}</friendlyName>
        <manufacturer>{manufacturer}</manufacturer>
        <modelName>{model}</modelName>
        <modelNumber>{model}</modelNumber>
        <serialNumber></serialNumber>
        <UDN>uuid:{device_id}</UDN>
    </device>
</root>"#,
        base_url = escape(&identity.base_url),
        friendly_name = escape(&identity.friendly_name),
        manufacturer = escape(&identity.manufacturer),
        model = escape(&identity.model),
        device_id = escape(&identity.device_id),
    );
    ([(CONTENT_TYPE, "application/xml")], body)
}

// ============================================================================
// Stream proxy endpoint
// ============================================================================

/// Resolve a source URL and relay the helper process output as an MPEG
/// transport stream for the lifetime of this response.
pub async fn stream(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    Query(params): Query<StreamQuery>,
) -> Response {
    let url = match params.url.filter(|u| !u.is_empty()) {
        Some(url) => url,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "URL parameter is required" })),
            )
                .into_response();
        }
    };

    let resolved = match state.resolver.resolve(&url).await {
        Ok(resolved) => resolved,
        Err(e) => return resolve_error_response(e),
    };

    let child = match stream::spawn_helper(&state.config.streamlink, &resolved) {
        Ok(child) => child,
        Err(e) => {
            error!("Failed to spawn streaming helper: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("Failed to start stream: {}", e) })),
            )
                .into_response();
        }
    };

    let client = connect.map(|ConnectInfo(addr)| addr);
    let session_id = state
        .sessions
        .register(client, &url, &resolved)
        .await;
    info!(
        "[Session {}] starting stream for {} from {}",
        session_id,
        client.map(|a| a.to_string()).unwrap_or_else(|| "unknown".into()),
        url
    );

    let body = Body::from_stream(stream::relay(
        child,
        session_id,
        state.sessions.clone(),
    ));
    match Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "video/mp2t")
        .body(body)
    {
        Ok(response) => response,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

fn resolve_error_response(e: ResolveError) -> Response {
    match e {
        ResolveError::Probe { details } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "Failed to retrieve stream info", "details": details })),
        )
            .into_response(),
        ResolveError::NoStream => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "No valid streams found" })),
        )
            .into_response(),
        ResolveError::Tool { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

// ============================================================================
// Artifact generation and serving
// ============================================================================

/// Regenerate the playlist from a catalog file and return it.
pub async fn generate_playlist(
    State(state): State<AppState>,
    Query(params): Query<XmlQuery>,
) -> Response {
    let (catalog_path, stem) = match resolve_catalog(&state, params.xml) {
        Ok(resolved) => resolved,
        Err(response) => return response,
    };
    let output = state.config.data_dir.join(format!("{}.m3u", stem));
    match playlist::generate(&catalog_path, &output, &state.config.base_url()) {
        Ok(content) => {
            ([(CONTENT_TYPE, "audio/x-mpegurl")], content).into_response()
        }
        Err(e) => generation_error(e),
    }
}

/// Regenerate the XMLTV EPG from a catalog file and return it.
pub async fn generate_epg(
    State(state): State<AppState>,
    Query(params): Query<XmlQuery>,
) -> Response {
    let (catalog_path, stem) = match resolve_catalog(&state, params.xml) {
        Ok(resolved) => resolved,
        Err(response) => return response,
    };
    let output = state.config.data_dir.join(format!("{}_epg.xml", stem));
    match epg::generate(&catalog_path, &output, &state.config.base_url()) {
        Ok(content) => ([(CONTENT_TYPE, "application/xml")], content).into_response(),
        Err(e) => generation_error(e),
    }
}

/// Serve a generated playlist, substituting host placeholders so templated
/// playlists can move between deployments.
pub async fn serve_m3u(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Response {
    let content = match read_artifact(&state, &file, ".m3u").await {
        Ok(content) => content,
        Err(response) => return response,
    };
    let content = content
        .replace("{{HOST_IP}}", &state.config.host)
        .replace("{{PORT}}", &state.config.port.to_string());
    ([(CONTENT_TYPE, "audio/x-mpegurl")], content).into_response()
}

/// Serve a catalog or EPG XML document verbatim.
pub async fn serve_xml(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Response {
    let content = match read_artifact(&state, &file, ".xml").await {
        Ok(content) => content,
        Err(response) => return response,
    };
    ([(CONTENT_TYPE, "application/xml")], content).into_response()
}

/// Active stream sessions, one entry per running helper process.
pub async fn get_sessions(State(state): State<AppState>) -> Json<serde_json::Value> {
    let sessions: Vec<serde_json::Value> = state
        .sessions
        .snapshot()
        .await
        .into_iter()
        .map(|s| {
            json!({
                "id": s.id,
                "addr": s.addr,
                "host": s.host,
                "source_url": s.source_url,
                "resolved_url": s.resolved_url,
                "connected_seconds": s.connected_seconds(),
                "bytes_sent": s.bytes_sent,
            })
        })
        .collect();
    Json(json!(sessions))
}

// ============================================================================
// Helpers
// ============================================================================

/// Accept only flat filenames: no separators, no traversal.
fn safe_filename(name: &str, extension: &str) -> bool {
    !name.is_empty()
        && name.ends_with(extension)
        && name.len() > extension.len()
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Validate the requested catalog name and return its path plus filename
/// stem for derived artifacts.
fn resolve_catalog(
    state: &AppState,
    requested: Option<String>,
) -> Result<(std::path::PathBuf, String), Response> {
    let name = requested.unwrap_or_else(|| DEFAULT_CATALOG.to_string());
    if !safe_filename(&name, ".xml") {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid catalog filename" })),
        )
            .into_response());
    }
    let path = state.config.data_dir.join(&name);
    if !path.is_file() {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("XML file not found: {}", name) })),
        )
            .into_response());
    }
    let stem = name.trim_end_matches(".xml").to_string();
    Ok((path, stem))
}

fn generation_error(e: CatalogError) -> Response {
    error!("Artifact generation failed: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
        .into_response()
}

/// Read a served artifact, distinguishing bad names (400) from missing
/// files (404).
async fn read_artifact(
    state: &AppState,
    file: &str,
    extension: &str,
) -> Result<String, Response> {
    if !safe_filename(file, extension) {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": format!("Only {} files can be served", extension)
            })),
        )
            .into_response());
    }
    tokio::fs::read_to_string(state.config.data_dir.join(file))
        .await
        .map_err(|_| {
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "File not found" })),
            )
                .into_response()
        })
}
