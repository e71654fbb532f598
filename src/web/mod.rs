//! HTTP server: HDHomeRun emulation endpoints and the stream proxy.

pub mod api;
pub mod state;

use std::net::SocketAddr;

use axum::{
    routing::get,
    Router,
};
use log::info;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use state::AppState;

/// Assemble the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        // HDHomeRun emulation
        .route("/discover.json", get(api::discover))
        .route("/lineup.json", get(api::lineup))
        .route("/lineup_status.json", get(api::lineup_status))
        .route("/device.xml", get(api::device_xml))
        .route("/lineup.post", get(api::lineup_post).post(api::lineup_post))
        // Stream proxy
        .route("/stream", get(api::stream))
        // Artifact generation and serving
        .route("/generate", get(api::generate_playlist))
        .route("/epg", get(api::generate_epg))
        .route("/m3u/:file", get(api::serve_m3u))
        .route("/xml/:file", get(api::serve_xml))
        .route("/epg/:file", get(api::serve_xml))
        // Monitoring
        .route("/api/sessions", get(api::get_sessions))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind and run the HTTP server until process shutdown.
pub async fn start_web_server(
    listen_addr: SocketAddr,
    state: AppState,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!("HTTP API listening on http://{}", listen_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
