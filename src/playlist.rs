//! M3U playlist generation from the channel catalog.

use std::path::Path;

use log::info;

use crate::catalog::{self, ChannelRecord, CatalogError};

/// Render an M3U playlist pointing every channel at the stream proxy.
pub fn build_playlist(channels: &[ChannelRecord], base_url: &str) -> String {
    let mut lines = vec!["#EXTM3U".to_string()];
    for channel in channels {
        lines.push(format!(
            "#EXTINF:-1 tvg-id=\"{}\" tvg-name=\"{}\" tvg-chno=\"{}\" tvg-logo=\"{}\" group-title=\"{}\",{}",
            channel.guide_id,
            channel.guide_name,
            channel.channel_number,
            channel.logo_url,
            channel.group_title,
            channel.name,
        ));
        lines.push(catalog::stream_url(base_url, &channel.source_url));
    }
    lines.join("\n") + "\n"
}

/// Regenerate the playlist file from the catalog and return its contents.
pub fn generate(
    catalog_path: &Path,
    output_path: &Path,
    base_url: &str,
) -> Result<String, CatalogError> {
    let channels = catalog::load_catalog(catalog_path)?;
    let content = build_playlist(&channels, base_url);
    std::fs::write(output_path, &content).map_err(|source| CatalogError::Io {
        path: output_path.to_path_buf(),
        source,
    })?;
    info!(
        "Generated {} from {} with {} entries",
        output_path.display(),
        catalog_path.display(),
        channels.len()
    );
    Ok(content)
}
