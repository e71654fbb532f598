//! Channel catalog loading.
//!
//! The catalog is an XML document of `<channel>` elements describing the
//! sources the virtual tuner exposes. It is re-read and rebuilt wholesale on
//! every use; there is no incremental update and no caching across requests.

use std::path::{Path, PathBuf};

use log::warn;
use serde::Deserialize;
use thiserror::Error;

/// A single channel as exposed to DVR clients.
///
/// Immutable once loaded. Duplicates are legal; catalog order is preserved
/// and becomes display/scan order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    pub name: String,
    pub guide_id: String,
    pub guide_name: String,
    pub logo_url: String,
    pub group_title: String,
    pub channel_number: String,
    pub source_url: String,
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse catalog {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: quick_xml::DeError,
    },
}

#[derive(Debug, Deserialize)]
struct CatalogDoc {
    #[serde(rename = "channel", default)]
    channels: Vec<ChannelEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelEntry {
    #[serde(rename = "channel-name", default)]
    name: Option<String>,
    #[serde(rename = "tvg-id", default)]
    guide_id: Option<String>,
    #[serde(rename = "tvg-name", default)]
    guide_name: Option<String>,
    #[serde(rename = "tvg-logo", default)]
    logo_url: Option<String>,
    #[serde(rename = "group-title", default)]
    group_title: Option<String>,
    #[serde(rename = "channel-number", default)]
    channel_number: Option<String>,
    #[serde(rename = "source-url", default)]
    source_url: Option<String>,
    /// Accepted as an alias so catalogs written for the original
    /// youtube-only generator keep working.
    #[serde(rename = "youtube-url", default)]
    youtube_url: Option<String>,
}

/// Load and parse the catalog file into an ordered channel list.
///
/// Channels without a source URL cannot be streamed and are skipped with a
/// warning, matching how the playlist generator has always treated them.
pub fn load_catalog(path: &Path) -> Result<Vec<ChannelRecord>, CatalogError> {
    let contents = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_catalog(&contents).map_err(|source| CatalogError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse catalog XML. Split from [`load_catalog`] so tests can feed
/// documents directly.
pub fn parse_catalog(xml: &str) -> Result<Vec<ChannelRecord>, quick_xml::DeError> {
    let doc: CatalogDoc = quick_xml::de::from_str(xml)?;

    let mut records = Vec::with_capacity(doc.channels.len());
    for (idx, entry) in doc.channels.into_iter().enumerate() {
        let position = idx + 1;
        let name = clean(entry.name).unwrap_or_else(|| "Unknown".to_string());
        let source_url = match clean(entry.source_url).or_else(|| clean(entry.youtube_url)) {
            Some(url) => url,
            None => {
                warn!("Skipping channel '{}' due to missing source URL", name);
                continue;
            }
        };
        records.push(ChannelRecord {
            guide_id: clean(entry.guide_id).unwrap_or_default(),
            guide_name: clean(entry.guide_name).unwrap_or_else(|| name.clone()),
            logo_url: clean(entry.logo_url).unwrap_or_default(),
            group_title: clean(entry.group_title).unwrap_or_else(|| "General".to_string()),
            channel_number: clean(entry.channel_number).unwrap_or_else(|| position.to_string()),
            name,
            source_url,
        });
    }
    Ok(records)
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Build the proxy stream URL for a channel, with the source URL carried as
/// a percent-encoded `url` query parameter.
pub fn stream_url(base_url: &str, source_url: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(source_url.as_bytes()).collect();
    format!("{}/stream?url={}", base_url, encoded)
}
