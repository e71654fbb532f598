//! XMLTV electronic program guide generation.
//!
//! Live sources have no schedule, so each channel gets a repeating 24-hour
//! "Live" programme block for the next seven days. DVR clients require some
//! guide data before they will record a channel at all.

use std::fmt::Write as _;
use std::path::Path;

use chrono::{Duration, Utc};
use log::info;
use quick_xml::escape::escape;

use crate::catalog::{self, ChannelRecord, CatalogError};

const GUIDE_DAYS: i64 = 7;

/// Render an XMLTV document for all channels carrying a guide id.
pub fn build_epg(channels: &[ChannelRecord], base_url: &str) -> String {
    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str("<!DOCTYPE tv SYSTEM \"xmltv.dtd\">\n");
    let _ = writeln!(
        xml,
        "<tv generator-info-name=\"webtuner-proxy\" generator-info-url=\"{}\">",
        escape(base_url)
    );

    let guided: Vec<&ChannelRecord> = channels
        .iter()
        .filter(|c| !c.guide_id.is_empty())
        .collect();

    for channel in &guided {
        let _ = writeln!(xml, "  <channel id=\"{}\">", escape(&channel.guide_id));
        let _ = writeln!(
            xml,
            "    <display-name>{}</display-name>",
            escape(&channel.guide_name)
        );
        let _ = writeln!(
            xml,
            "    <display-name>{}</display-name>",
            escape(&channel.channel_number)
        );
        if !channel.logo_url.is_empty() {
            let _ = writeln!(xml, "    <icon src=\"{}\"/>", escape(&channel.logo_url));
        }
        xml.push_str("  </channel>\n");
    }

    let midnight = Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc();

    for channel in &guided {
        for day in 0..GUIDE_DAYS {
            let start = midnight + Duration::days(day);
            let stop = start + Duration::days(1);
            let _ = writeln!(
                xml,
                "  <programme start=\"{}\" stop=\"{}\" channel=\"{}\">",
                start.format("%Y%m%d%H%M%S +0000"),
                stop.format("%Y%m%d%H%M%S +0000"),
                escape(&channel.guide_id)
            );
            let _ = writeln!(
                xml,
                "    <title lang=\"en\">{} - Live</title>",
                escape(&channel.guide_name)
            );
            let _ = writeln!(
                xml,
                "    <desc lang=\"en\">Live stream from {}</desc>",
                escape(&channel.name)
            );
            if !channel.logo_url.is_empty() {
                let _ = writeln!(xml, "    <icon src=\"{}\"/>", escape(&channel.logo_url));
            }
            xml.push_str("  </programme>\n");
        }
    }

    xml.push_str("</tv>\n");
    xml
}

/// Regenerate the EPG file from the catalog and return its contents.
pub fn generate(
    catalog_path: &Path,
    output_path: &Path,
    base_url: &str,
) -> Result<String, CatalogError> {
    let channels = catalog::load_catalog(catalog_path)?;
    let content = build_epg(&channels, base_url);
    std::fs::write(output_path, &content).map_err(|source| CatalogError::Io {
        path: output_path.to_path_buf(),
        source,
    })?;
    info!(
        "Generated EPG {} from {} with {} channels",
        output_path.display(),
        catalog_path.display(),
        channels.iter().filter(|c| !c.guide_id.is_empty()).count()
    );
    Ok(content)
}
