//! Stream resolution.
//!
//! Turns an opaque source URL into something the streaming helper can play.
//! streamlink's own probe is the source of truth for variant availability
//! and quality ranking; when it sees nothing on a known video-hosting URL,
//! yt-dlp is asked once for a direct media URL and the probe is repeated.
//! No retries beyond that single fallback.

use log::{error, info};
use serde_json::Value;
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum ResolveError {
    /// The probe tool exited non-zero or produced unusable output.
    #[error("stream probe failed: {details}")]
    Probe { details: String },

    /// The probe succeeded but reported no playable variant, even after the
    /// fallback chain.
    #[error("no playable stream found")]
    NoStream,

    /// A helper tool could not be launched at all.
    #[error("failed to run {tool}: {source}")]
    Tool {
        tool: String,
        #[source]
        source: std::io::Error,
    },
}

/// Resolves source URLs through the streamlink/yt-dlp fallback chain.
#[derive(Debug, Clone)]
pub struct Resolver {
    streamlink: String,
    ytdlp: String,
}

impl Resolver {
    pub fn new(streamlink: impl Into<String>, ytdlp: impl Into<String>) -> Self {
        Self {
            streamlink: streamlink.into(),
            ytdlp: ytdlp.into(),
        }
    }

    /// Resolve a source URL to the URL the streaming helper should be
    /// launched against.
    pub async fn resolve(&self, source_url: &str) -> Result<String, ResolveError> {
        let probe = self.probe(source_url).await?;
        if has_variants(&probe) {
            return if has_best_variant(&probe) {
                Ok(source_url.to_string())
            } else {
                Err(ResolveError::NoStream)
            };
        }

        if !is_video_host(source_url) {
            return Err(ResolveError::NoStream);
        }

        info!("No variants from direct probe, falling back to yt-dlp for {}", source_url);
        let direct_url = self.extract_direct_url(source_url).await?;
        let reprobe = self.probe(&direct_url).await?;
        if has_best_variant(&reprobe) {
            Ok(direct_url)
        } else {
            Err(ResolveError::NoStream)
        }
    }

    /// Run the probe tool and parse its JSON stream report.
    async fn probe(&self, url: &str) -> Result<Value, ResolveError> {
        let output = Command::new(&self.streamlink)
            .args(["--json", url])
            .output()
            .await
            .map_err(|source| ResolveError::Tool {
                tool: self.streamlink.clone(),
                source,
            })?;

        if !output.status.success() {
            let details = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!("Probe of {} failed: {}", url, details);
            return Err(ResolveError::Probe { details });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| ResolveError::Probe {
            details: format!("unparseable probe output: {}", e),
        })
    }

    /// Ask yt-dlp for a direct playable URL. Invoked at most once per
    /// resolution.
    async fn extract_direct_url(&self, url: &str) -> Result<String, ResolveError> {
        let output = Command::new(&self.ytdlp)
            .args(["--get-url", "--youtube-skip-dash-manifest", url])
            .output()
            .await
            .map_err(|source| ResolveError::Tool {
                tool: self.ytdlp.clone(),
                source,
            })?;

        if !output.status.success() {
            error!(
                "yt-dlp fallback for {} failed: {}",
                url,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Err(ResolveError::NoStream);
        }

        let direct = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or("")
            .trim()
            .to_string();
        if direct.is_empty() {
            return Err(ResolveError::NoStream);
        }
        Ok(direct)
    }
}

/// Whether the probe reported any stream variant at all.
fn has_variants(probe: &Value) -> bool {
    probe
        .get("streams")
        .and_then(Value::as_object)
        .map_or(false, |streams| !streams.is_empty())
}

/// Whether the probe's own quality ranking selected a "best" variant.
fn has_best_variant(probe: &Value) -> bool {
    probe
        .get("streams")
        .and_then(Value::as_object)
        .map_or(false, |streams| streams.contains_key("best"))
}

/// Source URLs for which the yt-dlp fallback is worth attempting.
pub fn is_video_host(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.contains("youtube.com") || lower.contains("youtu.be")
}
