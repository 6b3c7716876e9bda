//! Direct extraction of remote video pages.
//!
//! The extractor itself is an external tool; this module only runs it,
//! decodes its JSON description of the media and picks the encoding the
//! encoder should read.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{ResolutionError, ResolvedSource, SourceKind, SourceMetadata, UNKNOWN};
use crate::config::ExtractionConfig;

/// Backend that describes a remote video page.
#[async_trait]
pub trait MediaExtractor: Send + Sync + std::fmt::Debug {
    /// Extracts the media description for `url`.
    ///
    /// # Errors
    /// - `ResolutionError::Extraction` - Extractor failed, carrying the provider's message
    async fn extract(&self, url: &str) -> Result<ExtractedMedia, ResolutionError>;
}

/// One encoding offered by the provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaFormat {
    pub url: Option<String>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub format_note: Option<String>,
    pub height: Option<u32>,
}

impl MediaFormat {
    /// Whether the encoding has both a video and an audio track.
    ///
    /// Providers mark a missing track with the literal codec `none`; an
    /// absent codec field is not treated as missing.
    pub fn has_audio_and_video(&self) -> bool {
        self.vcodec.as_deref() != Some("none") && self.acodec.as_deref() != Some("none")
    }

    fn quality_label(&self) -> String {
        match (&self.format_note, self.height) {
            (Some(note), _) if !note.is_empty() => note.clone(),
            (_, Some(height)) => height.to_string(),
            _ => UNKNOWN.to_string(),
        }
    }
}

/// Media description as reported by the provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractedMedia {
    pub title: Option<String>,
    pub duration: Option<f64>,
    pub uploader: Option<String>,
    pub view_count: Option<u64>,
    /// Provider's single best-effort URL
    pub url: Option<String>,
    /// Offered encodings, weakest first
    #[serde(default)]
    pub formats: Vec<MediaFormat>,
}

/// Encoding chosen for playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayableFormat {
    pub url: String,
    pub quality: String,
}

impl ExtractedMedia {
    /// Picks the highest-quality encoding carrying both audio and video.
    ///
    /// Falls back to the provider's best-effort URL with unknown quality.
    pub fn select_playable(&self) -> Option<PlayableFormat> {
        self.formats
            .iter()
            .rev()
            .filter(|format| format.has_audio_and_video())
            .find_map(|format| {
                format.url.as_ref().map(|url| PlayableFormat {
                    url: url.clone(),
                    quality: format.quality_label(),
                })
            })
            .or_else(|| {
                self.url.as_ref().map(|url| PlayableFormat {
                    url: url.clone(),
                    quality: UNKNOWN.to_string(),
                })
            })
    }

    /// Converts the description into a resolved remote source.
    ///
    /// # Errors
    /// - `ResolutionError::Extraction` - Provider offered no playable URL at all
    pub fn into_resolved(self) -> Result<ResolvedSource, ResolutionError> {
        let playable = self
            .select_playable()
            .ok_or_else(|| ResolutionError::Extraction {
                reason: "no playable URL offered".to_string(),
            })?;

        let duration = match self.duration {
            Some(seconds) if seconds > 0.0 => format!("{}s", seconds.trunc() as u64),
            _ => UNKNOWN.to_string(),
        };

        Ok(ResolvedSource {
            locator: playable.url,
            kind: SourceKind::Remote,
            metadata: SourceMetadata {
                title: self.title.unwrap_or_else(|| UNKNOWN.to_string()),
                duration,
                quality: playable.quality,
                channel: self.uploader.unwrap_or_else(|| UNKNOWN.to_string()),
                views: self.view_count,
                size: None,
            },
        })
    }
}

/// Extractor backed by the `yt-dlp` binary.
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    binary: PathBuf,
    timeout: Duration,
}

impl YtDlpExtractor {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            binary: config.ytdlp_path.clone(),
            timeout: config.extractor_timeout,
        }
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn extract(&self, url: &str) -> Result<ExtractedMedia, ResolutionError> {
        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.arg("--dump-single-json")
            .arg("--no-warnings")
            .arg("--no-playlist")
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!("Running extractor: {:?}", cmd);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ResolutionError::Extraction {
                reason: format!("extractor timed out after {}s", self.timeout.as_secs()),
            })?
            .map_err(|e| ResolutionError::Extraction {
                reason: format!("failed to run {}: {e}", self.binary.display()),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("extractor exited without output")
                .trim()
                .to_string();
            tracing::warn!("Extractor failed for {}: {}", url, message);
            return Err(ResolutionError::Extraction { reason: message });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| ResolutionError::Extraction {
            reason: format!("unreadable extractor output: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(url: &str, vcodec: &str, acodec: &str, note: &str) -> MediaFormat {
        MediaFormat {
            url: Some(url.to_string()),
            vcodec: Some(vcodec.to_string()),
            acodec: Some(acodec.to_string()),
            format_note: Some(note.to_string()),
            height: None,
        }
    }

    #[test]
    fn test_selects_last_format_with_audio_and_video() {
        let media = ExtractedMedia {
            formats: vec![
                format("https://cdn/144p", "avc1", "mp4a", "144p"),
                format("https://cdn/audio", "none", "opus", "tiny"),
                format("https://cdn/1080p-video", "vp9", "none", "1080p"),
                format("https://cdn/720p", "avc1", "mp4a", "720p"),
            ],
            url: Some("https://cdn/fallback".to_string()),
            ..Default::default()
        };

        let selected = media.select_playable().unwrap();
        assert_eq!(selected.url, "https://cdn/720p");
        assert_eq!(selected.quality, "720p");
    }

    #[test]
    fn test_falls_back_to_best_effort_url() {
        let media = ExtractedMedia {
            formats: vec![
                format("https://cdn/audio", "none", "opus", "tiny"),
                format("https://cdn/video", "vp9", "none", "1080p"),
            ],
            url: Some("https://cdn/fallback".to_string()),
            ..Default::default()
        };

        let selected = media.select_playable().unwrap();
        assert_eq!(selected.url, "https://cdn/fallback");
        assert_eq!(selected.quality, UNKNOWN);
    }

    #[test]
    fn test_quality_falls_back_to_height() {
        let mut only = format("https://cdn/x", "avc1", "mp4a", "");
        only.format_note = None;
        only.height = Some(480);
        let media = ExtractedMedia {
            formats: vec![only],
            ..Default::default()
        };
        assert_eq!(media.select_playable().unwrap().quality, "480");
    }

    #[test]
    fn test_no_url_is_extraction_error() {
        let media = ExtractedMedia::default();
        assert!(matches!(
            media.into_resolved(),
            Err(ResolutionError::Extraction { .. })
        ));
    }

    #[test]
    fn test_metadata_from_provider_json() {
        let json = r#"{
            "title": "Lofi beats",
            "duration": 212.0,
            "uploader": "Some Channel",
            "view_count": 1234,
            "formats": [
                {"url": "https://cdn/a", "vcodec": "avc1", "acodec": "mp4a", "format_note": "360p"}
            ]
        }"#;
        let media: ExtractedMedia = serde_json::from_str(json).unwrap();
        let resolved = media.into_resolved().unwrap();

        assert_eq!(resolved.metadata.title, "Lofi beats");
        assert_eq!(resolved.metadata.duration, "212s");
        assert_eq!(resolved.metadata.channel, "Some Channel");
        assert_eq!(resolved.metadata.views, Some(1234));
        assert_eq!(resolved.locator, "https://cdn/a");
    }

    #[tokio::test]
    async fn test_missing_binary_is_extraction_error() {
        let extractor = YtDlpExtractor::new(&ExtractionConfig {
            ytdlp_path: PathBuf::from("/nonexistent/yt-dlp"),
            ..Default::default()
        });
        let result = extractor.extract("https://video.example.com/x").await;
        assert!(matches!(result, Err(ResolutionError::Extraction { .. })));
    }
}
