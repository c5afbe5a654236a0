//! Asset types produced by the pipeline.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Raster or vector format of a visual asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Svg,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Svg => "svg",
        }
    }

    /// Detect the format from a content type header, if recognizable.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let ct = content_type.split(';').next().unwrap_or("").trim();
        match ct {
            "image/png" => Some(ImageFormat::Png),
            "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
            "image/svg+xml" => Some(ImageFormat::Svg),
            _ => None,
        }
    }
}

/// Synthesized narration audio for one scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioAsset {
    /// Owning scene
    pub scene_id: u32,
    /// Local path to the waveform file
    pub path: PathBuf,
    /// Duration in seconds, measured from the file itself
    pub duration_seconds: f64,
    /// Fingerprint of (narration text, voice params), used as cache key
    pub fingerprint: String,
}

/// Rendered visual for one scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualAsset {
    /// Owning scene
    pub scene_id: u32,
    /// Local path to the image file
    pub path: PathBuf,
    /// Declared width in pixels
    pub width: u32,
    /// Declared height in pixels
    pub height: u32,
    pub format: ImageFormat,
    /// Fingerprint of (visual type, prompt, render params), used as cache key
    pub fingerprint: String,
}

/// Final video status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    #[default]
    Ready,
    Failed,
}

/// The muxed output video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    /// Local path to the MP4
    pub path: PathBuf,
    /// Duration in seconds
    pub duration_seconds: f64,
    /// File size in bytes
    pub size_bytes: u64,
    pub status: VideoStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_format_from_content_type() {
        assert_eq!(
            ImageFormat::from_content_type("image/png"),
            Some(ImageFormat::Png)
        );
        assert_eq!(
            ImageFormat::from_content_type("image/svg+xml; charset=utf-8"),
            Some(ImageFormat::Svg)
        );
        assert_eq!(ImageFormat::from_content_type("text/html"), None);
    }
}
