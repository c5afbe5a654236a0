//! FFprobe media information.

use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;

use crate::error::{ServiceError, ServiceResult};

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Measure the duration of a media file in seconds.
///
/// Runs `ffprobe` against the file itself, so the reported duration matches
/// what the muxer will see regardless of what the producing service claimed.
pub async fn media_duration(path: impl AsRef<Path>) -> ServiceResult<f64> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(ServiceError::ProbeFailed(format!(
            "File not found: {}",
            path.display()
        )));
    }

    which::which("ffprobe")
        .map_err(|_| ServiceError::ProbeFailed("ffprobe not found in PATH".to_string()))?;

    let output = Command::new("ffprobe")
        .args(["-v", "quiet", "-print_format", "json", "-show_format"])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ServiceError::ProbeFailed(format!(
            "ffprobe failed for {}: {}",
            path.display(),
            stderr.trim()
        )));
    }

    let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)
        .map_err(|e| ServiceError::ProbeFailed(format!("Unparseable ffprobe output: {}", e)))?;

    let duration: f64 = parsed
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse().ok())
        .ok_or_else(|| {
            ServiceError::ProbeFailed(format!("No duration reported for {}", path.display()))
        })?;

    if duration <= 0.0 {
        return Err(ServiceError::ProbeFailed(format!(
            "Non-positive duration {} for {}",
            duration,
            path.display()
        )));
    }

    Ok(duration)
}
