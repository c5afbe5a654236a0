//! Text-to-speech client.
//!
//! Sends narration text to the external speech endpoint and persists the
//! returned waveform. Duration is always measured from the written file, not
//! trusted from the service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ServiceError, ServiceResult};
use crate::fingerprint::content_fingerprint;
use crate::probe::media_duration;

#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Service base URL (the speech endpoint lives at `/v1/audio/speech`)
    pub base_url: String,
    pub voice: String,
    /// Output container passed to the service (wav)
    pub format: String,
    pub speed: f32,
    /// Model-tuning numbers; low values favor stable, fast generation
    pub exaggeration: f32,
    pub cfg_weight: f32,
    pub temperature: f32,
    /// Connection establishment timeout, separate from the read timeout
    pub connect_timeout: Duration,
    pub timeout: Duration,
    /// Directory audio segments are written into
    pub output_dir: PathBuf,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4123".to_string(),
            voice: "alloy".to_string(),
            format: "wav".to_string(),
            speed: 1.0,
            exaggeration: 0.2,
            cfg_weight: 0.4,
            temperature: 0.2,
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(60),
            output_dir: PathBuf::from("assets/audio"),
        }
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    #[serde(rename = "text")]
    input: &'a str,
    voice: &'a str,
    format: &'a str,
    speed: f32,
    exaggeration: f32,
    cfg_weight: f32,
    temperature: f32,
}

/// Result of one synthesis call.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub path: PathBuf,
    pub duration_seconds: f64,
}

/// Client for the external TTS service.
pub struct TtsClient {
    http: reqwest::Client,
    config: TtsConfig,
}

impl TtsClient {
    pub fn new(config: TtsConfig) -> ServiceResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    /// Cache key for a synthesis: narration text + every voice parameter.
    pub fn fingerprint(&self, text: &str) -> String {
        content_fingerprint(&[
            text,
            &self.config.voice,
            &self.config.format,
            &self.config.speed.to_string(),
            &self.config.exaggeration.to_string(),
            &self.config.cfg_weight.to_string(),
            &self.config.temperature.to_string(),
        ])
    }

    /// Synthesize narration for a scene and persist the waveform.
    pub async fn synthesize(&self, scene_id: u32, text: &str) -> ServiceResult<SynthesizedAudio> {
        let request = SpeechRequest {
            input: text,
            voice: &self.config.voice,
            format: &self.config.format,
            speed: self.config.speed,
            exaggeration: self.config.exaggeration,
            cfg_weight: self.config.cfg_weight,
            temperature: self.config.temperature,
        };

        debug!(scene_id, text_chars = text.chars().count(), "Requesting TTS synthesis");

        let response = self
            .http
            .post(format!("{}/v1/audio/speech", self.config.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Status {
                service: "tts".to_string(),
                status: status.as_u16(),
            });
        }

        let payload = response
            .bytes()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if payload.is_empty() {
            return Err(ServiceError::invalid_response("TTS returned empty payload"));
        }

        tokio::fs::create_dir_all(&self.config.output_dir).await?;
        let path = self.config.output_dir.join(format!(
            "segment_{}_{}.{}",
            scene_id,
            Uuid::new_v4(),
            self.config.format
        ));
        tokio::fs::write(&path, &payload).await?;

        let duration_seconds = media_duration(&path).await?;

        info!(
            scene_id,
            path = %path.display(),
            duration_seconds,
            bytes = payload.len(),
            "Synthesized narration audio"
        );

        Ok(SynthesizedAudio {
            path,
            duration_seconds,
        })
    }

    fn map_transport_error(&self, e: reqwest::Error) -> ServiceError {
        if e.is_timeout() {
            ServiceError::Timeout {
                service: "tts".to_string(),
                timeout_secs: self.config.timeout.as_secs(),
            }
        } else {
            ServiceError::Http(e)
        }
    }

    /// Quick health probe against the service.
    pub async fn health_check(&self) -> bool {
        let result = self
            .http
            .get(format!("{}/v1/health", self.config.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        matches!(result, Ok(resp) if resp.status().is_success())
    }

    /// Verify a previously cached waveform still exists on disk.
    ///
    /// Cached paths can dangle after a retention sweep; a missing file must
    /// be treated as a cache miss, not an error.
    pub fn cached_file_exists(path: &Path) -> bool {
        path.is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_covers_voice_params() {
        let base = TtsClient::new(TtsConfig::default()).unwrap();
        let other_voice = TtsClient::new(TtsConfig {
            voice: "nova".to_string(),
            ..Default::default()
        })
        .unwrap();
        let other_speed = TtsClient::new(TtsConfig {
            speed: 1.25,
            ..Default::default()
        })
        .unwrap();

        let text = "The same narration text.";
        assert_ne!(base.fingerprint(text), other_voice.fingerprint(text));
        assert_ne!(base.fingerprint(text), other_speed.fingerprint(text));
        assert_eq!(base.fingerprint(text), base.fingerprint(text));
    }

    #[test]
    fn test_cached_file_exists() {
        assert!(!TtsClient::cached_file_exists(Path::new(
            "/nonexistent/audio.wav"
        )));

        let tmp = tempfile::NamedTempFile::new().unwrap();
        assert!(TtsClient::cached_file_exists(tmp.path()));
    }
}
