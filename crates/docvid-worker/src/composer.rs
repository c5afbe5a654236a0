//! Video composition via ffmpeg.
//!
//! Each successful scene becomes a segment (still visual looped under its
//! narration audio), and segments concat into the final MP4. Composition is
//! treated as a black box by the pipeline: it either yields a video or
//! fails the job.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use docvid_models::{JobId, Video, VideoStatus};
use docvid_services::media_duration;

use crate::error::{WorkerError, WorkerResult};

/// One scene's inputs to composition.
#[derive(Debug, Clone)]
pub struct ComposeScene {
    pub scene_id: u32,
    pub visual_path: PathBuf,
    pub audio_path: PathBuf,
}

/// ffmpeg-backed composer writing `videos/{job_id}.mp4`.
pub struct Composer {
    video_dir: PathBuf,
}

impl Composer {
    pub fn new(video_dir: PathBuf) -> Self {
        Self { video_dir }
    }

    /// Compose the scenes (already in script order) into one MP4.
    pub async fn compose(
        &self,
        job_id: &JobId,
        scenes: &[ComposeScene],
        work_dir: &Path,
    ) -> WorkerResult<Video> {
        if scenes.is_empty() {
            return Err(WorkerError::compose("No scenes to compose"));
        }

        which::which("ffmpeg").map_err(|_| WorkerError::compose("ffmpeg not found in PATH"))?;

        tokio::fs::create_dir_all(work_dir).await?;
        tokio::fs::create_dir_all(&self.video_dir).await?;

        let mut segment_paths = Vec::with_capacity(scenes.len());
        for (index, scene) in scenes.iter().enumerate() {
            let segment = work_dir.join(format!("segment_{:03}.mp4", index));
            self.render_segment(scene, &segment).await?;
            segment_paths.push(segment);
        }

        let output = self.video_dir.join(format!("{}.mp4", job_id));
        self.concat_segments(&segment_paths, work_dir, &output)
            .await?;

        let duration_seconds = media_duration(&output)
            .await
            .map_err(|e| WorkerError::compose(format!("Probing output failed: {}", e)))?;
        let size_bytes = tokio::fs::metadata(&output).await?.len();

        if size_bytes == 0 {
            return Err(WorkerError::compose("Output video is empty"));
        }

        info!(
            job_id = %job_id,
            path = %output.display(),
            duration_seconds,
            size_bytes,
            segments = scenes.len(),
            "Video composed"
        );

        Ok(Video {
            path: output,
            duration_seconds,
            size_bytes,
            status: VideoStatus::Ready,
        })
    }

    /// Build one segment: the scene's visual looped for the length of its
    /// narration audio.
    async fn render_segment(&self, scene: &ComposeScene, output: &Path) -> WorkerResult<()> {
        debug!(scene_id = scene.scene_id, output = %output.display(), "Rendering segment");

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-y", "-loglevel", "error", "-loop", "1"])
            .arg("-i")
            .arg(&scene.visual_path)
            .arg("-i")
            .arg(&scene.audio_path)
            .args([
                "-c:v",
                "libx264",
                "-tune",
                "stillimage",
                "-pix_fmt",
                "yuv420p",
                "-vf",
                "scale=trunc(iw/2)*2:trunc(ih/2)*2",
                "-c:a",
                "aac",
                "-shortest",
            ])
            .arg(output);

        run_ffmpeg(cmd, &format!("segment for scene {}", scene.scene_id)).await
    }

    /// Concatenate segments with the concat demuxer (stream copy).
    async fn concat_segments(
        &self,
        segments: &[PathBuf],
        work_dir: &Path,
        output: &Path,
    ) -> WorkerResult<()> {
        let list_path = work_dir.join("concat.txt");
        let mut list = String::new();
        for segment in segments {
            // Paths are produced by this process, no quoting surprises
            list.push_str(&format!("file '{}'\n", segment.display()));
        }
        tokio::fs::write(&list_path, list).await?;

        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-y", "-loglevel", "error", "-f", "concat", "-safe", "0"])
            .arg("-i")
            .arg(&list_path)
            .args(["-c", "copy"])
            .arg(output);

        run_ffmpeg(cmd, "concat").await
    }
}

async fn run_ffmpeg(mut cmd: Command, what: &str) -> WorkerResult<()> {
    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(WorkerError::compose(format!(
            "ffmpeg {} failed: {}",
            what,
            stderr.trim()
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_compose_rejects_empty_scene_list() {
        let composer = Composer::new(PathBuf::from("/tmp/videos"));
        let result = composer
            .compose(&JobId::new(), &[], Path::new("/tmp/work"))
            .await;
        assert!(matches!(result, Err(WorkerError::Compose(_))));
    }
}
