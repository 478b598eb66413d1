//! Media assembly via the `ffmpeg` CLI.
//!
//! Scenes are concatenated with the concat demuxer, then the narration track
//! is muxed on top, optionally mixed with a ducked music bed. Finished files
//! are inspected with `ffprobe`. Each subprocess runs under a timeout.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Music bed level relative to narration
const MUSIC_VOLUME: f64 = 0.12;
/// Fade-out length at the end of the music bed
const MUSIC_FADE_SECS: f64 = 2.0;

/// Stream and duration facts about a media file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaInfo {
    pub duration_secs: f64,
    pub has_video: bool,
    pub has_audio: bool,
}

impl MediaInfo {
    /// Parse `ffprobe -print_format json -show_format -show_streams` output
    pub fn from_ffprobe_json(raw: &[u8]) -> Result<Self> {
        let probe: Value = serde_json::from_slice(raw).context("Invalid ffprobe output")?;

        let duration_secs = probe
            .pointer("/format/duration")
            .and_then(|d| match d {
                Value::String(s) => s.parse::<f64>().ok(),
                other => other.as_f64(),
            })
            .unwrap_or(0.0);

        let codec_types: Vec<&str> = probe
            .get("streams")
            .and_then(Value::as_array)
            .map(|streams| {
                streams
                    .iter()
                    .filter_map(|s| s.get("codec_type").and_then(Value::as_str))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            duration_secs,
            has_video: codec_types.contains(&"video"),
            has_audio: codec_types.contains(&"audio"),
        })
    }
}

/// Joins scene clips and a narration track into one video
#[async_trait]
pub trait MediaAssembler: Send + Sync {
    /// Concatenate `scenes` in order, mux `narration` (mixed with `music`
    /// when given), write to `output`
    async fn assemble(
        &self,
        scenes: &[PathBuf],
        narration: &Path,
        music: Option<&Path>,
        output: &Path,
    ) -> Result<()>;

    /// Inspect a finished file
    async fn probe(&self, path: &Path) -> Result<MediaInfo>;
}

/// ffmpeg subprocess assembler
pub struct FfmpegAssembler {
    /// Path to the ffmpeg binary (default: "ffmpeg")
    binary_path: String,
    /// Path to the ffprobe binary (default: "ffprobe")
    probe_path: String,
    step_timeout: Duration,
}

impl Default for FfmpegAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegAssembler {
    pub fn new() -> Self {
        Self::with_binary_path("ffmpeg")
    }

    /// Create an assembler with a custom binary path
    pub fn with_binary_path(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
            probe_path: "ffprobe".to_string(),
            step_timeout: Duration::from_secs(600),
        }
    }

    pub fn with_probe_path(mut self, probe_path: impl Into<String>) -> Self {
        self.probe_path = probe_path.into();
        self
    }

    /// Filter graph mixing narration (input 1) with a music bed (input 2)
    /// trimmed to the narration length and faded out at the end
    pub fn music_mix_filter(narration_secs: f64) -> String {
        let fade_start = (narration_secs - MUSIC_FADE_SECS).max(0.0);
        format!(
            "[1:a]volume=1.0[narr];\
             [2:a]volume={},atrim=0:{:.3},afade=out:st={:.3}:d={}[mus];\
             [narr][mus]amix=inputs=2:duration=first[aout]",
            MUSIC_VOLUME, narration_secs, fade_start, MUSIC_FADE_SECS
        )
    }

    /// Contents of the concat demuxer list file
    pub fn concat_list(scenes: &[PathBuf]) -> String {
        scenes
            .iter()
            .map(|p| format!("file '{}'\n", p.display().to_string().replace('\'', "'\\''")))
            .collect()
    }

    async fn run(&self, args: &[&str]) -> Result<()> {
        let mut full = vec!["-y", "-loglevel", "error"];
        full.extend_from_slice(args);
        self.spawn(&self.binary_path, &full).await.map(|_| ())
    }

    async fn spawn(&self, binary: &str, args: &[&str]) -> Result<Vec<u8>> {
        debug!(binary = %binary, ?args, "Running media tool");

        let child = Command::new(binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn {}", binary))?;

        let output = timeout(self.step_timeout, child.wait_with_output())
            .await
            .with_context(|| format!("{} timed out after {:?}", binary, self.step_timeout))?
            .with_context(|| format!("Failed to wait for {}", binary))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            anyhow::bail!(
                "{} failed with exit code {}: {}",
                binary,
                exit_code,
                crate::error::truncate_diagnostic(stderr.trim())
            );
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl MediaAssembler for FfmpegAssembler {
    async fn assemble(
        &self,
        scenes: &[PathBuf],
        narration: &Path,
        music: Option<&Path>,
        output: &Path,
    ) -> Result<()> {
        if scenes.is_empty() {
            anyhow::bail!("No scenes to assemble");
        }

        // Intermediate files live in a scratch dir removed on drop
        let scratch = tempfile::tempdir().context("Failed to create scratch directory")?;
        let list_path = scratch.path().join("concat.txt");
        let merged_path = scratch.path().join("scenes_merged.mp4");

        tokio::fs::write(&list_path, Self::concat_list(scenes))
            .await
            .context("Failed to write concat list")?;

        let list = list_path.to_string_lossy();
        let merged = merged_path.to_string_lossy();
        self.run(&["-f", "concat", "-safe", "0", "-i", &list, "-c", "copy", &merged])
            .await
            .context("Scene concatenation failed")?;

        if let Some(music) = music {
            match self.probe(narration).await {
                Ok(info) if info.duration_secs > 0.0 => {
                    let filter = Self::music_mix_filter(info.duration_secs);
                    let narration = narration.to_string_lossy();
                    let music = music.to_string_lossy();
                    let output = output.to_string_lossy();
                    self.run(&[
                        "-i", &merged, "-i", &narration, "-i", &music,
                        "-filter_complex", &filter, "-map", "0:v:0", "-map", "[aout]",
                        "-c:v", "copy", "-c:a", "aac", "-b:a", "192k", "-shortest", &output,
                    ])
                    .await
                    .context("Audio mix failed")?;
                    return Ok(());
                }
                Ok(_) => warn!("Narration has no duration, skipping music bed"),
                Err(e) => warn!(error = %e, "Narration probe failed, skipping music bed"),
            }
        }

        let narration = narration.to_string_lossy();
        let output = output.to_string_lossy();
        self.run(&[
            "-i", &merged, "-i", &narration, "-c:v", "copy", "-c:a", "aac", "-b:a", "192k",
            "-map", "0:v:0", "-map", "1:a:0", "-shortest", &output,
        ])
        .await
        .context("Audio merge failed")?;

        Ok(())
    }

    async fn probe(&self, path: &Path) -> Result<MediaInfo> {
        let target = path.to_string_lossy();
        let raw = self
            .spawn(
                &self.probe_path,
                &[
                    "-v", "quiet", "-print_format", "json", "-show_format", "-show_streams",
                    &target,
                ],
            )
            .await?;
        MediaInfo::from_ffprobe_json(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_list() {
        let list = FfmpegAssembler::concat_list(&[
            PathBuf::from("/out/scene_001.mp4"),
            PathBuf::from("/out/scene_002.mp4"),
        ]);
        assert_eq!(
            list,
            "file '/out/scene_001.mp4'\nfile '/out/scene_002.mp4'\n"
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_error() {
        let assembler = FfmpegAssembler::with_binary_path("/nonexistent/ffmpeg-binary");
        let dir = tempfile::tempdir().unwrap();
        let result = assembler
            .assemble(
                &[dir.path().join("a.mp4")],
                &dir.path().join("n.mp3"),
                None,
                &dir.path().join("out.mp4"),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_no_scenes_is_an_error() {
        let assembler = FfmpegAssembler::new();
        let dir = tempfile::tempdir().unwrap();
        let result = assembler
            .assemble(&[], &dir.path().join("n.mp3"), None, &dir.path().join("out.mp4"))
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_media_info_from_ffprobe() {
        let raw = br#"{
            "streams": [{"codec_type": "video"}, {"codec_type": "audio"}],
            "format": {"duration": "41.250000", "size": "7340032"}
        }"#;
        let info = MediaInfo::from_ffprobe_json(raw).unwrap();
        assert_eq!(info.duration_secs, 41.25);
        assert!(info.has_video);
        assert!(info.has_audio);

        let silent = MediaInfo::from_ffprobe_json(br#"{"streams": [{"codec_type": "video"}], "format": {}}"#)
            .unwrap();
        assert!(!silent.has_audio);
        assert_eq!(silent.duration_secs, 0.0);
    }

    #[test]
    fn test_music_mix_filter() {
        let filter = FfmpegAssembler::music_mix_filter(30.0);
        assert!(filter.contains("volume=0.12,atrim=0:30.000"));
        assert!(filter.contains("afade=out:st=28.000:d=2"));
        assert!(filter.ends_with("amix=inputs=2:duration=first[aout]"));

        // Short narration never fades from a negative offset
        assert!(FfmpegAssembler::music_mix_filter(1.0).contains("afade=out:st=0.000"));
    }

    #[tokio::test]
    async fn test_missing_probe_binary_is_an_error() {
        let assembler = FfmpegAssembler::new().with_probe_path("/nonexistent/ffprobe-binary");
        let dir = tempfile::tempdir().unwrap();
        assert!(assembler.probe(&dir.path().join("out.mp4")).await.is_err());
    }
}
