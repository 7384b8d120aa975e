//! FFmpeg-backed transcode executor.
//!
//! One ffmpeg run per output profile, with `-progress pipe:1` key/value
//! output folded into overall task progress. Argument construction stays
//! deliberately small; rendition tuning lives with the profile definitions,
//! not here.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use vodworks_core::models::{Task, TranscodeProfile};
use vodworks_core::{ExecutorError, ProgressSender, TranscodeExecutor};

#[derive(Debug, Clone)]
pub struct FfmpegConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub output_dir: PathBuf,
}

impl FfmpegConfig {
    pub fn from_env() -> Self {
        Self {
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            ffprobe_path: std::env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".to_string()),
            output_dir: std::env::var("TRANSCODE_OUTPUT_DIR")
                .unwrap_or_else(|_| "/tmp/vodworks".to_string())
                .into(),
        }
    }
}

pub struct FfmpegExecutor {
    config: FfmpegConfig,
}

impl FfmpegExecutor {
    pub fn new(config: FfmpegConfig) -> Self {
        Self { config }
    }

    /// Source duration in seconds via ffprobe; `None` when probing fails,
    /// in which case progress is reported per profile only.
    async fn probe_duration(&self, source: &str) -> Option<f64> {
        let output = Command::new(&self.config.ffprobe_path)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "csv=p=0",
                source,
            ])
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8_lossy(&output.stdout).trim().parse().ok()
    }

    async fn run_profile(
        &self,
        task: &Task,
        profile: &TranscodeProfile,
        duration_secs: Option<f64>,
        profile_index: usize,
        profile_count: usize,
        progress: &ProgressSender,
    ) -> Result<(), ExecutorError> {
        let output_path = rendition_path(&self.config.output_dir, task, profile);
        if let Some(parent) = output_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ExecutorError::transient_with(
                    format!("failed to create output directory {}", parent.display()),
                    e.into(),
                )
            })?;
        }

        let args = build_args(&task.source, profile, &output_path);
        tracing::debug!(
            task_id = %task.id,
            profile = %profile,
            "Spawning ffmpeg"
        );

        let mut child = Command::new(&self.config.ffmpeg_path)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| {
                // A missing binary will not fix itself between retries.
                ExecutorError::permanent_with(
                    format!("failed to spawn {}", self.config.ffmpeg_path),
                    e.into(),
                )
            })?;

        // Drain stderr concurrently; a full stderr pipe would stall ffmpeg
        // while this side is blocked reading progress from stdout.
        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut stderr) = stderr {
                use tokio::io::AsyncReadExt;
                let _ = stderr.read_to_end(&mut buf).await;
            }
            buf
        });

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(percent) = profile_progress(
                    &line,
                    duration_secs,
                    profile_index,
                    profile_count,
                ) {
                    let _ = progress.send(percent);
                }
            }
        }

        let status = child.wait().await.map_err(|e| {
            ExecutorError::transient_with("failed waiting for ffmpeg", e.into())
        })?;
        let stderr_buf = stderr_task.await.unwrap_or_default();

        if status.success() {
            let _ = progress.send(overall_percent(1.0, profile_index, profile_count));
            return Ok(());
        }

        let stderr_tail = tail(&String::from_utf8_lossy(&stderr_buf), 512);
        match status.code() {
            // Killed by signal: host pressure, worth retrying elsewhere.
            None => Err(ExecutorError::transient(format!(
                "ffmpeg terminated by signal: {}",
                stderr_tail
            ))),
            Some(code) => Err(ExecutorError::permanent(format!(
                "ffmpeg exited with status {}: {}",
                code, stderr_tail
            ))),
        }
    }
}

#[async_trait]
impl TranscodeExecutor for FfmpegExecutor {
    async fn execute(&self, task: &Task, progress: ProgressSender) -> Result<(), ExecutorError> {
        if task.profiles.is_empty() {
            return Err(ExecutorError::permanent("task has no transcode profiles"));
        }
        let duration = self.probe_duration(&task.source).await;
        let count = task.profiles.len();
        for (index, profile) in task.profiles.iter().enumerate() {
            self.run_profile(task, profile, duration, index, count, &progress)
                .await?;
        }
        let _ = progress.send(100.0);
        Ok(())
    }
}

/// Output location: `<dir>/<task id>/<resolution>_<bitrate>.<container>`.
fn rendition_path(output_dir: &Path, task: &Task, profile: &TranscodeProfile) -> PathBuf {
    output_dir.join(task.id.to_string()).join(format!(
        "{}_{}.{}",
        profile.resolution, profile.bitrate_kbps, profile.container
    ))
}

fn build_args(source: &str, profile: &TranscodeProfile, output: &Path) -> Vec<String> {
    vec![
        "-hide_banner".to_string(),
        "-y".to_string(),
        "-i".to_string(),
        source.to_string(),
        "-s".to_string(),
        profile.resolution.clone(),
        "-b:v".to_string(),
        format!("{}k", profile.bitrate_kbps),
        "-progress".to_string(),
        "pipe:1".to_string(),
        "-nostats".to_string(),
        output.display().to_string(),
    ]
}

/// Fold one `-progress` output line into an overall task percentage.
/// Lines look like `out_time_us=1234567` or `progress=end`.
fn profile_progress(
    line: &str,
    duration_secs: Option<f64>,
    profile_index: usize,
    profile_count: usize,
) -> Option<f64> {
    let (key, value) = line.split_once('=')?;
    match key {
        "out_time_us" => {
            let duration = duration_secs?;
            if duration <= 0.0 {
                return None;
            }
            let out_secs = value.trim().parse::<f64>().ok()? / 1_000_000.0;
            let fraction = (out_secs / duration).clamp(0.0, 1.0);
            Some(overall_percent(fraction, profile_index, profile_count))
        }
        "progress" if value.trim() == "end" => {
            Some(overall_percent(1.0, profile_index, profile_count))
        }
        _ => None,
    }
}

/// Progress across all profiles: each profile owns an equal slice.
fn overall_percent(fraction_of_profile: f64, profile_index: usize, profile_count: usize) -> f64 {
    let slice = 100.0 / profile_count.max(1) as f64;
    (profile_index as f64 * slice + fraction_of_profile * slice).clamp(0.0, 100.0)
}

fn tail(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= max {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - max;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}
