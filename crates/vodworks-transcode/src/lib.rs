//! Vodworks Transcode
//!
//! The FFmpeg invocation shim behind the scheduler's executor seam.

pub mod ffmpeg;

pub use ffmpeg::{FfmpegConfig, FfmpegExecutor};
