//! Frame extraction and normalization.
//!
//! Probes the video with ffprobe, picks evenly spaced frame indices across
//! the full duration, pulls each frame out with ffmpeg, and upscales
//! anything whose short edge falls below the judge's working resolution.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use serde::Deserialize;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tokio::sync::Semaphore;

use crate::error::EvalError;
use crate::sampling::SamplingPlan;

/// Frames are upscaled until their short edge reaches this many pixels.
pub const MIN_SHORT_EDGE: u32 = 1080;

/// Assumed frame rate when the container does not report one.
const FALLBACK_FPS: f64 = 25.0;

/// One decoded frame, upscaled if the source was below the working
/// resolution.
#[derive(Debug, Clone)]
pub struct NormalizedFrame {
    pub timestamp_secs: f64,
    pub image: DynamicImage,
    pub upscaled: bool,
}

/// Decoded frames in temporal order, covering the full video duration.
#[derive(Debug, Clone)]
pub struct FrameSequence {
    pub frames: Vec<NormalizedFrame>,
    pub duration_secs: f64,
}

impl FrameSequence {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct VideoMeta {
    total_frames: u64,
    fps: f64,
    duration_secs: f64,
}

#[derive(Debug)]
pub struct FrameExtractor {
    // Gate concurrent spawn_blocking calls to prevent Tokio blocking pool
    // starvation.
    permits: Arc<Semaphore>,
    parallelism: usize,
}

impl FrameExtractor {
    pub fn new(decode_parallelism: usize) -> Self {
        let parallelism = decode_parallelism.max(1);
        Self {
            permits: Arc::new(Semaphore::new(parallelism)),
            parallelism,
        }
    }

    /// The gate for this extractor's blocking work, shared with the
    /// evidence assembler.
    pub fn blocking_gate(&self) -> Arc<Semaphore> {
        Arc::clone(&self.permits)
    }

    /// Decode a sampled frame sequence from a raw video body.
    ///
    /// Individual frames that fail to decode are skipped with a warning;
    /// only a fully undecodable video is an error.
    pub async fn extract(
        &self,
        raw_video: Vec<u8>,
        plan: &SamplingPlan,
    ) -> Result<FrameSequence, EvalError> {
        let video_file = self.write_temp_video(raw_video).await?;
        let video_path = video_file.path().to_path_buf();

        let meta = probe_metadata(&video_path).await?;
        let count = frames_to_sample(meta.duration_secs, plan);
        let indices = sample_indices(meta.total_frames, count);

        eprintln!(
            "[extract] sampling {} of {} frames over {:.1}s ({:.2} fps)",
            indices.len(),
            meta.total_frames,
            meta.duration_secs,
            meta.fps
        );

        let tasks: Vec<_> = indices
            .into_iter()
            .map(|idx| {
                let timestamp_secs = idx as f64 / meta.fps;
                let path = video_path.clone();
                let permits = Arc::clone(&self.permits);
                async move {
                    match extract_one(&path, timestamp_secs, permits).await {
                        Ok(frame) => Some(frame),
                        Err(err) => {
                            tracing::warn!(
                                "skipping frame {idx} at {timestamp_secs:.3}s: {err}"
                            );
                            None
                        }
                    }
                }
            })
            .collect();

        // buffered() keeps output in submission order, so the sequence
        // stays temporal even when decodes finish out of order.
        let frames: Vec<NormalizedFrame> = stream::iter(tasks)
            .buffered(self.parallelism)
            .filter_map(|frame| async move { frame })
            .collect()
            .await;

        if frames.is_empty() {
            return Err(EvalError::extraction(
                "no frames could be decoded from the video",
            ));
        }

        Ok(FrameSequence {
            frames,
            duration_secs: meta.duration_secs,
        })
    }

    async fn write_temp_video(&self, bytes: Vec<u8>) -> Result<NamedTempFile, EvalError> {
        let _permit = self.permits.acquire().await.expect("semaphore closed");
        tokio::task::spawn_blocking(move || -> Result<NamedTempFile, EvalError> {
            let mut file = tempfile::Builder::new()
                .prefix("frame-judge-")
                .suffix(".mp4")
                .tempfile()
                .map_err(|e| EvalError::extraction(format!("failed to create temp video: {e}")))?;
            file.write_all(&bytes)
                .map_err(|e| EvalError::extraction(format!("failed to write temp video: {e}")))?;
            Ok(file)
        })
        .await
        .map_err(|e| EvalError::extraction(format!("temp write task failed: {e}")))?
    }
}

/// Pull one frame at `timestamp_secs`, decode it, and normalize its size.
async fn extract_one(
    video: &Path,
    timestamp_secs: f64,
    permits: Arc<Semaphore>,
) -> Result<NormalizedFrame, EvalError> {
    let frame_png = tempfile::Builder::new()
        .prefix("frame-judge-")
        .suffix(".png")
        .tempfile()
        .map_err(|e| EvalError::extraction(format!("failed to create temp frame: {e}")))?;
    let out_path: PathBuf = frame_png.path().to_path_buf();

    // -ss before -i seeks on keyframes first, which is much faster than
    // decoding from the start of the file.
    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-loglevel", "error", "-nostdin"])
        .arg("-ss")
        .arg(format!("{timestamp_secs:.3}"))
        .arg("-i")
        .arg(video)
        .args(["-frames:v", "1", "-y"])
        .arg(&out_path)
        .output()
        .await
        .map_err(|e| EvalError::extraction(format!("ffmpeg failed to start: {e}")))?;

    if !output.status.success() {
        return Err(EvalError::extraction(format!(
            "ffmpeg exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let _permit = permits.acquire().await.expect("semaphore closed");
    let (image, upscaled) =
        tokio::task::spawn_blocking(move || -> Result<(DynamicImage, bool), EvalError> {
            let decoded = image::open(frame_png.path())
                .map_err(|e| EvalError::extraction(format!("failed to decode frame: {e}")))?;
            Ok(normalize(decoded))
        })
        .await
        .map_err(|e| EvalError::extraction(format!("decode task failed: {e}")))??;

    Ok(NormalizedFrame {
        timestamp_secs,
        image,
        upscaled,
    })
}

/// Upscale so the short edge reaches [`MIN_SHORT_EDGE`]; frames already at
/// or above it pass through untouched.
fn normalize(image: DynamicImage) -> (DynamicImage, bool) {
    let (width, height) = image.dimensions();
    let short = width.min(height);
    if short >= MIN_SHORT_EDGE {
        return (image, false);
    }

    let scale = MIN_SHORT_EDGE as f64 / short as f64;
    let (target_w, target_h) = if width <= height {
        (MIN_SHORT_EDGE, (height as f64 * scale).round() as u32)
    } else {
        ((width as f64 * scale).round() as u32, MIN_SHORT_EDGE)
    };

    let resized = image.resize_exact(target_w, target_h, FilterType::Lanczos3);
    (resized, true)
}

/// How many frames the plan allows for this duration. Always at least one.
fn frames_to_sample(duration_secs: f64, plan: &SamplingPlan) -> u32 {
    let by_rate = duration_secs * plan.sampling_fps;
    let capped = if by_rate.is_finite() && by_rate > 0.0 {
        (by_rate.floor() as u64).min(plan.max_frames as u64) as u32
    } else {
        0
    };
    capped.max(1)
}

/// Evenly spaced frame indices from the first frame to the last.
///
/// Rounding can map neighboring slots to the same index on short videos;
/// duplicates collapse, so the result may be shorter than `count`.
fn sample_indices(total_frames: u64, count: u32) -> Vec<u64> {
    let last = total_frames.saturating_sub(1);
    if count <= 1 || last == 0 {
        return vec![0];
    }

    let mut indices: Vec<u64> = (0..u64::from(count))
        .map(|slot| (slot as f64 * last as f64 / (u64::from(count) - 1) as f64).round() as u64)
        .collect();
    indices.dedup();
    indices
}

async fn probe_metadata(path: &Path) -> Result<VideoMeta, EvalError> {
    let probe = run_ffprobe(path, false).await?;
    let format_duration = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(parse_secs);

    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| EvalError::extraction("no video stream found"))?;

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_fps)
        .unwrap_or(FALLBACK_FPS);
    let stream_duration = stream.duration.as_deref().and_then(parse_secs);

    let mut total_frames = stream
        .nb_frames
        .as_deref()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|&n| n > 0);

    if total_frames.is_none() {
        // Some containers omit nb_frames entirely; fall back to a
        // sequential scan that counts decoded frames.
        let counted = run_ffprobe(path, true).await?;
        total_frames = counted
            .streams
            .into_iter()
            .next()
            .and_then(|s| s.nb_read_frames)
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|&n| n > 0);
    }

    let total_frames =
        total_frames.ok_or_else(|| EvalError::extraction("could not determine frame count"))?;

    let duration_secs = format_duration
        .or(stream_duration)
        .unwrap_or(total_frames as f64 / fps);

    Ok(VideoMeta {
        total_frames,
        fps,
        duration_secs,
    })
}

async fn run_ffprobe(path: &Path, count_frames: bool) -> Result<ProbeOutput, EvalError> {
    let mut cmd = Command::new("ffprobe");
    cmd.args(["-v", "error", "-select_streams", "v:0"]);
    if count_frames {
        cmd.args(["-count_frames", "-show_entries", "stream=nb_read_frames"]);
    } else {
        cmd.args([
            "-show_entries",
            "stream=nb_frames,avg_frame_rate,duration",
            "-show_entries",
            "format=duration",
        ]);
    }
    cmd.args(["-of", "json"]).arg(path);

    let output = cmd
        .output()
        .await
        .map_err(|e| EvalError::extraction(format!("ffprobe failed to start: {e}")))?;

    if !output.status.success() {
        return Err(EvalError::extraction(format!(
            "ffprobe exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    serde_json::from_slice(&output.stdout)
        .map_err(|e| EvalError::extraction(format!("unreadable ffprobe output: {e}")))
}

// ffprobe -of json stringifies every numeric field.
#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    nb_frames: Option<String>,
    nb_read_frames: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

fn parse_secs(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d > 0.0)
}

/// Parse ffprobe's rational frame rate ("30000/1001") or a bare number.
fn parse_fps(raw: &str) -> Option<f64> {
    let value = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => raw.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}
