//! Evidence assembly: turn decoded frames into the base64 JPEG payload the
//! judge receives, with an optional side channel that saves frames to disk
//! for inspection.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use tokio::sync::Semaphore;

use crate::error::EvalError;
use crate::extract::{FrameSequence, NormalizedFrame};
use crate::prompts::Instruction;

/// JPEG quality for frames sent to the judge.
const WIRE_JPEG_QUALITY: u8 = 85;

/// JPEG quality for saved debug frames.
const DEBUG_JPEG_QUALITY: u8 = 95;

/// A rendered instruction plus its image evidence as data URLs, in
/// temporal order.
#[derive(Debug, Clone)]
pub struct EvidencePayload {
    pub instruction: Instruction,
    pub images: Vec<String>,
}

impl EvidencePayload {
    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}

/// Observes frames as evidence is assembled. `index` is the frame's
/// zero-based position in the sequence. Capture is fire-and-forget:
/// failures are logged, never propagated, and must not affect the
/// evaluation.
pub trait FrameRecorder: Send + Sync {
    fn record(&self, frame: &NormalizedFrame, index: usize, name: &str);
}

/// Recorder that drops every frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFrameRecorder;

impl FrameRecorder for NoopFrameRecorder {
    fn record(&self, _frame: &NormalizedFrame, _index: usize, _name: &str) {}
}

/// Saves each frame as a high-quality JPEG under `<root>/<name>/`.
#[derive(Debug, Clone)]
pub struct DirFrameRecorder {
    root: PathBuf,
}

impl DirFrameRecorder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FrameRecorder for DirFrameRecorder {
    fn record(&self, frame: &NormalizedFrame, index: usize, name: &str) {
        let dir = self.root.join(name);
        // Saved files are numbered from one: the first frame is
        // frame_001_full.jpg.
        let number = index + 1;
        if let Err(err) = write_debug_frame(&dir, frame, number) {
            tracing::warn!("failed to save debug frame {number} for {name}: {err}");
        }
    }
}

fn write_debug_frame(dir: &Path, frame: &NormalizedFrame, number: usize) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("frame_{number:03}_full.jpg"));
    let jpeg = encode_jpeg(&frame.image, DEBUG_JPEG_QUALITY).map_err(std::io::Error::other)?;
    std::fs::write(path, jpeg)
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> image::ImageResult<Vec<u8>> {
    let rgb = image.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(&rgb)?;
    Ok(out)
}

fn served_mime(content_type: Option<&str>) -> &str {
    content_type
        .and_then(|value| value.split(';').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("image/jpeg")
}

#[derive(Clone)]
pub struct EvidenceAssembler {
    recorder: Arc<dyn FrameRecorder>,
    // Shared with the frame extractor: encode and decode contend for the
    // same blocking-pool permits.
    permits: Arc<Semaphore>,
}

impl EvidenceAssembler {
    pub fn new(recorder: Arc<dyn FrameRecorder>, permits: Arc<Semaphore>) -> Self {
        Self { recorder, permits }
    }

    /// Encode a frame sequence into judge evidence, recording each frame
    /// along the way. Encoding is CPU-bound and runs on the blocking pool
    /// behind the permit gate shared with frame decoding.
    pub async fn assemble_video(
        &self,
        sequence: FrameSequence,
        instruction: Instruction,
        source_name: &str,
    ) -> Result<EvidencePayload, EvalError> {
        let recorder = Arc::clone(&self.recorder);
        let name = source_name.to_owned();

        let _permit = self.permits.acquire().await.expect("semaphore closed");
        tokio::task::spawn_blocking(move || -> Result<EvidencePayload, EvalError> {
            let mut images = Vec::with_capacity(sequence.len());
            for (index, frame) in sequence.frames.iter().enumerate() {
                recorder.record(frame, index, &name);
                let jpeg = encode_jpeg(&frame.image, WIRE_JPEG_QUALITY).map_err(|e| {
                    EvalError::extraction(format!("failed to encode frame {index}: {e}"))
                })?;
                images.push(format!("data:image/jpeg;base64,{}", BASE64.encode(&jpeg)));
            }
            Ok(EvidencePayload {
                instruction,
                images,
            })
        })
        .await
        .map_err(|e| EvalError::extraction(format!("encode task failed: {e}")))?
    }

    /// Wrap a still image body as evidence. The bytes travel exactly as
    /// served, labeled with the served mime type.
    pub fn assemble_image(
        &self,
        bytes: &[u8],
        content_type: Option<&str>,
        instruction: Instruction,
    ) -> EvidencePayload {
        let url = format!(
            "data:{};base64,{}",
            served_mime(content_type),
            BASE64.encode(bytes)
        );
        EvidencePayload {
            instruction,
            images: vec![url],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::{IMAGE_EVAL, VIDEO_EVAL};
    use std::time::Duration;

    fn test_sequence(frames: usize) -> FrameSequence {
        let frames = (0..frames)
            .map(|i| NormalizedFrame {
                timestamp_secs: i as f64,
                image: DynamicImage::new_rgb8(8, 8),
                upscaled: false,
            })
            .collect();
        FrameSequence {
            frames,
            duration_secs: 3.0,
        }
    }

    fn test_assembler(recorder: Arc<dyn FrameRecorder>) -> EvidenceAssembler {
        EvidenceAssembler::new(recorder, Arc::new(Semaphore::new(2)))
    }

    #[tokio::test]
    async fn debug_frames_land_under_the_source_name() {
        let dir = tempfile::tempdir().unwrap();
        let assembler = test_assembler(Arc::new(DirFrameRecorder::new(dir.path().to_path_buf())));

        let payload = assembler
            .assemble_video(test_sequence(3), VIDEO_EVAL.render(3), "clip01")
            .await
            .unwrap();

        assert_eq!(payload.image_count(), 3);

        // Numbering starts at one, not zero.
        let mut names: Vec<String> = std::fs::read_dir(dir.path().join("clip01"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(
            names,
            [
                "frame_001_full.jpg",
                "frame_002_full.jpg",
                "frame_003_full.jpg"
            ]
        );
    }

    #[tokio::test]
    async fn wire_payload_is_jpeg_data_urls() {
        let assembler = test_assembler(Arc::new(NoopFrameRecorder));
        let payload = assembler
            .assemble_video(test_sequence(2), VIDEO_EVAL.render(2), "clip")
            .await
            .unwrap();

        assert_eq!(payload.images.len(), 2);
        for url in &payload.images {
            assert!(url.starts_with("data:image/jpeg;base64,"));
        }
    }

    #[tokio::test]
    async fn recorder_failures_do_not_fail_assembly() {
        // Root the recorder at a plain file so create_dir_all cannot succeed.
        let file = tempfile::NamedTempFile::new().unwrap();
        let assembler = test_assembler(Arc::new(DirFrameRecorder::new(file.path().to_path_buf())));

        let payload = assembler
            .assemble_video(test_sequence(2), VIDEO_EVAL.render(2), "clip")
            .await
            .unwrap();

        assert_eq!(payload.image_count(), 2);
    }

    #[tokio::test]
    async fn encoding_waits_for_the_shared_permit_gate() {
        let gate = Arc::new(Semaphore::new(1));
        let assembler = EvidenceAssembler::new(Arc::new(NoopFrameRecorder), Arc::clone(&gate));
        let held = Arc::clone(&gate).acquire_owned().await.unwrap();

        let work = assembler.assemble_video(test_sequence(1), VIDEO_EVAL.render(1), "clip");
        tokio::pin!(work);
        let blocked = tokio::time::timeout(Duration::from_millis(50), work.as_mut()).await;
        assert!(blocked.is_err(), "encode should wait for a permit");

        drop(held);
        let payload = work.await.unwrap();
        assert_eq!(payload.image_count(), 1);
    }

    #[test]
    fn image_evidence_keeps_served_bytes_and_mime() {
        let assembler = test_assembler(Arc::new(NoopFrameRecorder));
        let payload = assembler.assemble_image(
            b"not-actually-a-png",
            Some("image/png; charset=binary"),
            IMAGE_EVAL.render(1),
        );

        assert_eq!(
            payload.images,
            vec![format!(
                "data:image/png;base64,{}",
                BASE64.encode(b"not-actually-a-png")
            )]
        );
    }

    #[test]
    fn image_evidence_defaults_the_mime_type() {
        let assembler = test_assembler(Arc::new(NoopFrameRecorder));
        let payload = assembler.assemble_image(b"bytes", None, IMAGE_EVAL.render(1));
        assert!(payload.images[0].starts_with("data:image/jpeg;base64,"));
    }
}
