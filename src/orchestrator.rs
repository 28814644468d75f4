//! Request orchestration.
//!
//! Runs the image and video sides of a request concurrently and reports
//! each side's outcome independently: one side failing never discards the
//! other side's verdict.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{backoff_delay, EvalConfig};
use crate::error::{ErrorReport, EvalError};
use crate::evidence::{
    DirFrameRecorder, EvidenceAssembler, EvidencePayload, FrameRecorder, NoopFrameRecorder,
};
use crate::extract::FrameExtractor;
use crate::fetcher::{MediaKind, ResourceFetcher};
use crate::judge::{ArkJudge, JudgeModel};
use crate::prompts::{IMAGE_EVAL, VIDEO_EVAL};
use crate::sampling;

/// An evaluation request; at least one URL must be present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
}

impl MediaRequest {
    pub fn image(url: impl Into<String>) -> Self {
        Self {
            image_url: Some(url.into()),
            video_url: None,
        }
    }

    pub fn video(url: impl Into<String>) -> Self {
        Self {
            image_url: None,
            video_url: Some(url.into()),
        }
    }

    fn validate(&self) -> Result<(), EvalError> {
        if self.image_url.is_none() && self.video_url.is_none() {
            return Err(EvalError::validation(
                "at least one of image_url or video_url is required",
            ));
        }
        Ok(())
    }
}

/// Per-side outcome of one request. A side that was not requested leaves
/// both of its slots empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_error: Option<ErrorReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_error: Option<ErrorReport>,
}

pub struct Evaluator {
    config: EvalConfig,
    fetcher: ResourceFetcher,
    extractor: FrameExtractor,
    assembler: EvidenceAssembler,
    judge: Arc<dyn JudgeModel>,
}

impl Evaluator {
    pub fn new(
        config: EvalConfig,
        judge: Arc<dyn JudgeModel>,
        recorder: Arc<dyn FrameRecorder>,
    ) -> Result<Self, EvalError> {
        let fetcher = ResourceFetcher::new(
            config.fetch_timeout,
            config.retry.clone(),
            config.max_image_bytes,
        )?;
        let extractor = FrameExtractor::new(config.decode_parallelism);
        let assembler = EvidenceAssembler::new(recorder, extractor.blocking_gate());
        Ok(Self {
            config,
            fetcher,
            extractor,
            assembler,
            judge,
        })
    }

    /// Wire up an evaluator from the environment, with the Ark judge and a
    /// debug-frame recorder when one is configured.
    pub fn from_env() -> Result<Self, EvalError> {
        let config = EvalConfig::from_env()?;
        let judge: Arc<dyn JudgeModel> = Arc::new(ArkJudge::new(&config.judge)?);
        let recorder: Arc<dyn FrameRecorder> = match &config.debug_frame_dir {
            Some(root) => Arc::new(DirFrameRecorder::new(root.clone())),
            None => Arc::new(NoopFrameRecorder),
        };
        Self::new(config, judge, recorder)
    }

    /// Evaluate one request. Sub-evaluations run concurrently; each side
    /// lands in its own result or error slot.
    pub async fn handle(&self, request: MediaRequest) -> Result<EvaluationResponse, EvalError> {
        request.validate()?;

        let image_task = async {
            match &request.image_url {
                Some(url) => Some(self.evaluate_image(url).await),
                None => None,
            }
        };
        let video_task = async {
            match &request.video_url {
                Some(url) => Some(self.evaluate_video(url).await),
                None => None,
            }
        };

        let (image_outcome, video_outcome) = tokio::join!(image_task, video_task);

        let mut response = EvaluationResponse::default();
        match image_outcome {
            Some(Ok(verdict)) => response.image_result = Some(verdict),
            Some(Err(err)) => {
                eprintln!("[orchestrator] image evaluation failed: {err}");
                response.image_error = Some(ErrorReport::from(&err));
            }
            None => {}
        }
        match video_outcome {
            Some(Ok(verdict)) => response.video_result = Some(verdict),
            Some(Err(err)) => {
                eprintln!("[orchestrator] video evaluation failed: {err}");
                response.video_error = Some(ErrorReport::from(&err));
            }
            None => {}
        }

        Ok(response)
    }

    async fn evaluate_image(&self, url: &str) -> Result<String, EvalError> {
        let media = self.fetcher.fetch(url, MediaKind::Image).await?;
        eprintln!("[orchestrator] fetched image: {} bytes", media.bytes.len());

        let payload = self.assembler.assemble_image(
            &media.bytes,
            media.content_type.as_deref(),
            IMAGE_EVAL.render(1),
        );
        self.judge_with_retry(&payload).await
    }

    async fn evaluate_video(&self, url: &str) -> Result<String, EvalError> {
        let media = self.fetcher.fetch(url, MediaKind::Video).await?;
        let byte_size = media.bytes.len() as u64;
        let plan = sampling::plan(byte_size)?;
        eprintln!(
            "[orchestrator] fetched video: {} bytes, tier {} ({} frames max @ {} fps)",
            byte_size,
            plan.tier.as_str(),
            plan.max_frames,
            plan.sampling_fps
        );

        let sequence = self.extractor.extract(media.bytes, &plan).await?;
        let instruction = VIDEO_EVAL.render(sequence.len());
        let stem = source_stem(url);
        let payload = self
            .assembler
            .assemble_video(sequence, instruction, &stem)
            .await?;
        self.judge_with_retry(&payload).await
    }

    async fn judge_with_retry(&self, payload: &EvidencePayload) -> Result<String, EvalError> {
        let mut attempt = 0;
        loop {
            match self.judge.evaluate(payload).await {
                Ok(verdict) => return Ok(verdict),
                Err(err) => {
                    if !err.is_retryable() || attempt == self.config.retry.max_retries {
                        return Err(err);
                    }
                    let delay = backoff_delay(self.config.retry.base_delay, attempt);
                    tracing::warn!(
                        "judge attempt {} failed ({}), retrying in {:?}",
                        attempt + 1,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Name debug frames after the video file: last path segment, query
/// stripped, extension dropped.
fn source_stem(url: &str) -> String {
    let segment = url.rsplit('/').next().unwrap_or(url);
    let segment = segment.split(['?', '#']).next().unwrap_or(segment);
    Path::new(segment)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "video".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_stem_strips_path_query_and_extension() {
        assert_eq!(
            source_stem("https://cdn.example.com/media/clip01.mp4?sig=abc"),
            "clip01"
        );
        assert_eq!(source_stem("https://example.com/v/trailer.webm"), "trailer");
        assert_eq!(source_stem("https://example.com/"), "video");
    }

    #[test]
    fn request_without_urls_is_invalid() {
        let err = MediaRequest::default().validate().unwrap_err();
        assert_eq!(err.kind(), "validation_error");

        assert!(MediaRequest::image("https://example.com/a.jpg")
            .validate()
            .is_ok());
    }

    #[test]
    fn empty_response_serializes_to_an_empty_object() {
        let json = serde_json::to_string(&EvaluationResponse::default()).unwrap();
        assert_eq!(json, "{}");
    }
}
