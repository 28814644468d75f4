#![forbid(unsafe_code)]

//! # frame-judge
//!
//! Media evaluation through adaptive frame sampling.
//!
//! Given an image or video URL, frame-judge downloads the media, plans a
//! frame budget from the file's byte size (bigger files get fewer frames),
//! extracts evenly spaced frames across the full duration, upscales them to
//! a working resolution, and sends the evidence to a remote multimodal
//! judge. The judge's verdict comes back as opaque text; image and video
//! sides of one request run concurrently and fail independently.

pub mod config;
pub mod error;
pub mod evidence;
pub mod extract;
pub mod fetcher;
pub mod judge;
pub mod orchestrator;
pub mod prompts;
pub mod sampling;

pub use config::EvalConfig;
pub use error::{ErrorReport, EvalError};
pub use evidence::{DirFrameRecorder, FrameRecorder, NoopFrameRecorder};
pub use judge::{ArkJudge, JudgeModel};
pub use orchestrator::{EvaluationResponse, Evaluator, MediaRequest};
pub use sampling::{plan, SamplingPlan, TierLabel};
