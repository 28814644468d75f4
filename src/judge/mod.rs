//! Judge model abstraction and its hosted implementation.

pub mod ark;

pub use ark::ArkJudge;

use async_trait::async_trait;

use crate::error::EvalError;
use crate::evidence::EvidencePayload;

/// A remote multimodal model that renders a text verdict on image evidence.
///
/// The verdict is opaque to this crate: it is returned exactly as the model
/// produced it, never parsed. Implementations make exactly one network
/// attempt per call; retry policy belongs to the caller.
#[async_trait]
pub trait JudgeModel: Send + Sync {
    async fn evaluate(&self, payload: &EvidencePayload) -> Result<String, EvalError>;
}
