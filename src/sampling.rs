//! Size-tier sampling plans.
//!
//! The plan for a video is decided from its byte size alone, before any
//! decoding: bigger files get fewer frames at a lower sampling rate, and
//! anything past the ceiling is rejected outright.

use crate::error::EvalError;

const MIB: u64 = 1024 * 1024;

/// Largest video body the pipeline will plan for.
pub const SIZE_CEILING_BYTES: u64 = 256 * MIB;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierLabel {
    Small,
    Medium,
    Large,
    Huge,
}

impl TierLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierLabel::Small => "small",
            TierLabel::Medium => "medium",
            TierLabel::Large => "large",
            TierLabel::Huge => "huge",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Tier {
    /// Inclusive upper bound for this tier.
    pub max_bytes: u64,
    pub max_frames: u32,
    pub sampling_fps: f64,
    pub label: TierLabel,
}

/// Ordered smallest to largest; the last tier's bound is the ceiling.
pub const TIERS: &[Tier] = &[
    Tier {
        max_bytes: 16 * MIB,
        max_frames: 32,
        sampling_fps: 2.0,
        label: TierLabel::Small,
    },
    Tier {
        max_bytes: 64 * MIB,
        max_frames: 24,
        sampling_fps: 1.0,
        label: TierLabel::Medium,
    },
    Tier {
        max_bytes: 128 * MIB,
        max_frames: 16,
        sampling_fps: 0.5,
        label: TierLabel::Large,
    },
    Tier {
        max_bytes: SIZE_CEILING_BYTES,
        max_frames: 8,
        sampling_fps: 0.25,
        label: TierLabel::Huge,
    },
];

/// Frame budget and sampling rate for one video.
#[derive(Debug, Clone, Copy)]
pub struct SamplingPlan {
    pub max_frames: u32,
    pub sampling_fps: f64,
    pub tier: TierLabel,
}

/// Map a byte size to its sampling plan, or reject it past the ceiling.
pub fn plan(byte_size: u64) -> Result<SamplingPlan, EvalError> {
    for tier in TIERS {
        if byte_size <= tier.max_bytes {
            return Ok(SamplingPlan {
                max_frames: tier.max_frames,
                sampling_fps: tier.sampling_fps,
                tier: tier.label,
            });
        }
    }
    Err(EvalError::size_rejected(byte_size, SIZE_CEILING_BYTES))
}
