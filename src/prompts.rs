//! Instruction templates for the multimodal judge.
//!
//! Domain logic for rendering evaluation instructions. Provider-agnostic:
//! the judge client decides how text and images travel on the wire.

// =============================================================================
// Rendered instructions
// =============================================================================

/// Rendered instruction ready to pair with image evidence.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub template_slug: String,
    pub system: String,
    pub user: String,
}

/// An instruction template with placeholders.
#[derive(Debug, Clone, Copy)]
pub struct EvalTemplate {
    pub slug: &'static str,
    pub system: &'static str,
    pub user: &'static str,
}

impl EvalTemplate {
    /// Substitute the sampled frame count into the template. The image
    /// template carries no placeholder and renders unchanged.
    pub fn render(&self, frame_count: usize) -> Instruction {
        let count = frame_count.to_string();
        Instruction {
            template_slug: self.slug.to_string(),
            system: self.system.replace("{frame_count}", &count).trim().to_string(),
            user: self.user.replace("{frame_count}", &count).trim().to_string(),
        }
    }
}

// =============================================================================
// Standard templates
// =============================================================================

pub const IMAGE_EVAL: EvalTemplate = EvalTemplate {
    slug: "image-quality",
    system: r#"You are an expert reviewer of user-submitted media. You judge a single still image for visual quality and content compliance: sharpness, exposure, watermarks or overlaid text, and any content that violates common platform policy (nudity, graphic violence, illegal activity).

Output only valid JSON with verdict ("pass" or "fail"), confidence (0.0-1.0), and reason.
Example:
{"verdict": "pass", "confidence": 0.92, "reason": "clean product shot, no policy concerns"}"#,
    user: r#"Review the attached image.

Return a JSON object with your verdict.
json:"#,
};

pub const VIDEO_EVAL: EvalTemplate = EvalTemplate {
    slug: "video-compliance",
    system: r#"You are an expert reviewer of user-submitted media. You are given {frame_count} frames sampled uniformly across the full duration of one video, in temporal order. Judge the video as a whole for visual quality and content compliance: sharpness, exposure, watermarks or overlaid text, and any content that violates common platform policy (nudity, graphic violence, illegal activity). A violation visible in any single frame fails the whole video.

Output only valid JSON with verdict ("pass" or "fail"), confidence (0.0-1.0), and reason.
Example:
{"verdict": "fail", "confidence": 0.88, "reason": "watermark overlay visible from the third frame onward"}"#,
    user: r#"Review the attached {frame_count} frames. They cover the entire video from start to finish.

Return a JSON object with your verdict.
json:"#,
};

pub const TEMPLATES: &[EvalTemplate] = &[IMAGE_EVAL, VIDEO_EVAL];

pub fn template_by_slug(slug: &str) -> Option<EvalTemplate> {
    TEMPLATES.iter().find(|t| t.slug == slug).copied()
}

// =============================================================================
// TESTS
// =============================================================================
