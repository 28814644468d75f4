//! Runtime configuration, read from the environment once at startup.
//!
//! Every component takes what it needs from an [`EvalConfig`] built at process
//! start; nothing reads environment state after construction.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::EvalError;

pub const DEFAULT_JUDGE_BASE_URL: &str = "https://ark.cn-beijing.volces.com/api/v3";
pub const DEFAULT_JUDGE_MODEL: &str = "doubao-seed-1-8-251228";
pub const DEFAULT_DEBUG_FRAME_DIR: &str = "logs/debug_frames";

const DEFAULT_JUDGE_TIMEOUT_SECS: u64 = 120;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_IMAGE_BYTES: u64 = 64 * 1024 * 1024;

/// Bounded retry with exponential backoff, shared by the fetcher and the
/// orchestrator's judge loop.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (2 retries = 3 attempts total).
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Delay before retry number `attempt` (0-based): base * 2^attempt, capped.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2u64.pow(attempt.min(5));
    base * multiplier as u32
}

/// Connection settings for the remote judge model.
#[derive(Debug, Clone)]
pub struct JudgeConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub timeout: Duration,
}

/// Immutable process-wide configuration.
#[derive(Debug, Clone)]
pub struct EvalConfig {
    pub judge: JudgeConfig,
    pub fetch_timeout: Duration,
    pub retry: RetryPolicy,
    /// Hard cap on image bodies; videos are bounded by the size ceiling.
    pub max_image_bytes: u64,
    /// Root directory for debug frame capture; `None` disables it.
    pub debug_frame_dir: Option<PathBuf>,
    /// Permits for CPU-bound decode/resize work on the blocking pool.
    pub decode_parallelism: usize,
}

impl EvalConfig {
    /// Read configuration from the environment. `ARK_API_KEY` is required;
    /// everything else falls back to defaults.
    pub fn from_env() -> Result<Self, EvalError> {
        let api_key =
            std::env::var("ARK_API_KEY").map_err(|_| EvalError::config("ARK_API_KEY not set"))?;

        let base_url =
            std::env::var("ARK_BASE_URL").unwrap_or_else(|_| DEFAULT_JUDGE_BASE_URL.into());

        let model = std::env::var("ARK_MODEL").unwrap_or_else(|_| DEFAULT_JUDGE_MODEL.into());

        let debug_frame_dir = if env_flag("SAVE_DEBUG_FRAMES") {
            let root = std::env::var("DEBUG_FRAME_DIR")
                .unwrap_or_else(|_| DEFAULT_DEBUG_FRAME_DIR.into());
            Some(PathBuf::from(root))
        } else {
            None
        };

        Ok(Self {
            judge: JudgeConfig {
                base_url,
                model,
                api_key,
                timeout: env_duration_secs("ARK_TIMEOUT_SECONDS", DEFAULT_JUDGE_TIMEOUT_SECS),
            },
            fetch_timeout: env_duration_secs("FETCH_TIMEOUT_SECONDS", DEFAULT_FETCH_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            debug_frame_dir,
            decode_parallelism: decode_parallelism_from_env(),
        })
    }
}

fn env_duration_secs(name: &str, default_secs: u64) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(default_secs))
}

fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).ok().as_deref(),
        Some("1") | Some("true") | Some("True") | Some("TRUE")
    )
}

fn decode_parallelism_from_env() -> usize {
    std::env::var("DECODE_PARALLELISM")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
}
