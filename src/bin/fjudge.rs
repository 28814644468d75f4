#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use frame_judge::evidence::{DirFrameRecorder, FrameRecorder, NoopFrameRecorder};
use frame_judge::judge::{ArkJudge, JudgeModel};
use frame_judge::orchestrator::{Evaluator, MediaRequest};
use frame_judge::{prompts, sampling, EvalConfig};

#[derive(Parser)]
#[command(
    name = "fjudge",
    version,
    about = "Media evaluation via adaptive frame sampling"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate an image and/or a video by URL
    Evaluate {
        #[arg(long)]
        image_url: Option<String>,

        #[arg(long)]
        video_url: Option<String>,

        /// Save sampled frames under this directory
        #[arg(long)]
        debug_frames: Option<PathBuf>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the sampling plan for a video of the given byte size
    Plan {
        #[arg(long)]
        bytes: u64,
    },
    /// Print a rendered instruction template
    Template {
        /// Template slug, e.g. "video-compliance"
        #[arg(long)]
        slug: String,

        /// Frame count to substitute into the template
        #[arg(long, default_value_t = 1)]
        frames: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Plan { bytes } => {
            // Surface the rejection as its message, not the raw variant.
            let plan = sampling::plan(bytes).map_err(|err| err.to_string())?;
            println!(
                "tier {} -> max {} frames @ {} fps",
                plan.tier.as_str(),
                plan.max_frames,
                plan.sampling_fps
            );
        }
        Commands::Template { slug, frames } => {
            let template = prompts::template_by_slug(&slug).ok_or_else(|| {
                let known: Vec<&str> = prompts::TEMPLATES.iter().map(|t| t.slug).collect();
                format!("unknown template {slug:?} (known: {})", known.join(", "))
            })?;
            let instruction = template.render(frames);
            println!("system:\n{}\n", instruction.system);
            println!("user:\n{}", instruction.user);
        }
        Commands::Evaluate {
            image_url,
            video_url,
            debug_frames,
            json,
        } => {
            if image_url.is_none() && video_url.is_none() {
                return Err("evaluate requires --image-url and/or --video-url".into());
            }

            let mut config = EvalConfig::from_env()?;
            if let Some(dir) = debug_frames {
                config.debug_frame_dir = Some(dir);
            }

            let judge: Arc<dyn JudgeModel> = Arc::new(ArkJudge::new(&config.judge)?);
            let recorder: Arc<dyn FrameRecorder> = match &config.debug_frame_dir {
                Some(root) => Arc::new(DirFrameRecorder::new(root.clone())),
                None => Arc::new(NoopFrameRecorder),
            };
            let evaluator = Evaluator::new(config, judge, recorder)?;

            let request = MediaRequest {
                image_url,
                video_url,
            };
            let response = evaluator.handle(request).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                if let Some(verdict) = &response.image_result {
                    println!("image verdict:\n{verdict}\n");
                }
                if let Some(verdict) = &response.video_result {
                    println!("video verdict:\n{verdict}\n");
                }
                if let Some(err) = &response.image_error {
                    eprintln!("image failed [{}]: {}", err.kind, err.message);
                }
                if let Some(err) = &response.video_error {
                    eprintln!("video failed [{}]: {}", err.kind, err.message);
                }
                if response.image_result.is_none() && response.video_result.is_none() {
                    return Err("evaluation produced no verdict".into());
                }
            }
        }
    }

    Ok(())
}
