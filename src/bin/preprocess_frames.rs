//! preprocess_frames - run the preprocessing core over image files or a
//! synthetic scene and print one JSON result per frame, then statistics.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

use crowd_preprocess::ingest::{FileConfig, FileSource, SceneBuilder, SyntheticSource};
use crowd_preprocess::{LocalAnalysisResult, PreprocessConfig, PreprocessingService};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Source id the frames are attributed to.
    #[arg(long, default_value = "cam_A")]
    source: String,
    /// Config file (JSON, or TOML by extension). Falls back to CROWD_PREPROCESS_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Image files to process in order.
    #[arg(long, num_args = 1.., conflicts_with = "synthetic")]
    images: Vec<PathBuf>,
    /// Number of synthetic frames to generate instead of reading files.
    #[arg(long)]
    synthetic: Option<u64>,
    /// Silhouettes per synthetic frame.
    #[arg(long, default_value_t = 3)]
    persons: usize,
    /// Seed for synthetic noise frames.
    #[arg(long, default_value_t = 7)]
    seed: u64,
    /// Synthetic frame size.
    #[arg(long, default_value_t = 320)]
    width: u32,
    #[arg(long, default_value_t = 240)]
    height: u32,
    /// Horizontal drift of synthetic figures per frame, in pixels.
    #[arg(long, default_value_t = 2)]
    step: i32,
    /// Emit a noise frame every N synthetic frames (0 disables).
    #[arg(long, default_value_t = 0)]
    noise_every: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = match args.config.as_deref() {
        Some(path) => PreprocessConfig::from_path(path)?,
        None => PreprocessConfig::load()?,
    };
    let service = PreprocessingService::new(config)?;

    match (args.synthetic, args.images.is_empty()) {
        (Some(frames), _) => {
            let scene = SceneBuilder::new(args.width, args.height);
            let mut source = SyntheticSource::new(scene, args.persons, args.seed)
                .with_step(args.step)
                .with_noise_every(args.noise_every);
            for _ in 0..frames {
                let frame = source.next_frame();
                let result = service.preprocess(&frame, &args.source)?;
                print_result(&result)?;
            }
            log::info!("processed {} synthetic frames", source.frames_generated());
        }
        (None, false) => {
            let mut source = FileSource::new(FileConfig {
                paths: args.images.clone(),
            })?;
            while let Some((path, frame)) = source.next_frame()? {
                log::debug!("processing {}", path.display());
                let result = service.preprocess(&frame, &args.source)?;
                print_result(&result)?;
            }
            log::info!("processed {} image files", source.stats().frames_read);
        }
        (None, true) => {
            return Err(anyhow!("nothing to process: pass --images or --synthetic"));
        }
    }

    println!("{}", serde_json::to_string_pretty(&service.get_statistics())?);
    Ok(())
}

fn print_result(result: &LocalAnalysisResult) -> Result<()> {
    println!("{}", serde_json::to_string(result)?);
    Ok(())
}
