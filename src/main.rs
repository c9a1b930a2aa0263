use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, Level};

use rust_sfm::config::PipelineConfig;
use rust_sfm::geometry::Intrinsics;
use rust_sfm::io::images::{ColorSource, ImageSequence};
use rust_sfm::io::{export_viewer_scene, write_ply, PrecomputedFeatures};
use rust_sfm::system::run_reconstruction;

/// Run the full structure-from-motion pipeline on a directory of images.
#[derive(Debug, Parser)]
#[command(name = "rust_sfm", version)]
struct Args {
    /// Input image directory.
    #[arg(long, default_value = "data")]
    data: PathBuf,

    /// Output directory.
    #[arg(long, default_value = "results")]
    out: PathBuf,

    /// Directory with `<stem>.features.json` sidecars (defaults to --data).
    #[arg(long)]
    features: Option<PathBuf>,

    /// JSON pipeline configuration; missing fields use defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Default log level, overridden by RUST_LOG.
    #[arg(long, default_value_t = Level::INFO)]
    log_level: Level,
}

fn main() -> Result<()> {
    let args = Args::parse();
    rust_sfm::init_logger_with_level(args.log_level);

    let config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("Failed to create output directory {}", args.out.display()))?;

    let images = ImageSequence::from_dir(&args.data)
        .with_context(|| format!("Failed to list images in {}", args.data.display()))?;
    if images.len() < 2 {
        bail!("Need at least 2 images, found {} in {}", images.len(), args.data.display());
    }
    info!("Loaded {} images from {}", images.len(), args.data.display());

    let (width, height) = images
        .dimensions(0)
        .with_context(|| format!("Failed to read {:?}", images.path(0)))?;
    let intrinsics = Intrinsics::from_image_size(width, height, &config.camera);
    info!(
        "Intrinsics: fx {:.1}, fy {:.1}, cx {:.1}, cy {:.1}",
        intrinsics.fx, intrinsics.fy, intrinsics.cx, intrinsics.cy
    );

    let provider = PrecomputedFeatures::new(args.features.as_ref().unwrap_or(&args.data));
    let fallback = config.triangulation.fallback_color;
    let colors = |index: usize| -> Box<dyn ColorSource> { images.color_source(index, fallback) };

    let (map, summary) = run_reconstruction(images.names(), intrinsics, &provider, colors, config)
        .context("Reconstruction failed")?;

    let cloud = args.out.join("final_cloud.ply");
    write_ply(&cloud, map.points()).with_context(|| format!("Failed to write {}", cloud.display()))?;
    export_viewer_scene(&args.out, &map, "model.ply")
        .with_context(|| format!("Failed to export viewer scene to {}", args.out.display()))?;

    info!(
        "Done: {} cameras, {} points, {} skipped, {} BA runs",
        summary.registered.len(),
        summary.num_points,
        summary.skipped.len(),
        summary.ba_runs
    );
    Ok(())
}
