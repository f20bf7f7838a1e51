//! Render training pairs from a pipeline config to PNG files.
//!
//! Each sample is written as `e{epoch}_b{batch}_s{slot}_input.png` and
//! `..._target.png`, and the NRMSE between input and target is logged per
//! batch, which is a quick way to eyeball how strong the configured
//! distortion is.

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use precomp::collaborators::LossFunction;
use precomp::{BatchAssembler, DatasetRegistry, FsStorage, NormalizedRootMse, TrainConfig};
use shared::image_proc::array3_to_dynamic_image;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Render precompensation training pairs",
    long_about = "Builds the sample pipeline described by a JSON training config and \
writes the produced input/target pairs as PNG images."
)]
struct Args {
    /// Training config (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Directory containing one subdirectory per dataset
    #[arg(short, long)]
    data_root: PathBuf,

    /// Output directory for rendered PNGs
    #[arg(short, long, default_value = "samples_out")]
    output: PathBuf,

    /// Number of epochs to render
    #[arg(long, default_value_t = 1)]
    epochs: usize,

    /// Stop each epoch after this many batches
    #[arg(long)]
    max_batches: Option<usize>,

    /// Override the config's pipeline seed
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = TrainConfig::from_path(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;
    if let Some(seed) = args.seed {
        config.pipeline.seed = seed;
    }

    let datasets = DatasetRegistry::new(Arc::new(FsStorage::new(&args.data_root)));
    let mut assembler =
        BatchAssembler::from_config(&config, datasets).context("Failed to build sample pipeline")?;

    let loss = NormalizedRootMse {
        invert: false,
        ..Default::default()
    };
    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;

    info!(
        "Rendering {} epoch(s) of {} samples at {} into {}",
        args.epochs,
        assembler.plan().samples_per_epoch(),
        assembler.producer().output_size(),
        args.output.display()
    );

    let mut written = 0usize;
    for epoch_number in 0..args.epochs {
        let limit = args.max_batches.unwrap_or(usize::MAX);
        for batch in assembler.epoch().take(limit) {
            let batch = batch.with_context(|| format!("Epoch {epoch_number} failed"))?;

            let mut total_nrmse = 0.0;
            let mut scored = 0usize;
            for (slot, sample) in batch.samples.iter().enumerate() {
                let stem = format!("e{epoch_number}_b{}_s{slot}", batch.index);
                for (suffix, pixels) in [("input", &sample.input_image), ("target", &sample.target_image)] {
                    let path = args.output.join(format!("{stem}_{suffix}.png"));
                    array3_to_dynamic_image(pixels, sample.white_level)
                        .context("Failed to convert sample to an image")?
                        .save(&path)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    written += 1;
                }

                match loss.compute(sample.input_image.view(), sample.target_image.view()) {
                    Ok(value) => {
                        total_nrmse += value;
                        scored += 1;
                    }
                    Err(e) => warn!("Sample {} ({}): {}", sample.index, sample.source, e),
                }
            }

            if scored > 0 {
                info!(
                    "Epoch {} batch {}: {} samples, mean NRMSE {:.4}",
                    epoch_number,
                    batch.index,
                    batch.len(),
                    total_nrmse / scored as f64
                );
            }
        }
    }

    info!("Wrote {} images", written);
    Ok(())
}
