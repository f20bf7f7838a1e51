//! Common fixtures for pipeline tests

#![allow(dead_code)]

use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use precomp::{DatasetRegistry, FsStorage, MemoryStorage, TrainConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Distinct RGB test image; `seed` shifts the gradient.
pub fn test_image(seed: u32, width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            ((x * 13 + seed * 29) % 256) as u8,
            ((y * 17 + seed * 7) % 256) as u8,
            ((x * y + seed) % 256) as u8,
        ])
    }))
}

/// Gray PSF with a single lit pixel in the middle of a `size` x `size` square.
pub fn impulse_psf(size: u32) -> DynamicImage {
    let center = size / 2;
    DynamicImage::ImageLuma8(GrayImage::from_fn(size, size, |x, y| {
        Luma([if x == center && y == center { 255 } else { 0 }])
    }))
}

/// Gray PSF spreading light evenly over a 3x3 box.
pub fn box_psf() -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_pixel(3, 3, Luma([40])))
}

/// `imgs` holds `count` images under `train/`, `psf` holds the given PSFs under `narrow/`.
pub fn memory_datasets(count: u32, psfs: &[DynamicImage]) -> DatasetRegistry {
    let mut storage = MemoryStorage::new();
    for i in 0..count {
        storage
            .insert_image("imgs", &format!("train/{i:03}.png"), &test_image(i, 24, 18))
            .expect("encode test image");
    }
    for (i, psf) in psfs.iter().enumerate() {
        storage
            .insert_image("psf", &format!("narrow/{i}.png"), psf)
            .expect("encode psf");
    }
    DatasetRegistry::new(Arc::new(storage))
}

/// Same layout as [`memory_datasets`], written to disk.
pub fn fs_datasets(count: u32, psfs: &[DynamicImage]) -> (TempDir, DatasetRegistry) {
    let root = TempDir::new().expect("temp dir");
    let train = root.path().join("imgs").join("train");
    let narrow = root.path().join("psf").join("narrow");
    std::fs::create_dir_all(&train).expect("create imgs");
    std::fs::create_dir_all(&narrow).expect("create psf");

    for i in 0..count {
        test_image(i, 24, 18)
            .save(train.join(format!("{i:03}.png")))
            .expect("write test image");
    }
    for (i, psf) in psfs.iter().enumerate() {
        psf.save(narrow.join(format!("{i}.png"))).expect("write psf");
    }

    let registry = DatasetRegistry::new(Arc::new(FsStorage::new(root.path())));
    (root, registry)
}

/// A complete training config document over the fixture datasets.
pub fn config_doc(batch_size: usize, sample_size: usize, workers: usize, seed: u64) -> Value {
    json!({
        "model": {"name": "unet"},
        "img": {
            "datasets": [{"name": "imgs", "subsets": ["train"]}],
            "transforms": [
                {"name": "projective4pt",
                 "x": {"name": "truncnorm", "a": -0.2, "b": 0.2},
                 "y": {"name": "truncnorm", "a": -0.2, "b": 0.2}},
                {"name": "rotate", "angle_deg": {"name": "uniform", "a": 0, "b": 364.99999}},
                {"name": "rasterize"},
                {"name": "shading", "value": {"name": "uniform", "a": -0.3, "b": 0.1}},
                {"name": "divide", "value": 255}
            ],
            "size": {"width": 16, "height": 12}
        },
        "distortion": [{
            "name": "refraction_datasets",
            "psf": {"datasets": [{"name": "psf", "subsets": ["narrow"]}]}
        }],
        "loss_function": {"name": "nrmse"},
        "batch_size": batch_size,
        "sample_size": sample_size,
        "optimizer": {"name": "adam", "learning_rate": 0.0001, "eps": 1e-8},
        "pipeline": {"seed": seed, "workers": workers}
    })
}

pub fn config(batch_size: usize, sample_size: usize, workers: usize, seed: u64) -> TrainConfig {
    parse(&config_doc(batch_size, sample_size, workers, seed))
}

pub fn parse(doc: &Value) -> TrainConfig {
    TrainConfig::from_json_str(&doc.to_string()).expect("valid test config")
}
