#![allow(dead_code)]

use std::path::Path;

use safetensors::Dtype;
use safetensors::tensor::TensorView;
use scribble_export::model::{ParamSpec, UNetConfig};

pub type TestBackend = burn::backend::NdArray<f32>;

/// A four level network small enough to trace quickly.
pub fn small_config() -> UNetConfig {
    UNetConfig::new().with_features(vec![4, 6, 6, 8])
}

pub fn parameter_specs(config: &UNetConfig) -> Vec<ParamSpec> {
    config
        .init::<TestBackend>(&Default::default())
        .parameter_specs()
}

/// Deterministic values in `[-0.25, 0.25]`, different for every tensor.
///
/// Multiples of 1/32, so they are exact in f32. `tests/fixtures/small_unet.py` writes the
/// same values into the `.pt` fixtures.
pub fn fixture_values(index: usize, len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| (((i * 7 + index * 13) % 17) as f32 - 8.0) / 32.0)
        .collect()
}

/// Path of a checked-in fixture under `tests/fixtures`.
pub fn fixture_path(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Write `specs` as a safetensors checkpoint filled with [fixture_values].
pub fn write_checkpoint(path: &Path, specs: &[ParamSpec]) {
    let data: Vec<(String, Vec<usize>, Vec<u8>)> = specs
        .iter()
        .enumerate()
        .map(|(index, spec)| {
            let len = spec.shape.iter().product();
            let bytes = fixture_values(index, len)
                .iter()
                .flat_map(|v| v.to_le_bytes())
                .collect();
            (spec.name.clone(), spec.shape.clone(), bytes)
        })
        .collect();

    let views: Vec<(String, TensorView<'_>)> = data
        .iter()
        .map(|(name, shape, bytes)| {
            (
                name.clone(),
                TensorView::new(Dtype::F32, shape.clone(), bytes).unwrap(),
            )
        })
        .collect();

    let bytes = safetensors::serialize(views, &None).unwrap();
    std::fs::write(path, bytes).unwrap();
}

/// Deterministic input of the given shape.
pub fn input_values(shape: [usize; 4]) -> Vec<f32> {
    let len = shape.iter().product();
    (0..len).map(|i| ((i as f32) * 0.11).cos()).collect()
}
