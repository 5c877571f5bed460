mod common;

use common::*;
use scribble_export::Predictor;
use scribble_export::checkpoint::{CheckpointError, LoadArgs, read_state_dict};

fn assert_matches_fixture(args: &LoadArgs) {
    let state = read_state_dict(args).unwrap();
    let specs = parameter_specs(&small_config());

    assert_eq!(state.len(), specs.len());
    for (index, spec) in specs.iter().enumerate() {
        let tensor = state.get(&spec.name).unwrap();
        let len = spec.shape.iter().product();
        assert_eq!(tensor.shape, spec.shape, "{}", spec.name);
        assert_eq!(tensor.values, fixture_values(index, len), "{}", spec.name);
    }
}

#[test]
fn pytorch_checkpoint_is_read() {
    assert_matches_fixture(&LoadArgs::new(fixture_path("small_unet.pt")));
}

#[test]
fn pytorch_checkpoint_loads_strictly() {
    let predictor = Predictor::<TestBackend>::with_config(
        &small_config(),
        &LoadArgs::new(fixture_path("small_unet.pt")),
        &Default::default(),
        false,
    )
    .unwrap();

    let specs = parameter_specs(&small_config());
    assert!(predictor.report().is_exact());
    assert_eq!(predictor.report().applied.len(), specs.len());

    let weight = predictor.model().dec_blocks[1]
        .conv
        .weight
        .val()
        .into_data()
        .to_vec::<f32>()
        .unwrap();
    let index = specs
        .iter()
        .position(|spec| spec.name == "dec_blocks.1.conv.weight")
        .unwrap();
    assert_eq!(weight, fixture_values(index, 6 * 12 * 3 * 3));
}

#[test]
fn nested_pytorch_checkpoint_is_read_with_its_key() {
    let args = LoadArgs::new(fixture_path("small_unet_nested.pt")).with_top_level_key("state_dict");

    assert_matches_fixture(&args);

    let predictor =
        Predictor::<TestBackend>::with_config(&small_config(), &args, &Default::default(), false)
            .unwrap();
    assert!(predictor.report().is_exact());
}

#[test]
fn nested_pytorch_checkpoint_without_its_key_is_empty() {
    let result = read_state_dict(&LoadArgs::new(fixture_path("small_unet_nested.pt")));

    assert!(matches!(result, Err(CheckpointError::Empty(_))));
}

#[test]
fn key_remap_applies_to_pytorch_checkpoints() {
    let args = LoadArgs::new(fixture_path("small_unet.pt"))
        .with_key_remap(r"out_conv\.(.*)", "head.$1")
        .unwrap();

    let state = read_state_dict(&args).unwrap();

    assert!(state.get("out_conv.conv.weight").is_none());
    assert_eq!(state.get("head.conv.weight").unwrap().shape, vec![1, 4, 1, 1]);
}

#[test]
fn colliding_key_remap_is_rejected() {
    let args = LoadArgs::new(fixture_path("small_unet.pt"))
        .with_key_remap(r"(enc|dec)_blocks\.0\.(.*)", "blocks.0.$2")
        .unwrap();

    let result = read_state_dict(&args);

    assert!(matches!(
        result,
        Err(CheckpointError::DuplicateKey { ref key, .. }) if key == "blocks.0.conv.bias"
    ));
}
