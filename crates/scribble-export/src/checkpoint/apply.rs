use burn::tensor::backend::Backend;

use super::{CheckpointError, LoadReport, StateDict};
use crate::model::UNet;

impl<B: Backend> UNet<B> {
    /// Copy the tensors of `state` into the matching parameters.
    ///
    /// Shape mismatches are always an error. Missing and unexpected keys are an error when
    /// `strict`, otherwise they are logged and the missing parameters keep their
    /// initialization.
    pub fn load_state_dict(
        self,
        mut state: StateDict,
        strict: bool,
        device: &B::Device,
    ) -> Result<(Self, LoadReport), CheckpointError> {
        let report = state.verify(&self.parameter_specs()).check(strict)?;

        for name in report.missing.iter() {
            log::warn!("Parameter {name} not found in checkpoint, keeping its initialization");
        }
        for name in report.unexpected.iter() {
            log::warn!("Ignoring unexpected checkpoint entry {name}");
        }

        let model = self.map_blocks(|prefix, block| {
            let weight = state
                .remove(&format!("{prefix}.conv.weight"))
                .map(|tensor| tensor.into_data());
            let bias = state
                .remove(&format!("{prefix}.conv.bias"))
                .map(|tensor| tensor.into_data());

            block.with_parameters(weight, bias, device)
        });

        log::debug!("{report}");

        Ok((model, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::StateTensor;
    use crate::model::UNetConfig;
    use burn::tensor::Tensor;

    type TestBackend = burn::backend::NdArray;

    fn model() -> UNet<TestBackend> {
        UNetConfig::new()
            .with_features(vec![2, 3])
            .init(&Default::default())
    }

    /// A state dict covering every parameter, filled with `value`.
    fn full_state(model: &UNet<TestBackend>, value: f32) -> StateDict {
        model
            .parameter_specs()
            .into_iter()
            .map(|spec| {
                let len = spec.shape.iter().product();
                let tensor = StateTensor::new(&spec.name, spec.shape, vec![value; len]).unwrap();
                (spec.name, tensor)
            })
            .collect()
    }

    fn bias_of(model: &UNet<TestBackend>) -> Vec<f32> {
        model
            .out_conv
            .conv
            .bias
            .as_ref()
            .unwrap()
            .val()
            .into_data()
            .to_vec::<f32>()
            .unwrap()
    }

    #[test]
    fn every_parameter_is_replaced() {
        let device = Default::default();
        let model = model();
        let state = full_state(&model, 0.25);

        let (model, report) = model.load_state_dict(state, true, &device).unwrap();

        assert!(report.is_exact());
        assert_eq!(report.applied.len(), 8);
        assert_eq!(bias_of(&model), vec![0.25]);
        for (_, block) in model.blocks() {
            let weight = block.conv.weight.val().into_data().to_vec::<f32>().unwrap();
            assert!(weight.iter().all(|v| *v == 0.25));
        }
    }

    #[test]
    fn loaded_weights_drive_the_forward_pass() {
        let device = Default::default();
        let model = model();
        let state = full_state(&model, 0.0);

        let (model, _) = model.load_state_dict(state, true, &device).unwrap();
        let output = model.forward(Tensor::ones([1, 5, 4, 4], &device));

        let values = output.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn strict_loading_rejects_missing_keys() {
        let device = Default::default();
        let model = model();
        let mut state = full_state(&model, 1.0);
        state.remove("dec_blocks.0.conv.bias");

        let err = model.load_state_dict(state, true, &device).unwrap_err();

        match err {
            CheckpointError::StrictMismatch(report) => {
                assert_eq!(report.missing, vec!["dec_blocks.0.conv.bias".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn lenient_loading_keeps_missing_parameters() {
        let device = Default::default();
        let model = model();
        let initial = bias_of(&model);
        let mut state = full_state(&model, 1.0);
        state.remove("out_conv.conv.bias");
        state.insert(
            "out_conv.conv.running_mean",
            StateTensor::new("out_conv.conv.running_mean", vec![1], vec![0.0]).unwrap(),
        );

        let (model, report) = model.load_state_dict(state, false, &device).unwrap();

        assert_eq!(report.missing.len(), 1);
        assert_eq!(report.unexpected.len(), 1);
        assert_eq!(bias_of(&model), initial);
    }
}
