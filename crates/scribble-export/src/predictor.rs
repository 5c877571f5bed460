use std::path::Path;

use burn::module::Module;
use burn::tensor::backend::Backend;

use crate::checkpoint::{LoadArgs, LoadReport, load_checkpoint};
use crate::error::Error;
use crate::model::{UNet, UNetConfig};
use crate::onnx::{ExportConfig, ExportSummary, export_onnx};

/// A trained ScribblePrompt network, ready for export.
///
/// Construction runs the whole preparation sequence: the architecture is built and the
/// checkpoint loaded on the backend's default device, gradient tracking is disabled and
/// the network is moved to the requested device.
#[derive(Debug)]
pub struct Predictor<B: Backend> {
    model: UNet<B>,
    device: B::Device,
    report: LoadReport,
}

impl<B: Backend> Predictor<B> {
    pub fn new(args: &LoadArgs, device: &B::Device, verbose: bool) -> Result<Self, Error> {
        Self::with_config(&UNetConfig::new(), args, device, verbose)
    }

    pub fn with_config(
        config: &UNetConfig,
        args: &LoadArgs,
        device: &B::Device,
        verbose: bool,
    ) -> Result<Self, Error> {
        let init_device = B::Device::default();
        let model = config.init::<B>(&init_device);
        let (model, report) = load_checkpoint(model, args, &init_device)?;
        let model = model.no_grad().to_device(device);

        if verbose {
            log::info!(
                "loaded checkpoint from {} to {device:?}",
                args.file.display()
            );
        }

        Ok(Self {
            model,
            device: device.clone(),
            report,
        })
    }

    pub fn model(&self) -> &UNet<B> {
        &self.model
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// How the checkpoint matched the network.
    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    pub fn export_to_onnx(
        &self,
        path: &Path,
        config: &ExportConfig,
    ) -> Result<ExportSummary, Error> {
        let summary = export_onnx(&self.model, &self.device, config, path)?;
        log::info!("model exported to {}", path.display());

        Ok(summary)
    }
}
