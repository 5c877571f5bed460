use core::fmt;

use burn::tensor::backend::Backend;

/// CPU backend, always available.
pub type CpuBackend = burn::backend::NdArray<f32>;

/// GPU backend. WGPU picks the best adapter of the machine, discrete or integrated.
#[cfg(feature = "wgpu")]
pub type GpuBackend = burn::backend::Wgpu;

/// Where the network is moved before export.
#[derive(clap::ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DevicePreference {
    /// The accelerator compiled in with the `wgpu` feature, else the CPU.
    ///
    /// The choice is made at build time. A `wgpu` build always selects WGPU's default
    /// adapter and does not fall back to the CPU at runtime when no adapter is usable.
    /// Pass `cpu` explicitly on such machines.
    #[default]
    Auto,
    Cpu,
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DevicePreference::Auto => f.write_str("auto"),
            DevicePreference::Cpu => f.write_str("cpu"),
        }
    }
}

/// Work that can run on any backend.
///
/// Backends are type parameters, so the choice made at runtime is turned into a call of
/// [run](BackendTask::run) with the matching backend type.
pub trait BackendTask {
    type Output;

    fn run<B: Backend>(self, device: B::Device) -> Self::Output;
}

/// Run `task` on the device selected by `preference`.
pub fn dispatch<T: BackendTask>(preference: DevicePreference, task: T) -> T::Output {
    if preference == DevicePreference::Auto {
        #[cfg(feature = "wgpu")]
        {
            let device = burn::backend::wgpu::WgpuDevice::default();
            log::info!("Using accelerator device {device:?}");
            return task.run::<GpuBackend>(device);
        }

        #[cfg(not(feature = "wgpu"))]
        log::debug!("Built without an accelerator backend, falling back to the CPU");
    }

    let device = burn::backend::ndarray::NdArrayDevice::Cpu;
    log::info!("Using CPU device {device:?}");
    task.run::<CpuBackend>(device)
}
