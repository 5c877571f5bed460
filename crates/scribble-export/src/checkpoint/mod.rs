//! Reading trained weights into a [UNet](crate::model::UNet).
//!
//! Checkpoints are flat `name -> tensor` maps, either saved with `torch.save` or as
//! safetensors. Loading is strict by default: every parameter of the network must be
//! present with the expected shape, and the checkpoint must not carry anything else.

mod apply;
mod reader;
mod state_dict;

pub use reader::*;
pub use state_dict::*;

use std::path::PathBuf;

use burn::tensor::backend::Backend;
use regex::Regex;

use crate::model::UNet;

/// Errors raised while reading or applying a checkpoint.
#[derive(thiserror::Error, Debug)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read PyTorch checkpoint: {0}")]
    CandlePickle(#[from] candle_core::Error),

    #[error("Failed to read safetensors checkpoint: {0}")]
    SafeTensors(#[from] safetensors::SafeTensorError),

    #[error("Unsupported checkpoint format: {0} (expected .pt, .pth, .bin, .ckpt or .safetensors)")]
    UnsupportedFormat(String),

    #[error("Unsupported element type {dtype} for tensor {name}")]
    UnsupportedDType { name: String, dtype: String },

    #[error("Invalid key remapping pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("No tensors found in checkpoint {0}")]
    Empty(String),

    #[error("{0}")]
    StrictMismatch(LoadReport),

    #[error("Key remapping maps both {first} and {second} to {key}")]
    DuplicateKey {
        key: String,
        first: String,
        second: String,
    },

    #[error("Tensor {name} has {actual} values, which does not fill shape {shape:?}")]
    CorruptTensor {
        name: String,
        shape: Vec<usize>,
        actual: usize,
    },
}

/// Arguments for loading a checkpoint.
///
/// # Examples
///
/// ```no_run
/// use scribble_export::checkpoint::LoadArgs;
///
/// let args = LoadArgs::new("checkpoints/unet.pt".into())
///     .with_key_remap("module\\.(.*)", "$1") // Strip the DataParallel prefix
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct LoadArgs {
    /// The path to the file to load.
    pub file: PathBuf,

    /// Entry of the top-level dictionary holding the state dict, if it is nested.
    pub top_level_key: Option<String>,

    /// A list of key remappings.
    pub key_remap: Vec<(Regex, String)>,

    /// Reject missing and unexpected keys.
    pub strict: bool,
}

impl LoadArgs {
    /// Create a new `LoadArgs` instance with strict loading.
    pub fn new(file: PathBuf) -> Self {
        Self {
            file,
            top_level_key: None,
            key_remap: Vec::new(),
            strict: true,
        }
    }

    pub fn with_top_level_key(mut self, key: &str) -> Self {
        self.top_level_key = Some(key.into());
        self
    }

    /// Set key remapping.
    ///
    /// The pattern is anchored at both ends. See
    /// [Regex](https://docs.rs/regex/latest/regex/#syntax) for the pattern syntax and
    /// [Replacement](https://docs.rs/regex/latest/regex/struct.Regex.html#method.replace)
    /// for the replacement syntax.
    pub fn with_key_remap(
        mut self,
        pattern: &str,
        replacement: &str,
    ) -> Result<Self, CheckpointError> {
        let regex = Regex::new(&format!("^{pattern}$"))?;

        self.key_remap.push((regex, replacement.into()));
        Ok(self)
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

impl From<PathBuf> for LoadArgs {
    fn from(val: PathBuf) -> Self {
        LoadArgs::new(val)
    }
}

impl From<String> for LoadArgs {
    fn from(val: String) -> Self {
        LoadArgs::new(val.into())
    }
}

impl From<&str> for LoadArgs {
    fn from(val: &str) -> Self {
        LoadArgs::new(val.into())
    }
}

/// Read the checkpoint described by `args` and copy its tensors into `model`.
pub fn load_checkpoint<B: Backend>(
    model: UNet<B>,
    args: &LoadArgs,
    device: &B::Device,
) -> Result<(UNet<B>, LoadReport), CheckpointError> {
    let state = read_state_dict(args)?;

    model.load_state_dict(state, args.strict, device)
}
