use std::path::Path;

use candle_core::{DType, pickle};
use safetensors::{Dtype, SafeTensors};

use super::{CheckpointError, LoadArgs, StateDict, StateTensor};

/// On-disk encodings of a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointFormat {
    /// `torch.save` archive (zip of pickled storages).
    PyTorch,
    SafeTensors,
}

impl CheckpointFormat {
    pub fn from_path(path: &Path) -> Result<Self, CheckpointError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        match extension.as_str() {
            "pt" | "pth" | "bin" | "ckpt" => Ok(CheckpointFormat::PyTorch),
            "safetensors" => Ok(CheckpointFormat::SafeTensors),
            _ => Err(CheckpointError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Read every tensor of the checkpoint as f32, with key remapping applied.
pub fn read_state_dict(args: &LoadArgs) -> Result<StateDict, CheckpointError> {
    let format = CheckpointFormat::from_path(&args.file)?;
    // Surface a missing file as an I/O error before handing the path to a decoder.
    std::fs::metadata(&args.file)?;

    let key = args.top_level_key.as_deref();
    let state = match format {
        CheckpointFormat::PyTorch => read_pytorch(&args.file, key)?,
        CheckpointFormat::SafeTensors => read_safetensors(&args.file, key)?,
    };

    if state.is_empty() {
        return Err(CheckpointError::Empty(args.file.display().to_string()));
    }

    log::debug!(
        "Read {} tensors from {} ({format:?})",
        state.len(),
        args.file.display()
    );

    state.remap(&args.key_remap)
}

fn read_pytorch(path: &Path, key: Option<&str>) -> Result<StateDict, CheckpointError> {
    let mut state = StateDict::new();

    for (name, tensor) in pickle::read_all_with_key(path, key)? {
        let shape = tensor.dims().to_vec();
        let values = tensor.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        let tensor = StateTensor::new(&name, shape, values)?;
        state.insert(name, tensor);
    }

    Ok(state)
}

fn read_safetensors(path: &Path, key: Option<&str>) -> Result<StateDict, CheckpointError> {
    let bytes = std::fs::read(path)?;
    let tensors = SafeTensors::deserialize(&bytes)?;
    let prefix = key.map(|key| format!("{key}."));
    let mut state = StateDict::new();

    for (name, view) in tensors.tensors() {
        let name = match &prefix {
            Some(prefix) => match name.strip_prefix(prefix.as_str()) {
                Some(stripped) => stripped.to_string(),
                None => continue,
            },
            None => name,
        };

        let values = decode_f32(&name, view.dtype(), view.data())?;
        let tensor = StateTensor::new(&name, view.shape().to_vec(), values)?;
        state.insert(name, tensor);
    }

    Ok(state)
}

/// Decode little-endian floating point bytes to f32.
fn decode_f32(name: &str, dtype: Dtype, data: &[u8]) -> Result<Vec<f32>, CheckpointError> {
    let values = match dtype {
        Dtype::F32 => data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        Dtype::F64 => data
            .chunks_exact(8)
            .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32)
            .collect(),
        Dtype::F16 => data
            .chunks_exact(2)
            .map(|b| half::f16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect(),
        Dtype::BF16 => data
            .chunks_exact(2)
            .map(|b| half::bf16::from_le_bytes([b[0], b[1]]).to_f32())
            .collect(),
        other => {
            return Err(CheckpointError::UnsupportedDType {
                name: name.to_string(),
                dtype: format!("{other:?}"),
            });
        }
    };

    Ok(values)
}
