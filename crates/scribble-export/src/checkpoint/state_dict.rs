use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt;

use burn::tensor::TensorData;
use regex::Regex;

use super::CheckpointError;
use crate::model::ParamSpec;

/// A dense f32 tensor read from a checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct StateTensor {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl StateTensor {
    /// Check that `values` fills `shape` exactly.
    pub fn new(name: &str, shape: Vec<usize>, values: Vec<f32>) -> Result<Self, CheckpointError> {
        let expected = shape.iter().product::<usize>();
        if expected != values.len() {
            return Err(CheckpointError::CorruptTensor {
                name: name.to_string(),
                shape,
                actual: values.len(),
            });
        }

        Ok(Self { shape, values })
    }

    pub fn into_data(self) -> TensorData {
        TensorData::new(self.values, self.shape)
    }
}

/// Parameter name to tensor mapping, ordered by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDict {
    tensors: BTreeMap<String, StateTensor>,
}

impl StateDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: StateTensor) -> Option<StateTensor> {
        self.tensors.insert(name.into(), tensor)
    }

    pub fn get(&self, name: &str) -> Option<&StateTensor> {
        self.tensors.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<StateTensor> {
        self.tensors.remove(name)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, StateTensor> {
        self.tensors.iter()
    }

    /// Rename the entries according to the key remapping rules. The first matching
    /// pattern wins; entries matching no pattern keep their name.
    ///
    /// Two entries renamed to the same key are an error, since one of them would be lost.
    pub fn remap(self, rules: &[(Regex, String)]) -> Result<Self, CheckpointError> {
        if rules.is_empty() {
            return Ok(self);
        }

        let mut tensors = BTreeMap::new();
        let mut sources: BTreeMap<String, String> = BTreeMap::new();

        for (name, tensor) in self.tensors {
            let new_name = rules
                .iter()
                .find(|(pattern, _)| pattern.is_match(&name))
                .map(|(pattern, replacement)| {
                    pattern.replace_all(&name, replacement.as_str()).to_string()
                })
                .unwrap_or_else(|| name.clone());

            if let Some(first) = sources.get(&new_name) {
                return Err(CheckpointError::DuplicateKey {
                    key: new_name,
                    first: first.clone(),
                    second: name,
                });
            }

            if new_name != name {
                log::debug!("Remapped {name} -> {new_name}");
            }
            sources.insert(new_name.clone(), name);
            tensors.insert(new_name, tensor);
        }

        Ok(Self { tensors })
    }

    /// Compare the entries with the parameters a module expects.
    pub fn verify(&self, specs: &[ParamSpec]) -> LoadReport {
        let mut report = LoadReport::default();

        for spec in specs {
            match self.tensors.get(&spec.name) {
                Some(tensor) if tensor.shape == spec.shape => {
                    report.applied.push(spec.name.clone())
                }
                Some(tensor) => report.mismatched.push(ShapeMismatch {
                    name: spec.name.clone(),
                    checkpoint: tensor.shape.clone(),
                    model: spec.shape.clone(),
                }),
                None => report.missing.push(spec.name.clone()),
            }
        }

        report.unexpected = self
            .tensors
            .keys()
            .filter(|name| !specs.iter().any(|spec| &spec.name == *name))
            .cloned()
            .collect();

        report
    }
}

impl FromIterator<(String, StateTensor)> for StateDict {
    fn from_iter<I: IntoIterator<Item = (String, StateTensor)>>(iter: I) -> Self {
        Self {
            tensors: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for StateDict {
    type Item = (String, StateTensor);
    type IntoIter = btree_map::IntoIter<String, StateTensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.tensors.into_iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeMismatch {
    pub name: String,
    pub checkpoint: Vec<usize>,
    pub model: Vec<usize>,
}

/// Outcome of matching a checkpoint against a module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Parameters found with the expected shape.
    pub applied: Vec<String>,
    /// Parameters expected by the module but absent from the checkpoint.
    pub missing: Vec<String>,
    /// Checkpoint entries the module has no parameter for.
    pub unexpected: Vec<String>,
    /// Parameters present with a different shape.
    pub mismatched: Vec<ShapeMismatch>,
}

impl LoadReport {
    /// Every parameter is present with the right shape and nothing is left over.
    pub fn is_exact(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty() && self.mismatched.is_empty()
    }

    /// Fail on shape mismatches, and on missing or unexpected keys when `strict`.
    pub fn check(self, strict: bool) -> Result<Self, CheckpointError> {
        let key_errors = strict && !(self.missing.is_empty() && self.unexpected.is_empty());

        if key_errors || !self.mismatched.is_empty() {
            return Err(CheckpointError::StrictMismatch(self));
        }

        Ok(self)
    }
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn quoted(names: &[String]) -> String {
            names
                .iter()
                .map(|name| format!("\"{name}\""))
                .collect::<Vec<_>>()
                .join(", ")
        }

        if self.is_exact() {
            return write!(f, "All {} parameters matched", self.applied.len());
        }

        write!(f, "Error(s) in loading state_dict for UNet:")?;
        if !self.missing.is_empty() {
            write!(f, "\n\tMissing key(s) in state_dict: {}.", quoted(&self.missing))?;
        }
        if !self.unexpected.is_empty() {
            write!(
                f,
                "\n\tUnexpected key(s) in state_dict: {}.",
                quoted(&self.unexpected)
            )?;
        }
        for mismatch in self.mismatched.iter() {
            write!(
                f,
                "\n\tsize mismatch for {}: copying a param with shape {:?} from checkpoint, \
                 the shape in current model is {:?}.",
                mismatch.name, mismatch.checkpoint, mismatch.model
            )?;
        }

        Ok(())
    }
}
