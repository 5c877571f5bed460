use core::fmt;

/// A single dimension of a traced value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dim {
    /// Known when the graph is built and identical for every execution.
    Fixed(usize),
    /// Named dynamic dimension, shared by every value that has the same extent.
    Symbol(String),
    /// Dynamic dimension derived from other dynamic dimensions.
    Unknown,
}

impl Dim {
    /// The static extent, if any.
    pub fn value(&self) -> Option<usize> {
        match self {
            Dim::Fixed(value) => Some(*value),
            _ => None,
        }
    }

    /// Output extent of a sliding window (convolution or pooling) over this dimension.
    pub fn window(&self, kernel: usize, stride: usize, padding: usize, dilation: usize) -> Dim {
        let span = dilation * (kernel - 1) + 1;

        match self {
            Dim::Fixed(size) => {
                let padded = size + 2 * padding;
                if padded < span {
                    Dim::Fixed(0)
                } else {
                    Dim::Fixed((padded - span) / stride + 1)
                }
            }
            // Stride one with a window that exactly consumes the padding keeps the extent.
            dim if stride == 1 && span == 2 * padding + 1 => dim.clone(),
            _ => Dim::Unknown,
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Fixed(value) => write!(f, "{value}"),
            Dim::Symbol(name) => f.write_str(name),
            Dim::Unknown => f.write_str("?"),
        }
    }
}

/// Shape of a traced value, with dynamic axes kept symbolic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolicShape {
    dims: Vec<Dim>,
}

impl SymbolicShape {
    pub fn new(dims: Vec<Dim>) -> Self {
        Self { dims }
    }

    /// Shape of a concrete tensor, where the listed axes are replaced by named symbols.
    pub fn with_dynamic_axes(dims: &[usize], dynamic_axes: &[(usize, String)]) -> Self {
        let mut shape = Self::new(dims.iter().map(|&dim| Dim::Fixed(dim)).collect());
        shape.rename_axes(dynamic_axes);
        shape
    }

    /// Mark the listed axes as dynamic, regardless of what tracing inferred for them.
    pub fn rename_axes(&mut self, dynamic_axes: &[(usize, String)]) {
        for (axis, name) in dynamic_axes {
            if let Some(dim) = self.dims.get_mut(*axis) {
                *dim = Dim::Symbol(name.clone());
            }
        }
    }

    pub fn dims(&self) -> &[Dim] {
        &self.dims
    }

    pub fn dim(&self, axis: usize) -> &Dim {
        &self.dims[axis]
    }

    /// Static values of the axes in `start..end`, when all of them are known.
    pub fn known(&self, start: usize, end: usize) -> Option<Vec<i64>> {
        self.dims[start..end]
            .iter()
            .map(|dim| dim.value().map(|value| value as i64))
            .collect()
    }

    /// Return a copy with `axis` replaced.
    pub fn with_dim(&self, axis: usize, dim: Dim) -> Self {
        let mut dims = self.dims.clone();
        dims[axis] = dim;
        Self { dims }
    }
}

impl fmt::Display for SymbolicShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{dim}")?;
        }
        f.write_str("]")
    }
}
