//! Parameter containers and the flat parameter-vector mapping.
//!
//! A [`ParameterSet`] is an ordered collection of named tensors. Its enumeration order is
//! fixed at construction and is the order used by [`ParameterSet::flatten`], by
//! [`ParameterLayout::unflatten`], and by every gradient or Hessian-vector product computed
//! in this crate, so the flatten/unflatten mapping is a bijection that never reorders
//! parameters between a forward pass and its derivatives.

use crate::autodiff::Float;
use crate::error::{SpectrumError, SpectrumErrorKind, dimension_mismatch};

/// A named, row-major parameter tensor.
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterTensor<F: Float> {
    pub name: String,
    pub shape: Vec<usize>,
    pub values: Vec<F>,
}

impl<F: Float> ParameterTensor<F> {
    /// Creates a tensor, checking that `values` matches the element count of `shape`.
    pub fn new(
        name: impl Into<String>,
        shape: Vec<usize>,
        values: Vec<F>,
    ) -> Result<Self, SpectrumError> {
        let name = name.into();
        let expected: usize = shape.iter().product();
        if values.len() != expected {
            return Err(SpectrumErrorKind::ParameterMismatch {
                param_name: name,
                expected,
                actual: values.len(),
            }
            .into());
        }
        Ok(ParameterTensor {
            name,
            shape,
            values,
        })
    }

    pub fn zeros(name: impl Into<String>, shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        ParameterTensor {
            name: name.into(),
            shape,
            values: vec![F::zero(); len],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// An ordered set of parameter tensors.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParameterSet<F: Float> {
    tensors: Vec<ParameterTensor<F>>,
}

impl<F: Float> ParameterSet<F> {
    pub fn new() -> Self {
        ParameterSet {
            tensors: Vec::new(),
        }
    }

    /// Appends a tensor at the end of the enumeration order.
    pub fn push(&mut self, tensor: ParameterTensor<F>) {
        self.tensors.push(tensor);
    }

    pub fn tensors(&self) -> &[ParameterTensor<F>] {
        &self.tensors
    }

    pub fn get(&self, name: &str) -> Option<&ParameterTensor<F>> {
        self.tensors.iter().find(|t| t.name == name)
    }

    /// Total number of scalar parameters.
    pub fn len(&self) -> usize {
        self.tensors.iter().map(ParameterTensor::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concatenates every tensor, in enumeration order, into one flat vector.
    pub fn flatten(&self) -> Vec<F> {
        let mut flat = Vec::with_capacity(self.len());
        for tensor in &self.tensors {
            flat.extend_from_slice(&tensor.values);
        }
        flat
    }

    /// Describes where each tensor lives inside the flat vector.
    pub fn layout(&self) -> ParameterLayout {
        let mut offset = 0;
        let entries = self
            .tensors
            .iter()
            .map(|tensor| {
                let entry = LayoutEntry {
                    name: tensor.name.clone(),
                    shape: tensor.shape.clone(),
                    offset,
                    len: tensor.len(),
                };
                offset += tensor.len();
                entry
            })
            .collect();
        ParameterLayout {
            entries,
            total: offset,
        }
    }

    /// Overwrites every tensor from a flat vector laid out as by [`ParameterSet::flatten`].
    pub fn assign_flat(&mut self, flat: &[F]) -> Result<(), SpectrumError> {
        let total = self.len();
        if flat.len() != total {
            return Err(dimension_mismatch(total, flat.len()));
        }
        let mut offset = 0;
        for tensor in &mut self.tensors {
            let len = tensor.len();
            tensor.values.copy_from_slice(&flat[offset..offset + len]);
            offset += len;
        }
        Ok(())
    }

    /// Euclidean norm of the flattened parameters, accumulated in `f64`.
    pub fn norm_l2(&self) -> f64 {
        self.tensors
            .iter()
            .flat_map(|t| t.values.iter())
            .map(|v| v.as_f64() * v.as_f64())
            .sum::<f64>()
            .sqrt()
    }
}

/// Position of one tensor inside the flat parameter vector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LayoutEntry {
    pub name: String,
    pub shape: Vec<usize>,
    pub offset: usize,
    pub len: usize,
}

impl LayoutEntry {
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// The shape skeleton of a [`ParameterSet`], without values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParameterLayout {
    entries: Vec<LayoutEntry>,
    total: usize,
}

impl ParameterLayout {
    pub fn entries(&self) -> &[LayoutEntry] {
        &self.entries
    }

    /// Length of the flat parameter vector.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn entry(&self, name: &str) -> Option<&LayoutEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Rebuilds a parameter set from a flat vector.
    ///
    /// # Errors
    /// Returns a dimension mismatch if `flat` does not have exactly [`Self::total`] entries.
    pub fn unflatten<F: Float>(&self, flat: &[F]) -> Result<ParameterSet<F>, SpectrumError> {
        if flat.len() != self.total {
            return Err(dimension_mismatch(self.total, flat.len()));
        }
        let tensors = self
            .entries
            .iter()
            .map(|entry| ParameterTensor {
                name: entry.name.clone(),
                shape: entry.shape.clone(),
                values: flat[entry.range()].to_vec(),
            })
            .collect();
        Ok(ParameterSet { tensors })
    }
}
