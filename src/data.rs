//! In-memory datasets, borrowed batches, and synthetic problem generators.

use std::ops::Range;

use rand::{Rng, seq::SliceRandom};

use crate::autodiff::Float;
use crate::error::{SpectrumError, input_error};

/// Supervision signal for every sample of a dataset.
#[derive(Clone, Debug, PartialEq)]
pub enum Targets<F: Float> {
    /// Real-valued targets, `dim` per sample, row-major.
    Values { data: Vec<F>, dim: usize },
    /// One class label per sample.
    Classes {
        labels: Vec<usize>,
        num_classes: usize,
    },
}

impl<F: Float> Targets<F> {
    /// Number of samples described by these targets.
    pub fn len(&self) -> usize {
        match self {
            Targets::Values { data, dim } => {
                if *dim == 0 {
                    0
                } else {
                    data.len() / dim
                }
            }
            Targets::Classes { labels, .. } => labels.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Target<'_, F> {
        match self {
            Targets::Values { data, dim } => Target::Values(&data[index * dim..(index + 1) * dim]),
            Targets::Classes { labels, .. } => Target::Class(labels[index]),
        }
    }

    fn select(&self, order: &[usize]) -> Self {
        match self {
            Targets::Values { data, dim } => Targets::Values {
                data: order
                    .iter()
                    .flat_map(|&i| data[i * dim..(i + 1) * dim].iter().copied())
                    .collect(),
                dim: *dim,
            },
            Targets::Classes {
                labels,
                num_classes,
            } => Targets::Classes {
                labels: order.iter().map(|&i| labels[i]).collect(),
                num_classes: *num_classes,
            },
        }
    }
}

/// The target of a single sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Target<'a, F: Float> {
    Values(&'a [F]),
    Class(usize),
}

/// Row-major inputs together with their targets.
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset<F: Float> {
    inputs: Vec<F>,
    input_dim: usize,
    targets: Targets<F>,
}

impl<F: Float> Dataset<F> {
    /// Creates a dataset after checking that inputs and targets describe the same samples.
    pub fn new(inputs: Vec<F>, input_dim: usize, targets: Targets<F>) -> Result<Self, SpectrumError> {
        if input_dim == 0 {
            return Err(input_error("input dimension must be positive"));
        }
        if inputs.len() % input_dim != 0 {
            return Err(input_error(format!(
                "{} input values do not form rows of width {input_dim}",
                inputs.len()
            )));
        }
        match &targets {
            Targets::Values { data, dim } => {
                if *dim == 0 || data.len() % dim != 0 {
                    return Err(input_error(format!(
                        "{} target values do not form rows of width {dim}",
                        data.len()
                    )));
                }
            }
            Targets::Classes {
                labels,
                num_classes,
            } => {
                if let Some(&bad) = labels.iter().find(|&&l| l >= *num_classes) {
                    return Err(input_error(format!(
                        "label {bad} is out of range for {num_classes} classes"
                    )));
                }
            }
        }
        let samples = inputs.len() / input_dim;
        if targets.len() != samples {
            return Err(input_error(format!(
                "dataset has {samples} inputs but {} targets",
                targets.len()
            )));
        }
        Ok(Dataset {
            inputs,
            input_dim,
            targets,
        })
    }

    pub fn len(&self) -> usize {
        self.inputs.len() / self.input_dim
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn targets(&self) -> &Targets<F> {
        &self.targets
    }

    /// Width of the model output these targets expect.
    pub fn output_dim(&self) -> usize {
        match &self.targets {
            Targets::Values { dim, .. } => *dim,
            Targets::Classes { num_classes, .. } => *num_classes,
        }
    }

    pub fn input(&self, index: usize) -> &[F] {
        &self.inputs[index * self.input_dim..(index + 1) * self.input_dim]
    }

    pub fn target(&self, index: usize) -> Target<'_, F> {
        self.targets.get(index)
    }

    /// The whole dataset as one batch.
    pub fn full(&self) -> Batch<'_, F> {
        Batch {
            dataset: self,
            range: 0..self.len(),
        }
    }

    /// A contiguous batch of samples.
    pub fn batch(&self, range: Range<usize>) -> Result<Batch<'_, F>, SpectrumError> {
        if range.start > range.end || range.end > self.len() {
            return Err(input_error(format!(
                "batch range {range:?} is outside a dataset of {} samples",
                self.len()
            )));
        }
        Ok(Batch {
            dataset: self,
            range,
        })
    }

    /// Iterates over consecutive batches of at most `batch_size` samples, in order.
    ///
    /// A `batch_size` of zero is treated as one.
    pub fn batches(&self, batch_size: usize) -> Batches<'_, F> {
        Batches {
            dataset: self,
            batch_size: batch_size.max(1),
            next: 0,
        }
    }

    /// Splits into `[0, mid)` and `[mid, len)`.
    pub fn split_at(&self, mid: usize) -> Result<(Dataset<F>, Dataset<F>), SpectrumError> {
        if mid > self.len() {
            return Err(input_error(format!(
                "cannot split {} samples at {mid}",
                self.len()
            )));
        }
        let head: Vec<usize> = (0..mid).collect();
        let tail: Vec<usize> = (mid..self.len()).collect();
        Ok((self.select(&head), self.select(&tail)))
    }

    /// A copy with the samples permuted uniformly at random.
    pub fn shuffled<R: Rng>(&self, rng: &mut R) -> Dataset<F> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);
        self.select(&order)
    }

    fn select(&self, order: &[usize]) -> Dataset<F> {
        Dataset {
            inputs: order
                .iter()
                .flat_map(|&i| self.input(i).iter().copied())
                .collect(),
            input_dim: self.input_dim,
            targets: self.targets.select(order),
        }
    }

    /// Planted linear regression: `y = W·x + noise` with `x` and `W` uniform in `[-1, 1]`.
    pub fn synthetic_regression<R: Rng>(
        samples: usize,
        input_dim: usize,
        output_dim: usize,
        noise: f64,
        rng: &mut R,
    ) -> Result<Self, SpectrumError> {
        let weights: Vec<f64> = (0..input_dim * output_dim)
            .map(|_| rng.random_range(-1.0..1.0))
            .collect();
        let mut inputs = Vec::with_capacity(samples * input_dim);
        let mut targets = Vec::with_capacity(samples * output_dim);
        for _ in 0..samples {
            let x: Vec<f64> = (0..input_dim).map(|_| rng.random_range(-1.0..1.0)).collect();
            for row in weights.chunks(input_dim.max(1)) {
                let clean: f64 = row.iter().zip(&x).map(|(w, xi)| w * xi).sum();
                targets.push(F::lit(clean + noise * rng.random_range(-1.0..1.0)));
            }
            inputs.extend(x.into_iter().map(F::lit));
        }
        Dataset::new(
            inputs,
            input_dim,
            Targets::Values {
                data: targets,
                dim: output_dim,
            },
        )
    }

    /// Classes centred on random points of the unit cube, with uniform jitter of half-width `spread`.
    pub fn synthetic_classification<R: Rng>(
        samples: usize,
        input_dim: usize,
        num_classes: usize,
        spread: f64,
        rng: &mut R,
    ) -> Result<Self, SpectrumError> {
        if num_classes == 0 {
            return Err(input_error("at least one class is required"));
        }
        let centers: Vec<Vec<f64>> = (0..num_classes)
            .map(|_| (0..input_dim).map(|_| rng.random_range(-1.0..1.0)).collect())
            .collect();
        let mut inputs = Vec::with_capacity(samples * input_dim);
        let mut labels = Vec::with_capacity(samples);
        for i in 0..samples {
            let label = i % num_classes;
            inputs.extend(
                centers[label]
                    .iter()
                    .map(|c| F::lit(c + spread * rng.random_range(-1.0..1.0))),
            );
            labels.push(label);
        }
        Dataset::new(
            inputs,
            input_dim,
            Targets::Classes {
                labels,
                num_classes,
            },
        )
    }
}

/// A borrowed, contiguous run of samples from a [`Dataset`].
#[derive(Clone, Debug)]
pub struct Batch<'a, F: Float> {
    dataset: &'a Dataset<F>,
    range: Range<usize>,
}

impl<'a, F: Float> Batch<'a, F> {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn dataset(&self) -> &'a Dataset<F> {
        self.dataset
    }

    /// `(input, target)` pairs of the batch, in order.
    pub fn samples(&self) -> impl Iterator<Item = (&'a [F], Target<'a, F>)> {
        let dataset = self.dataset;
        self.range
            .clone()
            .map(move |i| (dataset.input(i), dataset.target(i)))
    }
}

/// Iterator returned by [`Dataset::batches`].
#[derive(Debug)]
pub struct Batches<'a, F: Float> {
    dataset: &'a Dataset<F>,
    batch_size: usize,
    next: usize,
}

impl<'a, F: Float> Iterator for Batches<'a, F> {
    type Item = Batch<'a, F>;

    fn next(&mut self) -> Option<Self::Item> {
        let len = self.dataset.len();
        if self.next >= len {
            return None;
        }
        let end = (self.next + self.batch_size).min(len);
        let batch = Batch {
            dataset: self.dataset,
            range: self.next..end,
        };
        self.next = end;
        Some(batch)
    }
}
