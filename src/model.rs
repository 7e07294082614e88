//! Differentiable models and the model registry.

use std::fmt::{self, Debug};
use std::str::FromStr;

use rand::Rng;

use crate::autodiff::{Float, Var};
use crate::error::{SpectrumError, input_error};
use crate::params::{ParameterSet, ParameterTensor};

/// A model with an ordered parameter set and a differentiable forward pass.
///
/// `forward` receives the parameters as a flat slice of [`Var`]s laid out exactly as
/// [`ParameterSet::flatten`] lays them out, which is what lets the same code run under
/// recording (for gradients and Hessian-vector products) and as plain evaluation.
pub trait Model<F: Float>: Debug + Sync {
    fn parameters(&self) -> &ParameterSet<F>;

    fn parameters_mut(&mut self) -> &mut ParameterSet<F>;

    fn input_dim(&self) -> usize;

    fn output_dim(&self) -> usize;

    /// Evaluates the model on a single input.
    fn forward(&self, params: &[Var<F>], input: &[F]) -> Vec<Var<F>>;

    /// Evaluates the model with its current parameters, without recording.
    fn predict(&self, input: &[F]) -> Vec<F> {
        let params: Vec<Var<F>> = self
            .parameters()
            .flatten()
            .into_iter()
            .map(Var::constant)
            .collect();
        self.forward(&params, input)
            .into_iter()
            .map(|v| v.value())
            .collect()
    }
}

/// Nonlinearity applied between affine layers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    Identity,
    Tanh,
    Relu,
    Sigmoid,
}

impl Activation {
    fn apply<F: Float>(self, x: Var<F>) -> Var<F> {
        match self {
            Activation::Identity => x,
            Activation::Tanh => x.tanh(),
            Activation::Relu => x.relu(),
            Activation::Sigmoid => x.sigmoid(),
        }
    }
}

/// Offsets of one affine layer inside the flat parameter vector.
#[derive(Clone, Copy, Debug)]
struct LayerSlots {
    inputs: usize,
    outputs: usize,
    weight: usize,
    bias: usize,
}

/// Multilayer perceptron: affine layers with an activation between them and none after
/// the last one.
///
/// Layer `i` owns `layers.{i}.weight` with shape `[out, in]` followed by
/// `layers.{i}.bias` with shape `[out]`.
#[derive(Clone)]
pub struct Mlp<F: Float> {
    params: ParameterSet<F>,
    layers: Vec<LayerSlots>,
    activation: Activation,
}

impl<F: Float> Debug for Mlp<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mlp")
            .field("widths", &self.widths())
            .field("activation", &self.activation)
            .field("num_parameters", &self.params.len())
            .finish()
    }
}

impl<F: Float> Mlp<F> {
    /// Builds an MLP with the given layer widths (`[input, hidden.., output]`),
    /// initialised uniformly in `±1/sqrt(fan_in)`.
    pub fn new<R: Rng>(
        widths: &[usize],
        activation: Activation,
        rng: &mut R,
    ) -> Result<Self, SpectrumError> {
        let mut mlp = Self::zeros(widths, activation)?;
        let mut flat = mlp.params.flatten();
        for slots in &mlp.layers {
            let bound = 1.0 / (slots.inputs as f64).sqrt();
            let end = slots.bias + slots.outputs;
            for value in &mut flat[slots.weight..end] {
                *value = F::lit(rng.random_range(-bound..bound));
            }
        }
        mlp.params.assign_flat(&flat)?;
        Ok(mlp)
    }

    /// Builds an MLP with every parameter set to zero.
    pub fn zeros(widths: &[usize], activation: Activation) -> Result<Self, SpectrumError> {
        if widths.len() < 2 {
            return Err(input_error(
                "an MLP needs at least an input and an output width",
            ));
        }
        if widths.contains(&0) {
            return Err(input_error("layer widths must be positive"));
        }
        let mut params = ParameterSet::new();
        let mut layers = Vec::with_capacity(widths.len() - 1);
        let mut offset = 0;
        for (i, pair) in widths.windows(2).enumerate() {
            let (inputs, outputs) = (pair[0], pair[1]);
            params.push(ParameterTensor::zeros(
                format!("layers.{i}.weight"),
                vec![outputs, inputs],
            ));
            params.push(ParameterTensor::zeros(format!("layers.{i}.bias"), vec![outputs]));
            layers.push(LayerSlots {
                inputs,
                outputs,
                weight: offset,
                bias: offset + inputs * outputs,
            });
            offset += inputs * outputs + outputs;
        }
        Ok(Mlp {
            params,
            layers,
            activation,
        })
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    /// Layer widths, input first.
    pub fn widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self.layers.iter().map(|l| l.inputs).collect();
        if let Some(last) = self.layers.last() {
            widths.push(last.outputs);
        }
        widths
    }
}

impl<F: Float> Model<F> for Mlp<F> {
    fn parameters(&self) -> &ParameterSet<F> {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut ParameterSet<F> {
        &mut self.params
    }

    fn input_dim(&self) -> usize {
        self.layers.first().map_or(0, |l| l.inputs)
    }

    fn output_dim(&self) -> usize {
        self.layers.last().map_or(0, |l| l.outputs)
    }

    fn forward(&self, params: &[Var<F>], input: &[F]) -> Vec<Var<F>> {
        assert_eq!(
            params.len(),
            self.params.len(),
            "Dimension mismatch: model has {} parameters but {} were supplied.",
            self.params.len(),
            params.len()
        );
        assert_eq!(
            input.len(),
            self.input_dim(),
            "Dimension mismatch: model expects inputs of width {} but got {}.",
            self.input_dim(),
            input.len()
        );

        let mut hidden: Vec<Var<F>> = input.iter().map(|&x| Var::constant(x)).collect();
        let last = self.layers.len() - 1;
        for (l, slots) in self.layers.iter().enumerate() {
            let weights = &params[slots.weight..slots.bias];
            let biases = &params[slots.bias..slots.bias + slots.outputs];
            hidden = weights
                .chunks(slots.inputs)
                .zip(biases)
                .map(|(row, &b)| {
                    let z = row.iter().zip(&hidden).map(|(&w, &h)| w * h).sum::<Var<F>>() + b;
                    if l == last {
                        z
                    } else {
                        self.activation.apply(z)
                    }
                })
                .collect();
        }
        hidden
    }
}

/// The closed set of model configuration keys.
///
/// Each key maps to exactly one constructor; unknown keys are rejected when parsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelKind {
    /// A single affine layer (hidden widths are ignored).
    Linear,
    /// MLP with `tanh` activations.
    TanhMlp,
    /// MLP with ReLU activations.
    ReluMlp,
}

impl ModelKind {
    pub const KEYS: [&'static str; 3] = ["linear", "tanh-mlp", "relu-mlp"];

    pub fn key(self) -> &'static str {
        match self {
            ModelKind::Linear => "linear",
            ModelKind::TanhMlp => "tanh-mlp",
            ModelKind::ReluMlp => "relu-mlp",
        }
    }

    /// Constructs the model registered under this key.
    pub fn build<F: Float, R: Rng>(
        self,
        input_dim: usize,
        hidden: &[usize],
        output_dim: usize,
        rng: &mut R,
    ) -> Result<Mlp<F>, SpectrumError> {
        let (widths, activation) = match self {
            ModelKind::Linear => (vec![input_dim, output_dim], Activation::Identity),
            ModelKind::TanhMlp | ModelKind::ReluMlp => {
                let mut widths = Vec::with_capacity(hidden.len() + 2);
                widths.push(input_dim);
                widths.extend_from_slice(hidden);
                widths.push(output_dim);
                let activation = if self == ModelKind::TanhMlp {
                    Activation::Tanh
                } else {
                    Activation::Relu
                };
                (widths, activation)
            }
        };
        Mlp::new(&widths, activation, rng)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ModelKind {
    type Err = SpectrumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(ModelKind::Linear),
            "tanh-mlp" => Ok(ModelKind::TanhMlp),
            "relu-mlp" => Ok(ModelKind::ReluMlp),
            other => Err(input_error(format!(
                "unknown model '{other}'; expected one of: {}",
                Self::KEYS.join(", ")
            ))),
        }
    }
}
