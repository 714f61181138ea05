//! Log-probabilities of sampled actions under distribution parameters.
//!
//! Parameters and actions are packed rows of one step, with shapes
//! `[n, param_width]` and `[n, action_width]`. Results have shape `[n]`.
use anyhow::Result;
use candle_core::{DType, Tensor, D};
use candle_nn::ops::{log_softmax, softmax};
use std::f64::consts::PI;

/// Log-probabilities of actions.
///
/// Must agree with how the actions were sampled, so that the log-probabilities
/// of the parameters recorded at rollout time are comparable with new ones.
pub trait LogProber {
    /// Computes the log-probability of each action.
    fn log_prob(&self, params: &Tensor, actions: &Tensor) -> Result<Tensor>;
}

/// Entropy of a distribution.
pub trait Entropy {
    /// Computes the entropy of each distribution.
    fn entropy(&self, params: &Tensor) -> Result<Tensor>;
}

/// Categorical distribution over `n` actions parameterized by logits.
///
/// Actions are stored as the index of the chosen action, one value per row.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Softmax {
    /// Number of actions.
    pub n: usize,
}

impl Softmax {
    fn one_hot(&self, actions: &Tensor) -> Result<Tensor> {
        let index = Tensor::arange(0u32, self.n as u32, actions.device())?.to_dtype(actions.dtype())?;
        Ok(actions.broadcast_eq(&index)?.to_dtype(DType::F32)?)
    }
}

impl LogProber for Softmax {
    fn log_prob(&self, params: &Tensor, actions: &Tensor) -> Result<Tensor> {
        let log_p = log_softmax(params, D::Minus1)?;
        let mask = self.one_hot(actions)?.to_dtype(log_p.dtype())?;
        Ok((log_p * mask)?.sum(D::Minus1)?)
    }
}

impl Entropy for Softmax {
    fn entropy(&self, params: &Tensor) -> Result<Tensor> {
        let log_p = log_softmax(params, D::Minus1)?;
        let p = softmax(params, D::Minus1)?;
        Ok((p * log_p)?.sum(D::Minus1)?.neg()?)
    }
}

/// Diagonal Gaussian over `dim` dimensions.
///
/// The parameters of a row are the mean followed by the log standard deviation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Gaussian {
    /// Dimension of the actions.
    pub dim: usize,
}

impl Gaussian {
    fn split(&self, params: &Tensor) -> Result<(Tensor, Tensor)> {
        let mean = params.narrow(1, 0, self.dim)?;
        let log_std = params.narrow(1, self.dim, self.dim)?;
        Ok((mean, log_std))
    }
}

impl LogProber for Gaussian {
    fn log_prob(&self, params: &Tensor, actions: &Tensor) -> Result<Tensor> {
        let (mean, log_std) = self.split(params)?;
        let z = ((actions - mean)? / log_std.exp()?)?;
        let log_p = ((z.sqr()? * -0.5)? - log_std)?.affine(1.0, -0.5 * (2.0 * PI).ln())?;
        Ok(log_p.sum(D::Minus1)?)
    }
}

impl Entropy for Gaussian {
    fn entropy(&self, params: &Tensor) -> Result<Tensor> {
        let (_, log_std) = self.split(params)?;
        let h = log_std.affine(1.0, 0.5 * (1.0 + (2.0 * PI).ln()))?;
        Ok(h.sum(D::Minus1)?)
    }
}
