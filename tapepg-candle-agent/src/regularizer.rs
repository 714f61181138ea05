//! Optional regularization of the PPO objective.
use crate::action_space::Entropy;
use anyhow::Result;
use candle_core::Tensor;

/// Adds a per-action term to the objective, computed from the distribution
/// parameters of one step. Returns a tensor of shape `[n]` for `n` rows.
pub trait Regularizer {
    /// Computes the term of each row.
    fn regularize(&self, params: &Tensor) -> Result<Tensor>;
}

/// Entropy bonus scaled by `coeff`.
#[derive(Clone, Debug)]
pub struct EntropyRegularizer<S> {
    /// Scale of the bonus.
    pub coeff: f64,

    /// Distribution whose entropy is rewarded.
    pub space: S,
}

impl<S: Entropy> Regularizer for EntropyRegularizer<S> {
    fn regularize(&self, params: &Tensor) -> Result<Tensor> {
        Ok(self.space.entropy(params)?.affine(self.coeff, 0.0)?)
    }
}
