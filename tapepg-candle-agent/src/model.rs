//! Interface of the differentiable functions used by the PPO trainer.
use crate::TensorSeq;
use anyhow::Result;
use candle_nn::{Module, VarBuilder};

/// A differentiable function from one sequence of tensors to another.
///
/// The output has the presence pattern of the input. Implementations must give
/// numerically consistent results when called more than once on the same input.
pub trait SeqModel {
    /// Evaluates the function.
    fn forward(&self, xs: &TensorSeq) -> Result<TensorSeq>;
}

impl<T: SeqModel + ?Sized> SeqModel for Box<T> {
    fn forward(&self, xs: &TensorSeq) -> Result<TensorSeq> {
        (**self).forward(xs)
    }
}

/// The identity, used when actor and critic have no shared base.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughBase;

impl SeqModel for PassthroughBase {
    fn forward(&self, xs: &TensorSeq) -> Result<TensorSeq> {
        Ok(xs.clone())
    }
}

/// Applies a [`Module`] to every lane and step independently.
///
/// All rows of the sequence go through the module in a single call.
#[derive(Clone, Debug)]
pub struct Stepwise<M>(pub M);

impl<M: Module> SeqModel for Stepwise<M> {
    fn forward(&self, xs: &TensorSeq) -> Result<TensorSeq> {
        match xs.flatten()? {
            Some(rows) => xs.unflatten(&self.0.forward(&rows)?),
            None => Ok(xs.clone()),
        }
    }
}

/// Neural network model not owing its [`VarMap`] internally.
///
/// [`VarMap`]: https://docs.rs/candle-nn/0.8.4/candle_nn/var_map/struct.VarMap.html
pub trait SubModel: Sized {
    /// Configuration from which [`SubModel`] is constructed.
    type Config;

    /// Builds [`SubModel`] with [`VarBuilder`] and [`SubModel::Config`].
    fn build(vb: VarBuilder, config: Self::Config) -> Result<Self>;
}
