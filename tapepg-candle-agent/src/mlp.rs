//! Multilayer perceptron.
mod base;
mod config;
pub use base::Mlp;
use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module};
pub use config::MlpConfig;

fn mlp_forward(xs: &Tensor, layers: &[Linear]) -> Result<Tensor> {
    let (last, hidden) = match layers.split_last() {
        Some(v) => v,
        None => return Ok(xs.clone()),
    };
    let mut xs = xs.clone();
    for layer in hidden {
        xs = layer.forward(&xs)?.relu()?;
    }
    last.forward(&xs)
}
