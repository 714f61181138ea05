//! PPO over tapes implemented with [candle](https://crates.io/crates/candle-core).
//!
//! Tapes recorded by `tapepg-core` are read into [`TensorSeq`]s, evaluated by
//! [`SeqModel`](model::SeqModel)s and turned into a [`Gradient`] by the
//! [`Ppo`](ppo::Ppo) trainer.
pub mod action_space;
mod gradient;
pub mod mlp;
pub mod model;
pub mod opt;
pub mod ppo;
pub mod regularizer;
mod tensor_batch;
use anyhow::Result;
pub use gradient::Gradient;
use serde::{Deserialize, Serialize};
pub use tensor_batch::{TensorBatch, TensorSeq};

#[derive(Clone, Debug, Copy, Deserialize, Serialize, PartialEq)]
/// Device for using candle.
///
/// This enum is added because [`candle_core::Device`] does not support serialization.
pub enum Device {
    /// The main CPU device.
    Cpu,

    /// The GPU device with the given ordinal.
    Cuda(usize),
}

impl Default for Device {
    fn default() -> Self {
        Self::Cpu
    }
}

impl Device {
    /// Opens the device.
    pub fn to_candle(self) -> Result<candle_core::Device> {
        match self {
            Self::Cpu => Ok(candle_core::Device::Cpu),
            Self::Cuda(n) => Ok(candle_core::Device::new_cuda(n)?),
        }
    }
}
