//! Configuration of the PPO trainer.
use crate::Device;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};
use tapepg_core::TapeConfig;

/// Clip range used when none is configured.
pub const DEFAULT_EPSILON: f64 = 0.2;

fn default_epsilon() -> f64 {
    DEFAULT_EPSILON
}

fn default_critic_weight() -> f64 {
    1.0
}

fn default_pool_base() -> bool {
    true
}

/// Configuration of [`Ppo`](super::Ppo).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct PpoConfig {
    /// Discount factor.
    pub discount: f64,

    /// Mixing coefficient of generalized advantage estimation.
    pub lambda: f64,

    /// Clip range of the probability ratios. Non-positive values mean
    /// [`DEFAULT_EPSILON`], see [`PpoConfig::clip_range`].
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,

    /// Weight of the critic term.
    #[serde(default = "default_critic_weight")]
    pub critic_weight: f64,

    /// If `true`, the base runs once per chunk and its output feeds both the
    /// actor and the critic. Otherwise the base runs separately for each head,
    /// which keeps only one head's graph alive at a time.
    #[serde(default = "default_pool_base")]
    pub pool_base: bool,

    /// Number of steps differentiated at once; all steps if `None`.
    ///
    /// Chunking bounds the size of the computation graph. It is only valid for
    /// models without state carried across steps.
    #[serde(default)]
    pub chunk_steps: Option<usize>,

    /// Device of the computation.
    #[serde(default)]
    pub device: Device,

    /// Backend of the advantage tape.
    #[serde(default)]
    pub advantage_tape: TapeConfig,
}

impl Default for PpoConfig {
    fn default() -> Self {
        Self {
            discount: 0.99,
            lambda: 0.95,
            epsilon: DEFAULT_EPSILON,
            critic_weight: 1.0,
            pool_base: true,
            chunk_steps: None,
            device: Device::Cpu,
            advantage_tape: TapeConfig::Reference,
        }
    }
}

impl PpoConfig {
    /// Sets the discount factor.
    pub fn discount(mut self, v: f64) -> Self {
        self.discount = v;
        self
    }

    /// Sets the mixing coefficient of generalized advantage estimation.
    pub fn lambda(mut self, v: f64) -> Self {
        self.lambda = v;
        self
    }

    /// Sets the clip range.
    pub fn epsilon(mut self, v: f64) -> Self {
        self.epsilon = v;
        self
    }

    /// The clip range in effect, [`DEFAULT_EPSILON`] unless `epsilon` is positive.
    pub fn clip_range(&self) -> f64 {
        if self.epsilon > 0.0 {
            self.epsilon
        } else {
            DEFAULT_EPSILON
        }
    }

    /// Sets the weight of the critic term.
    pub fn critic_weight(mut self, v: f64) -> Self {
        self.critic_weight = v;
        self
    }

    /// Sets whether the base output is shared by actor and critic.
    pub fn pool_base(mut self, v: bool) -> Self {
        self.pool_base = v;
        self
    }

    /// Sets the number of steps differentiated at once.
    pub fn chunk_steps(mut self, v: Option<usize>) -> Self {
        self.chunk_steps = v;
        self
    }

    /// Sets the device.
    pub fn device(mut self, v: Device) -> Self {
        self.device = v;
        self
    }

    /// Sets the backend of the advantage tape.
    pub fn advantage_tape(mut self, v: TapeConfig) -> Self {
        self.advantage_tape = v;
        self
    }

    /// Constructs [`PpoConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`PpoConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
