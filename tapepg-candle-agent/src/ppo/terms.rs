use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use tapepg_core::record::{Record, RecordValue};

/// The three parts of the PPO objective, summed over present lane-steps.
///
/// Each field is a scalar tensor in the computation graph.
#[derive(Clone, Debug)]
pub struct ObjectiveTerms {
    /// Clipped surrogate term.
    pub advantage: Tensor,

    /// Negative squared error of the critic, scaled by the critic weight.
    pub critic: Tensor,

    /// Regularization term, zero without a regularizer.
    pub regularization: Tensor,
}

impl ObjectiveTerms {
    /// All terms zero.
    pub fn zeros(device: &Device) -> Result<Self> {
        let zero = Tensor::zeros((), DType::F32, device)?;
        Ok(Self {
            advantage: zero.clone(),
            critic: zero.clone(),
            regularization: zero,
        })
    }

    /// Adds the terms of another set of steps.
    pub fn add(&self, other: &Self) -> Result<Self> {
        Ok(Self {
            advantage: (&self.advantage + &other.advantage)?,
            critic: (&self.critic + &other.critic)?,
            regularization: (&self.regularization + &other.regularization)?,
        })
    }

    /// Sum of the three terms.
    pub fn total(&self) -> Result<Tensor> {
        Ok(((&self.advantage + &self.critic)? + &self.regularization)?)
    }

    /// Current values of the terms.
    pub fn values(&self) -> Result<PpoTerms> {
        let v = |t: &Tensor| -> Result<f32> { Ok(t.to_dtype(DType::F32)?.to_scalar::<f32>()?) };
        Ok(PpoTerms {
            mean_advantage: v(&self.advantage)?,
            mean_critic: v(&self.critic)?,
            mean_regularization: v(&self.regularization)?,
        })
    }
}

/// Means of the objective terms over the present lane-steps of a rollout.
///
/// For logging only; their sum is the objective that was differentiated.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PpoTerms {
    /// Mean of the clipped surrogate term.
    pub mean_advantage: f32,

    /// Mean of the critic term.
    pub mean_critic: f32,

    /// Mean of the regularization term.
    pub mean_regularization: f32,
}

impl PpoTerms {
    /// The objective.
    pub fn total(&self) -> f32 {
        self.mean_advantage + self.mean_critic + self.mean_regularization
    }

    pub(super) fn add_scaled(&mut self, sums: &PpoTerms, scale: f32) {
        self.mean_advantage += sums.mean_advantage * scale;
        self.mean_critic += sums.mean_critic * scale;
        self.mean_regularization += sums.mean_regularization * scale;
    }

    /// Converts the terms into a [`Record`].
    pub fn to_record(&self) -> Record {
        Record::from_slice(&[
            ("ppo_advantage", RecordValue::Scalar(self.mean_advantage)),
            ("ppo_critic", RecordValue::Scalar(self.mean_critic)),
            ("ppo_regularization", RecordValue::Scalar(self.mean_regularization)),
            ("ppo_objective", RecordValue::Scalar(self.total())),
        ])
    }
}
