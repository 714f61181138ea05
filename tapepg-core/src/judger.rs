//! Training signals computed from rewards.
//!
//! Both judgers work lane by lane over the span in which a lane is present, so
//! values never leak across episode boundaries or between lanes.
use crate::{
    error::TapeError,
    rollout::RolloutSet,
    tape::{Tape, TapeConfig},
};
use anyhow::Result;

/// Estimates the value of the observations in a tape.
///
/// The returned tape has one value per lane and step and the presence pattern
/// of `inputs`.
pub trait ValueFunc {
    /// Computes value estimates.
    fn values(&self, inputs: &Tape) -> Result<Tape>;
}

impl<F> ValueFunc for F
where
    F: Fn(&Tape) -> Result<Tape>,
{
    fn values(&self, inputs: &Tape) -> Result<Tape> {
        self(inputs)
    }
}

fn check_scalar(tape: &Tape) -> Result<()> {
    if tape.width() != 1 {
        return Err(TapeError::WidthMismatch {
            expected: 1,
            actual: tape.width(),
        }
        .into());
    }
    Ok(())
}

fn check_discount(v: f64) -> Result<()> {
    if !(v > 0.0 && v <= 1.0) {
        return Err(TapeError::InvalidFactor(v).into());
    }
    Ok(())
}

/// Discounted returns: `Q_t = r_t + discount * Q_{t+1}` with `Q = 0` past the
/// end of a lane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QJudger {
    /// Discount factor in `(0, 1]`.
    pub discount: f64,
}

impl QJudger {
    /// Computes the discounted returns of a reward tape.
    pub fn returns(&self, rewards: &Tape, config: &TapeConfig) -> Result<Tape> {
        check_scalar(rewards)?;
        check_discount(self.discount)?;
        let mut lanes = rewards.to_lane_values()?;
        for lane in lanes.iter_mut() {
            let mut acc = 0f64;
            for r in lane.iter_mut().rev() {
                acc = *r as f64 + self.discount * acc;
                *r = acc as f32;
            }
        }
        Tape::from_lane_values(&lanes, 1, rewards.len(), config)
    }

    /// Computes the discounted returns of the rewards of a rollout.
    pub fn judge(&self, rollout: &RolloutSet, config: &TapeConfig) -> Result<Tape> {
        self.returns(rollout.rewards(), config)
    }
}

/// Generalized advantage estimation.
///
/// With `delta_t = r_t + discount * V_{t+1} - V_t`, where `V` past the end of a
/// lane is zero, the advantage is `A_t = delta_t + discount * lambda * A_{t+1}`.
/// `lambda = 0` gives the one-step TD residual and `lambda = 1` gives the
/// discounted return minus the value baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct GaeJudger {
    /// Discount factor in `(0, 1]`.
    pub discount: f64,

    /// Mixing coefficient in `[0, 1]`.
    pub lambda: f64,

    /// Backend of the advantage tape.
    pub config: TapeConfig,
}

impl GaeJudger {
    /// Creates a judger writing to the reference backend.
    pub fn new(discount: f64, lambda: f64) -> Self {
        Self {
            discount,
            lambda,
            config: TapeConfig::Reference,
        }
    }

    /// Sets the backend of the advantage tape.
    pub fn config(mut self, v: TapeConfig) -> Self {
        self.config = v;
        self
    }

    /// Computes advantages of a rollout, evaluating `value_func` once on its inputs.
    pub fn judge(&self, rollout: &RolloutSet, value_func: &impl ValueFunc) -> Result<Tape> {
        let values = value_func.values(rollout.inputs())?;
        self.advantages(rollout.rewards(), &values)
    }

    /// Computes advantages from rewards and value estimates with the same layout.
    pub fn advantages(&self, rewards: &Tape, values: &Tape) -> Result<Tape> {
        check_scalar(rewards)?;
        check_scalar(values)?;
        check_discount(self.discount)?;
        if !(0.0..=1.0).contains(&self.lambda) {
            return Err(TapeError::InvalidFactor(self.lambda).into());
        }
        if values.lanes() != rewards.lanes() {
            return Err(TapeError::LaneMismatch {
                expected: rewards.lanes(),
                actual: values.lanes(),
            }
            .into());
        }

        let values = values.to_lane_values()?;
        let mut lanes = rewards.to_lane_values()?;
        for (lane, (rs, vs)) in lanes.iter_mut().zip(values.iter()).enumerate() {
            if rs.len() != vs.len() {
                return Err(TapeError::PresenceMismatch {
                    expected: rs.len(),
                    actual: vs.len(),
                }
                .into());
            }
            log::trace!("GAE over lane {} with {} steps", lane, rs.len());
            let mut acc = 0f64;
            let mut v_next = 0f64;
            for (r, v) in rs.iter_mut().zip(vs.iter()).rev() {
                let v = *v as f64;
                let delta = *r as f64 + self.discount * v_next - v;
                acc = delta + self.discount * self.lambda * acc;
                v_next = v;
                *r = acc as f32;
            }
        }
        Tape::from_lane_values(&lanes, 1, rewards.len(), &self.config)
    }
}
