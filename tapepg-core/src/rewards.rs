//! Aggregation of reward tapes.
//!
//! Reward tapes have one value per lane and step.
use crate::{
    error::TapeError,
    record::{Record, RecordValue},
    tape::{Tape, TapeConfig},
};
use anyhow::Result;

fn check_scalar(rewards: &Tape) -> Result<()> {
    if rewards.width() != 1 {
        return Err(TapeError::WidthMismatch {
            expected: 1,
            actual: rewards.width(),
        }
        .into());
    }
    Ok(())
}

/// Sums the rewards of each lane.
///
/// Absent lanes contribute nothing. A tape without steps gives an empty vector.
pub fn total_rewards(rewards: &Tape) -> Result<Vec<f64>> {
    check_scalar(rewards)?;
    if rewards.is_empty() {
        return Ok(vec![]);
    }
    let mut sums = vec![0f64; rewards.lanes()];
    for batch in rewards.read(0, None) {
        for (lane, row) in batch?.rows() {
            sums[lane] += row[0] as f64;
        }
    }
    Ok(sums)
}

/// Mean of [`total_rewards`] over lanes.
///
/// Fails with [`TapeError::NoLanes`] when there is nothing to average.
pub fn mean_reward(rewards: &Tape) -> Result<f64> {
    Ok(reward_stats(rewards)?.mean)
}

/// Mean and variance of the per-lane reward totals.
#[derive(Debug, Clone, PartialEq)]
pub struct RewardStats {
    /// Reward total of each lane.
    pub totals: Vec<f64>,

    /// Mean of the totals.
    pub mean: f64,

    /// Population variance of the totals.
    pub variance: f64,
}

impl RewardStats {
    /// Standard deviation of the totals.
    pub fn std(&self) -> f64 {
        self.variance.sqrt()
    }

    /// Converts the statistics into a [`Record`] with keys `reward_mean`,
    /// `reward_std` and `reward_totals`.
    pub fn to_record(&self) -> Record {
        let totals = self.totals.iter().map(|v| *v as f32).collect();
        Record::from_slice(&[
            ("reward_mean", RecordValue::Scalar(self.mean as f32)),
            ("reward_std", RecordValue::Scalar(self.std() as f32)),
            ("reward_totals", RecordValue::Array1(totals)),
        ])
    }
}

/// Computes [`RewardStats`] of the per-lane reward totals.
pub fn reward_stats(rewards: &Tape) -> Result<RewardStats> {
    let totals = total_rewards(rewards)?;
    if totals.is_empty() {
        return Err(TapeError::NoLanes.into());
    }
    let n = totals.len() as f64;
    let mean = totals.iter().sum::<f64>() / n;
    let variance = totals.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Ok(RewardStats {
        totals,
        mean,
        variance,
    })
}

/// Scales the batch at step `i` by `factor^i`.
///
/// This is a per-step scaling, not a discounted return: the value at step `i`
/// depends on the reward at step `i` only. For discounted returns, see
/// [`QJudger`](crate::judger::QJudger).
pub fn discounted_rewards(rewards: &Tape, factor: f64, config: &TapeConfig) -> Result<Tape> {
    if !(factor > 0.0 && factor <= 1.0) {
        return Err(TapeError::InvalidFactor(factor).into());
    }
    let mut scale = 1f64;
    rewards.map(config, |_, mut batch| {
        batch.scale(scale as f32);
        scale *= factor;
        Ok(batch)
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn tape(lanes: &[Vec<f32>]) -> Result<Tape> {
        let len = lanes.iter().map(|l| l.len()).max().unwrap_or(0);
        Tape::from_lane_values(lanes, 1, len, &TapeConfig::Reference)
    }

    #[test]
    fn test_total_rewards() -> Result<()> {
        let rewards = tape(&[vec![1., 2., 3.], vec![1., 1.]])?;
        assert_eq!(total_rewards(&rewards)?, vec![6., 2.]);
        assert_eq!(mean_reward(&rewards)?, 4.);

        let stats = reward_stats(&rewards)?;
        assert_eq!(stats.variance, 4.);
        let record = stats.to_record();
        assert_eq!(record.get_scalar("reward_std")?, 2.);
        assert_eq!(record.get_array1("reward_totals")?, vec![6., 2.]);
        assert_eq!(
            record.get_scalar("reward_totals"),
            Err(TapeError::RecordValueTypeError("Scalar".to_string()))
        );
        Ok(())
    }

    #[test]
    fn test_empty_tapes() -> Result<()> {
        let rewards = tape(&[vec![], vec![]])?;
        assert!(rewards.is_empty());
        assert_eq!(total_rewards(&rewards)?, Vec::<f64>::new());
        let err = mean_reward(&rewards).unwrap_err();
        assert_eq!(err.downcast_ref::<TapeError>(), Some(&TapeError::NoLanes));
        Ok(())
    }

    #[test]
    fn test_discounted_rewards_scales_each_step() -> Result<()> {
        let rewards = tape(&[vec![4., 4., 4.], vec![2., 8.]])?;
        let discounted = discounted_rewards(&rewards, 0.5, &TapeConfig::Reference)?;
        assert_eq!(
            discounted.to_lane_values()?,
            vec![vec![4., 2., 1.], vec![2., 4.]]
        );

        // The input stays readable and unchanged.
        assert_eq!(rewards.to_lane_values()?, vec![vec![4., 4., 4.], vec![2., 8.]]);

        // The output replays identically.
        assert_eq!(discounted.to_lane_values()?, discounted.to_lane_values()?);
        Ok(())
    }

    #[test]
    fn test_discounted_rewards_rejects_bad_factor() -> Result<()> {
        let rewards = tape(&[vec![1.]])?;
        for factor in [0.0, -0.5, 1.5, f64::NAN].iter() {
            assert!(discounted_rewards(&rewards, *factor, &TapeConfig::Reference).is_err());
        }
        assert!(discounted_rewards(&rewards, 1.0, &TapeConfig::Reference).is_ok());
        Ok(())
    }
}
