use anyhow::Result;
use candle_core::Tensor;

/// Clipped surrogate objective of PPO, elementwise.
///
/// Returns `min(clip(ratios, 1 - epsilon, 1 + epsilon) * advantages, ratios * advantages)`.
/// Gradients flow into both `ratios` and `advantages`; detach the advantages
/// before calling this if they must be treated as constants.
pub fn ppo_objective(epsilon: f64, ratios: &Tensor, advantages: &Tensor) -> Result<Tensor> {
    let clipped = (ratios.clamp(1.0 - epsilon, 1.0 + epsilon)? * advantages)?;
    let unclipped = (ratios * advantages)?;
    Ok(clipped.minimum(&unclipped)?)
}
