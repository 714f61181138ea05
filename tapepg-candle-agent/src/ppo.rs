//! Proximal policy optimization over recorded rollouts.
mod base;
mod config;
mod objective;
mod terms;
pub use base::Ppo;
pub use config::{PpoConfig, DEFAULT_EPSILON};
pub use objective::ppo_objective;
pub use terms::{ObjectiveTerms, PpoTerms};
