#![warn(missing_docs)]
//! Tapes, rollout sets and advantage estimation for policy-gradient training.
//!
//! Episodes collected in parallel are recorded lane by lane into [`Tape`]s. Each
//! step of a tape is a [`Batch`] holding the values of the lanes whose episode
//! is still running. The tapes of one training batch form a [`RolloutSet`],
//! from which [`rewards`] aggregates statistics and [`judger`] computes
//! discounted returns and generalized advantage estimates.
//!
//! [`PhaseLock`] keeps rollout collection from reading parameters while a
//! training step writes them.
pub mod error;
pub mod judger;
pub mod record;
pub mod rewards;

mod batch;
pub use batch::Batch;

pub mod tape;
pub use tape::{Codec, Tape, TapeConfig, TapeReader, TapeWriter};

mod rollout;
pub use rollout::{PackConfig, RolloutSet};

mod phase;
pub use phase::{Phase, PhaseLock, TrainingGuard};
