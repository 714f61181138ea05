//! A batch of recorded episodes ready for training.
use crate::{
    error::TapeError,
    tape::{Tape, TapeConfig, TapeWriter},
    Batch,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// The four tapes recorded for one training batch.
///
/// All tapes share the same number of steps and lanes. Callers are expected to
/// record them with the same presence pattern; a mismatch surfaces at the first
/// operation that reads the mismatched steps.
#[derive(Clone, Debug)]
pub struct RolloutSet {
    inputs: Tape,
    actions: Tape,
    agent_outs: Tape,
    rewards: Tape,
    num_steps: usize,
}

impl RolloutSet {
    /// Bundles the tapes of a rollout.
    ///
    /// `agent_outs` holds the action-distribution parameters the policy
    /// produced while acting, and `rewards` has one value per lane and step.
    pub fn new(inputs: Tape, actions: Tape, agent_outs: Tape, rewards: Tape) -> Result<Self> {
        for tape in [&actions, &agent_outs, &rewards].iter() {
            if tape.len() != inputs.len() {
                return Err(TapeError::StepMismatch {
                    expected: inputs.len(),
                    actual: tape.len(),
                }
                .into());
            }
            if tape.lanes() != inputs.lanes() {
                return Err(TapeError::LaneMismatch {
                    expected: inputs.lanes(),
                    actual: tape.lanes(),
                }
                .into());
            }
        }
        let num_steps = rewards.num_present()?;
        Ok(Self {
            inputs,
            actions,
            agent_outs,
            rewards,
            num_steps,
        })
    }

    /// Observations.
    pub fn inputs(&self) -> &Tape {
        &self.inputs
    }

    /// Sampled actions.
    pub fn actions(&self) -> &Tape {
        &self.actions
    }

    /// Distribution parameters of the policy that sampled the actions.
    pub fn agent_outs(&self) -> &Tape {
        &self.agent_outs
    }

    /// Rewards.
    pub fn rewards(&self) -> &Tape {
        &self.rewards
    }

    /// Number of time steps of the tapes.
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    /// Returns `true` if the tapes have no steps.
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Number of episodes, one per lane.
    pub fn num_episodes(&self) -> usize {
        self.inputs.lanes()
    }

    /// Number of present lane-steps, i.e. the number of recorded transitions.
    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    /// Concatenates rollout sets along the lane dimension.
    ///
    /// Lanes keep their order: the lanes of `sets[0]` come first. The packed set
    /// is as long as the longest input; shorter sets contribute absent lanes past
    /// their end.
    pub fn pack(sets: &[RolloutSet], config: &PackConfig) -> Result<Self> {
        if sets.is_empty() {
            return Err(TapeError::NoLanes.into());
        }
        let inputs = pack_tapes(sets.iter().map(|s| &s.inputs), &config.inputs)?;
        let actions = pack_tapes(sets.iter().map(|s| &s.actions), &config.actions)?;
        let agent_outs = pack_tapes(sets.iter().map(|s| &s.agent_outs), &config.agent_outs)?;
        let rewards = pack_tapes(sets.iter().map(|s| &s.rewards), &config.rewards)?;
        log::debug!(
            "Packed {} rollout sets into {} lanes and {} steps",
            sets.len(),
            inputs.lanes(),
            inputs.len()
        );
        Self::new(inputs, actions, agent_outs, rewards)
    }
}

fn pack_tapes<'a>(tapes: impl Iterator<Item = &'a Tape>, config: &TapeConfig) -> Result<Tape> {
    let tapes = tapes.collect::<Vec<_>>();
    let width = tapes[0].width();
    if let Some(t) = tapes.iter().find(|t| t.width() != width) {
        return Err(TapeError::WidthMismatch {
            expected: width,
            actual: t.width(),
        }
        .into());
    }
    let lanes = tapes.iter().map(|t| t.lanes()).sum();
    let len = tapes.iter().map(|t| t.len()).max().unwrap_or(0);

    let mut readers = tapes.iter().map(|t| t.read(0, None)).collect::<Vec<_>>();
    let mut writer = TapeWriter::new(lanes, width, config);
    for _ in 0..len {
        let parts = readers
            .iter_mut()
            .zip(tapes.iter())
            .map(|(r, t)| r.next().unwrap_or_else(|| Ok(Batch::absent(t.lanes(), width))))
            .collect::<Result<Vec<_>>>()?;
        writer.push(Batch::concat(&parts)?)?;
    }
    writer.close()
}

/// Backends of the tapes produced by [`RolloutSet::pack`].
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct PackConfig {
    /// Backend of the observation tape.
    pub inputs: TapeConfig,

    /// Backend of the action tape.
    pub actions: TapeConfig,

    /// Backend of the agent output tape.
    pub agent_outs: TapeConfig,

    /// Backend of the reward tape.
    pub rewards: TapeConfig,
}

impl PackConfig {
    /// Sets the backend of the observation tape.
    pub fn inputs(mut self, v: TapeConfig) -> Self {
        self.inputs = v;
        self
    }

    /// Sets the backend of the action tape.
    pub fn actions(mut self, v: TapeConfig) -> Self {
        self.actions = v;
        self
    }

    /// Sets the backend of the agent output tape.
    pub fn agent_outs(mut self, v: TapeConfig) -> Self {
        self.agent_outs = v;
        self
    }

    /// Sets the backend of the reward tape.
    pub fn rewards(mut self, v: TapeConfig) -> Self {
        self.rewards = v;
        self
    }
}
