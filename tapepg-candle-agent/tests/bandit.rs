use anyhow::Result;
use candle_core::{DType, Device, D};
use candle_nn::{linear, Linear, VarBuilder, VarMap};
use tapepg_candle_agent::{
    action_space::Softmax,
    mlp::{Mlp, MlpConfig},
    model::{SeqModel, Stepwise, SubModel},
    opt::{Optimizer, OptimizerConfig},
    ppo::{Ppo, PpoConfig},
    TensorSeq,
};
use tapepg_core::{
    rewards::mean_reward, Codec, PackConfig, Phase, PhaseLock, RolloutSet, Tape, TapeConfig,
};

const LANES: usize = 8;

struct Policy {
    base: Stepwise<Mlp>,
    actor: Stepwise<Linear>,
}

impl Policy {
    fn logits(&self, inputs: &Tape) -> Result<TensorSeq> {
        let xs = TensorSeq::from_tape(inputs, 0, None, &Device::Cpu)?;
        self.actor.forward(&self.base.forward(&xs)?)
    }

    /// Probability of the rewarded action.
    fn p0(&self, inputs: &Tape) -> Result<f32> {
        let logits = self
            .logits(inputs)?
            .flatten()?
            .ok_or_else(|| anyhow::anyhow!("no rows"))?;
        let p = candle_nn::ops::softmax(&logits, D::Minus1)?;
        Ok(p.narrow(1, 0, 1)?.mean_all()?.to_scalar::<f32>()?)
    }
}

/// One-step episodes with a constant observation. Lanes alternate between
/// both arms; only arm 0 pays.
fn rollout(policy: &Policy, frames: &TapeConfig) -> Result<RolloutSet> {
    let obs = vec![vec![1f32]; LANES];
    let inputs = Tape::from_lane_values(&obs, 1, 1, frames)?;
    let arms = (0..LANES).map(|l| vec![(l % 2) as f32]).collect::<Vec<_>>();
    let rewards = arms
        .iter()
        .map(|a| vec![1.0 - a[0]])
        .collect::<Vec<_>>();
    let actions = Tape::from_lane_values(&arms, 1, 1, &TapeConfig::Reference)?;
    let rewards = Tape::from_lane_values(&rewards, 1, 1, &TapeConfig::Reference)?;
    let agent_outs = policy.logits(&inputs)?.to_tape(2, &TapeConfig::Reference)?;
    RolloutSet::new(inputs, actions, agent_outs, rewards)
}

fn build(vb: &VarBuilder) -> Result<(Policy, Stepwise<Linear>)> {
    let base = Mlp::build(vb.pp("base"), MlpConfig::new(1, vec![16], 16, true))?;
    let actor = linear(16, 2, vb.pp("actor"))?;
    let critic = linear(16, 1, vb.pp("critic"))?;
    let policy = Policy {
        base: Stepwise(base),
        actor: Stepwise(actor),
    };
    Ok((policy, Stepwise(critic)))
}

/// Everything that touches the parameters, so that acting and training only
/// reach the shared `Var`s through the lock.
struct Agent {
    varmap: VarMap,
    policy: Policy,
    ppo: Ppo<Stepwise<Mlp>, Stepwise<Linear>, Stepwise<Linear>, Softmax>,
    opt: Optimizer,
}

#[test_log::test]
fn test_ppo_prefers_paying_arm() -> Result<()> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    let (policy, critic) = build(&vb)?;
    let frames = TapeConfig::compressed(Codec::Raw).checkpoint_interval(1);

    let ppo = Ppo::build(
        PpoConfig::default().lambda(1.0),
        varmap.all_vars(),
        policy.base.clone(),
        policy.actor.clone(),
        critic,
        Softmax { n: 2 },
        None,
    );
    let opt = OptimizerConfig::Adam { lr: 1e-2 }.build(varmap.all_vars())?;
    let lock = PhaseLock::new(Agent {
        varmap,
        policy,
        ppo,
        opt,
    });

    let probe = Tape::from_lane_values(&[vec![1f32]], 1, 1, &TapeConfig::Reference)?;
    let p0_before = lock.read(|agent| agent.policy.p0(&probe))??;

    for _ in 0..20 {
        // Two collectors' rollouts form one training batch.
        let parts = vec![
            lock.read(|agent| rollout(&agent.policy, &frames))??,
            lock.read(|agent| rollout(&agent.policy, &frames))??,
        ];
        let batch = RolloutSet::pack(&parts, &PackConfig::default().inputs(frames.clone()))?;
        assert_eq!(batch.num_episodes(), 2 * LANES);
        assert_eq!(mean_reward(batch.rewards())?, 0.5);

        let mut agent = lock.train()?;
        assert_eq!(agent.phase(), Phase::Training);
        let advantages = agent.ppo.advantage(&batch)?;
        for _ in 0..4 {
            let (grad, terms) = agent.ppo.run(&batch, &advantages)?;
            assert!(terms.is_some());
            agent.opt.ascend(grad)?;
        }
    }
    assert_eq!(lock.phase()?, Phase::Collecting);

    let p0_after = lock.read(|agent| agent.policy.p0(&probe))??;
    assert!(
        p0_after > p0_before,
        "p0 went from {} to {}",
        p0_before,
        p0_after
    );
    let n_vars = lock.persist(|agent| Ok(agent.varmap.all_vars().len()))?;
    // Two layers of the base and one of each head.
    assert_eq!(n_vars, 8);
    Ok(())
}
