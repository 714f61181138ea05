//! PPO trainer.
use super::{ppo_objective, ObjectiveTerms, PpoConfig, PpoTerms};
use crate::{
    action_space::LogProber, model::SeqModel, regularizer::Regularizer, Gradient, TensorSeq,
};
use anyhow::Result;
use candle_core::{Device, Tensor, Var};
use log::{debug, trace};
use tapepg_core::{
    judger::{GaeJudger, QJudger},
    RolloutSet, Tape, TapeConfig, TapeWriter,
};

#[cfg_attr(doc, aquamarine::aquamarine)]
/// Computes PPO gradients from recorded rollouts.
///
/// The base extracts features shared by the actor, which gives action
/// distribution parameters, and the critic, which gives state values. Use
/// [`PassthroughBase`](crate::model::PassthroughBase) when the heads read the
/// observations directly.
///
/// ```mermaid
/// graph LR
///     I[Inputs] --> B[Base]
///     B --> A[Actor]
///     B --> C[Critic]
///     A --> R[Ratios]
///     O[AgentOuts] --> R
///     R --> S[Clipped surrogate]
///     V[Advantages] --> S
///     C --> Q[Critic error]
///     T[Returns] --> Q
///     A --> G[Regularizer]
/// ```
///
/// A training batch goes through [`Ppo::advantage`] once, then through
/// [`Ppo::run`] as many times as there are optimization epochs. The advantage
/// tape is not refreshed between epochs even though the critic changes.
pub struct Ppo<B, A, C, S> {
    config: PpoConfig,
    params: Vec<Var>,
    base: B,
    actor: A,
    critic: C,
    action_space: S,
    regularizer: Option<Box<dyn Regularizer>>,
}

impl<B, A, C, S> Ppo<B, A, C, S>
where
    B: SeqModel,
    A: SeqModel,
    C: SeqModel,
    S: LogProber,
{
    /// Constructs the trainer.
    ///
    /// `params` are the variables the gradient is taken with respect to.
    pub fn build(
        config: PpoConfig,
        params: Vec<Var>,
        base: B,
        actor: A,
        critic: C,
        action_space: S,
        regularizer: Option<Box<dyn Regularizer>>,
    ) -> Self {
        Self {
            config,
            params,
            base,
            actor,
            critic,
            action_space,
            regularizer,
        }
    }

    /// Configuration of the trainer.
    pub fn config(&self) -> &PpoConfig {
        &self.config
    }

    /// Splits `0..len` into the ranges differentiated at once.
    fn chunks(&self, len: usize) -> Vec<(usize, usize)> {
        let k = self.config.chunk_steps.unwrap_or(len).max(1);
        (0..len).step_by(k).map(|s| (s, (s + k).min(len))).collect()
    }

    /// Values of the critic over a tape of observations.
    pub fn values(&self, inputs: &Tape) -> Result<Tape> {
        let device = self.config.device.to_candle()?;
        let mut writer = TapeWriter::new(inputs.lanes(), 1, &TapeConfig::Reference);
        for (start, end) in self.chunks(inputs.len()) {
            let xs = TensorSeq::from_tape(inputs, start, Some(end), &device)?;
            let values = self.critic.forward(&self.base.forward(&xs)?)?;
            for step in values.steps() {
                writer.push(step.to_batch(1)?)?;
            }
        }
        writer.close()
    }

    /// Estimates the advantages of a rollout with the critic as the baseline.
    ///
    /// Call this once per training batch, before [`Ppo::run`].
    pub fn advantage(&self, rollout: &RolloutSet) -> Result<Tape> {
        let judger = GaeJudger::new(self.config.discount, self.config.lambda)
            .config(self.config.advantage_tape.clone());
        let value_func = |inputs: &Tape| -> Result<Tape> { self.values(inputs) };
        judger.judge(rollout, &value_func)
    }

    /// Computes the gradient of the PPO objective over a rollout.
    ///
    /// The objective is the mean over present lane-steps of the clipped
    /// surrogate, the critic term and the regularization term. Critic targets
    /// are discounted returns. The returned terms are `None` when there is
    /// nothing to differentiate, either because there are no parameters or
    /// because no lane is present at any step; no model is called in that case.
    pub fn run(&self, rollout: &RolloutSet, advantages: &Tape) -> Result<(Gradient, Option<PpoTerms>)> {
        let mut grad = Gradient::new(self.params.clone());
        if grad.is_empty() {
            debug!("No parameters to differentiate");
            return Ok((grad, None));
        }
        let n = rollout.num_steps();
        if n == 0 {
            debug!("No present steps in the rollout");
            return Ok((grad, None));
        }

        let device = self.config.device.to_candle()?;
        let targets = QJudger {
            discount: self.config.discount,
        }
        .judge(rollout, &TapeConfig::Reference)?;

        let mut terms = PpoTerms::default();
        for (start, end) in self.chunks(rollout.len()) {
            trace!("Differentiate steps {}..{}", start, end);
            let sums = self.chunk_terms(rollout, advantages, &targets, start, end, &device)?;
            let objective = sums.total()?.affine(1.0 / n as f64, 0.0)?;
            grad.accumulate(objective.backward()?)?;
            terms.add_scaled(&sums.values()?, 1.0 / n as f32);
        }
        debug!("PPO over {} steps: {:?}", n, terms);
        Ok((grad, Some(terms)))
    }

    /// Actor and critic outputs for a range of observations.
    fn heads(&self, inputs: &TensorSeq) -> Result<(TensorSeq, TensorSeq)> {
        if self.config.pool_base {
            let features = self.base.forward(inputs)?;
            Ok((self.actor.forward(&features)?, self.critic.forward(&features)?))
        } else {
            let actor_out = self.actor.forward(&self.base.forward(inputs)?)?;
            let critic_out = self.critic.forward(&self.base.forward(inputs)?)?;
            Ok((actor_out, critic_out))
        }
    }

    /// Sums of the objective terms over steps `start..end`.
    fn chunk_terms(
        &self,
        rollout: &RolloutSet,
        advantages: &Tape,
        targets: &Tape,
        start: usize,
        end: usize,
        device: &Device,
    ) -> Result<ObjectiveTerms> {
        let read = |tape: &Tape| TensorSeq::from_tape(tape, start, Some(end), device);
        let inputs = read(rollout.inputs())?;
        let actions = read(rollout.actions())?;
        let old_params = read(rollout.agent_outs())?.detach();
        let advantages = read(advantages)?.detach();
        let targets = read(targets)?;
        let (actor_out, critic_out) = self.heads(&inputs)?;

        let mut sums = ObjectiveTerms::zeros(device)?;
        for t in 0..inputs.len() {
            if advantages.steps()[t].num_present() == 0 {
                continue;
            }
            let step = StepTensors {
                params: actor_out.steps()[t].required()?,
                old_params: old_params.steps()[t].required()?,
                actions: actions.steps()[t].required()?,
                advantages: advantages.steps()[t].required()?,
                values: critic_out.steps()[t].required()?,
                targets: targets.steps()[t].required()?,
            };
            sums = sums.add(&self.step_terms(&step)?)?;
        }
        Ok(sums)
    }

    fn step_terms(&self, step: &StepTensors) -> Result<ObjectiveTerms> {
        let new_lp = self.action_space.log_prob(step.params, step.actions)?;
        let old_lp = self
            .action_space
            .log_prob(step.old_params, step.actions)?
            .detach();
        let ratios = (new_lp - old_lp)?.exp()?;
        let advantage = ppo_objective(
            self.config.clip_range(),
            &ratios,
            &step.advantages.flatten_all()?,
        )?
        .sum_all()?;

        let error = (step.values.flatten_all()? - step.targets.flatten_all()?)?;
        let critic = error.sqr()?.sum_all()?.affine(-self.config.critic_weight, 0.0)?;

        let regularization = match &self.regularizer {
            Some(r) => r.regularize(step.params)?.sum_all()?,
            None => Tensor::zeros((), advantage.dtype(), advantage.device())?,
        };

        Ok(ObjectiveTerms {
            advantage,
            critic,
            regularization,
        })
    }
}

/// Packed rows of one step.
struct StepTensors<'a> {
    params: &'a Tensor,
    old_params: &'a Tensor,
    actions: &'a Tensor,
    advantages: &'a Tensor,
    values: &'a Tensor,
    targets: &'a Tensor,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        action_space::{Entropy, Softmax},
        model::{PassthroughBase, Stepwise},
        opt::OptimizerConfig,
        regularizer::EntropyRegularizer,
    };
    use candle_core::DType;
    use candle_nn::{linear, Linear, VarBuilder, VarMap};
    use std::{cell::Cell, rc::Rc};

    struct Counting<M> {
        inner: M,
        calls: Rc<Cell<usize>>,
    }

    impl<M> Counting<M> {
        fn new(inner: M) -> (Self, Rc<Cell<usize>>) {
            let calls = Rc::new(Cell::new(0));
            let model = Self {
                inner,
                calls: calls.clone(),
            };
            (model, calls)
        }
    }

    impl<M: SeqModel> SeqModel for Counting<M> {
        fn forward(&self, xs: &TensorSeq) -> Result<TensorSeq> {
            self.calls.set(self.calls.get() + 1);
            self.inner.forward(xs)
        }
    }

    struct Fixture {
        varmap: VarMap,
        actor: Linear,
        critic: Linear,
        rollout: RolloutSet,
    }

    /// Three lanes of lengths 3, 2 and 1 with 2-dimensional observations.
    fn fixture() -> Result<Fixture> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let actor = linear(2, 2, vb.pp("actor"))?;
        let critic = linear(2, 1, vb.pp("critic"))?;

        let cfg = TapeConfig::Reference;
        let inputs = Tape::from_lane_values(
            &[vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6], vec![-1., 1., 1., -1.], vec![0.5, 0.5]],
            2,
            3,
            &cfg,
        )?;
        let actions =
            Tape::from_lane_values(&[vec![0., 1., 1.], vec![1., 0.], vec![0.]], 1, 3, &cfg)?;
        let rewards =
            Tape::from_lane_values(&[vec![1., 0., 2.], vec![-1., 1.], vec![3.]], 1, 3, &cfg)?;
        let xs = TensorSeq::from_tape(&inputs, 0, None, &Device::Cpu)?;
        let agent_outs = Stepwise(actor.clone()).forward(&xs)?.to_tape(2, &cfg)?;

        Ok(Fixture {
            varmap,
            actor,
            critic,
            rollout: RolloutSet::new(inputs, actions, agent_outs, rewards)?,
        })
    }

    fn mean(tape: &Tape) -> Result<f32> {
        let values = tape.to_lane_values()?.concat();
        Ok(values.iter().sum::<f32>() / values.len() as f32)
    }

    #[test]
    fn test_empty_params_do_nothing() -> Result<()> {
        let f = fixture()?;
        let (base, base_calls) = Counting::new(PassthroughBase);
        let (actor, actor_calls) = Counting::new(Stepwise(f.actor.clone()));
        let (critic, critic_calls) = Counting::new(Stepwise(f.critic.clone()));
        let ppo = Ppo::build(PpoConfig::default(), vec![], base, actor, critic, Softmax { n: 2 }, None);

        let advantages = f.rollout.rewards().clone();
        let (grad, terms) = ppo.run(&f.rollout, &advantages)?;
        assert!(grad.is_empty());
        assert!(terms.is_none());
        assert_eq!(base_calls.get() + actor_calls.get() + critic_calls.get(), 0);
        Ok(())
    }

    #[test]
    fn test_rollout_without_steps() -> Result<()> {
        let f = fixture()?;
        let empty = Tape::from_lane_values(&[vec![], vec![]], 1, 0, &TapeConfig::Reference)?;
        let rollout = RolloutSet::new(empty.clone(), empty.clone(), empty.clone(), empty.clone())?;
        let (actor, actor_calls) = Counting::new(Stepwise(f.actor.clone()));
        let ppo = Ppo::build(
            PpoConfig::default(),
            f.varmap.all_vars(),
            PassthroughBase,
            actor,
            Stepwise(f.critic.clone()),
            Softmax { n: 2 },
            None,
        );
        let (grad, terms) = ppo.run(&rollout, &empty)?;
        assert!(!grad.is_empty());
        assert!(terms.is_none());
        assert_eq!(actor_calls.get(), 0);
        Ok(())
    }

    #[test]
    fn test_base_calls_and_chunking() -> Result<()> {
        let f = fixture()?;
        let params = f.varmap.all_vars();
        let build = |config: PpoConfig| {
            let (base, calls) = Counting::new(PassthroughBase);
            let ppo = Ppo::build(
                config,
                params.clone(),
                base,
                Stepwise(f.actor.clone()),
                Stepwise(f.critic.clone()),
                Softmax { n: 2 },
                None,
            );
            (ppo, calls)
        };

        let (whole, whole_calls) = build(PpoConfig::default());
        let advantages = whole.advantage(&f.rollout)?;
        whole_calls.set(0);
        let (grad_whole, terms_whole) = whole.run(&f.rollout, &advantages)?;
        assert_eq!(whole_calls.get(), 1);

        let (chunked, chunked_calls) = build(PpoConfig::default().chunk_steps(Some(1)));
        let (grad_chunked, terms_chunked) = chunked.run(&f.rollout, &advantages)?;
        assert_eq!(chunked_calls.get(), 3);

        let (split, split_calls) =
            build(PpoConfig::default().chunk_steps(Some(2)).pool_base(false));
        let (grad_split, _) = split.run(&f.rollout, &advantages)?;
        assert_eq!(split_calls.get(), 4);

        let terms_whole = terms_whole.ok_or_else(|| anyhow::anyhow!("no terms"))?;
        let terms_chunked = terms_chunked.ok_or_else(|| anyhow::anyhow!("no terms"))?;
        assert!((terms_whole.total() - terms_chunked.total()).abs() < 1e-5);

        for var in params.iter() {
            let g = grad_whole.get(var).ok_or_else(|| anyhow::anyhow!("no gradient"))?;
            let g = g.flatten_all()?.to_vec1::<f32>()?;
            for other in [&grad_chunked, &grad_split].iter() {
                let h = other.get(var).ok_or_else(|| anyhow::anyhow!("no gradient"))?;
                for (a, b) in g.iter().zip(h.flatten_all()?.to_vec1::<f32>()?) {
                    assert!((a - b).abs() < 1e-5, "{} != {}", a, b);
                }
            }
        }
        Ok(())
    }

    #[test_log::test]
    fn test_terms_at_unit_ratio() -> Result<()> {
        let f = fixture()?;
        let space = Softmax { n: 2 };
        let regularizer = EntropyRegularizer { coeff: 0.1, space };
        let config = PpoConfig::default().discount(0.9).critic_weight(0.5);
        let ppo = Ppo::build(
            config,
            f.varmap.all_vars(),
            PassthroughBase,
            Stepwise(f.actor.clone()),
            Stepwise(f.critic.clone()),
            space,
            Some(Box::new(regularizer)),
        );
        let advantages = ppo.advantage(&f.rollout)?;
        let (_, terms) = ppo.run(&f.rollout, &advantages)?;
        let terms = terms.ok_or_else(|| anyhow::anyhow!("no terms"))?;

        // The rollout was recorded with the current actor, so every ratio is one.
        assert!((terms.mean_advantage - mean(&advantages)?).abs() < 1e-5);

        let values = ppo.values(f.rollout.inputs())?.to_lane_values()?.concat();
        let targets = QJudger { discount: 0.9 }
            .judge(&f.rollout, &TapeConfig::Reference)?
            .to_lane_values()?
            .concat();
        let sq = values
            .iter()
            .zip(targets.iter())
            .map(|(v, q)| (v - q).powi(2))
            .sum::<f32>()
            / 6.0;
        assert!((terms.mean_critic + 0.5 * sq).abs() < 1e-4);

        let logits = f.rollout.agent_outs();
        let xs = TensorSeq::from_tape(logits, 0, None, &Device::Cpu)?
            .flatten()?
            .ok_or_else(|| anyhow::anyhow!("no rows"))?;
        let entropy = space.entropy(&xs)?.mean_all()?.to_scalar::<f32>()?;
        assert!((terms.mean_regularization - 0.1 * entropy).abs() < 1e-5);

        let record = terms.to_record();
        assert_eq!(record.get_scalar("ppo_objective")?, terms.total());
        Ok(())
    }

    #[test]
    fn test_repeated_runs_reuse_advantages() -> Result<()> {
        let f = fixture()?;
        let params = f.varmap.all_vars();
        let (critic, critic_calls) = Counting::new(Stepwise(f.critic.clone()));
        let ppo = Ppo::build(
            PpoConfig::default(),
            params,
            PassthroughBase,
            Stepwise(f.actor.clone()),
            critic,
            Softmax { n: 2 },
            None,
        );
        let advantages = ppo.advantage(&f.rollout)?;
        let before = advantages.to_lane_values()?;
        assert_eq!(critic_calls.get(), 1);

        let (_, first) = ppo.run(&f.rollout, &advantages)?;
        let (grad, second) = ppo.run(&f.rollout, &advantages)?;
        assert_eq!(first, second);
        assert_eq!(critic_calls.get(), 3);

        // Training the critic does not change the advantages used by later runs.
        grad.add_to_vars(0.05)?;
        let (_, third) = ppo.run(&f.rollout, &advantages)?;
        assert_eq!(advantages.to_lane_values()?, before);
        let (first, third) = (
            first.ok_or_else(|| anyhow::anyhow!("no terms"))?,
            third.ok_or_else(|| anyhow::anyhow!("no terms"))?,
        );
        assert!(third.total() > first.total());
        Ok(())
    }

    #[test]
    fn test_vars_outside_params_stay_put() -> Result<()> {
        let f = fixture()?;
        let mut actor_vars = vec![];
        let mut critic_vars = vec![];
        {
            let data = f
                .varmap
                .data()
                .lock()
                .map_err(|_| anyhow::anyhow!("poisoned varmap"))?;
            for (name, var) in data.iter() {
                if name.starts_with("actor") {
                    actor_vars.push(var.clone());
                } else {
                    critic_vars.push(var.clone());
                }
            }
        }
        let snapshot = |vars: &[Var]| -> Result<Vec<Vec<f32>>> {
            vars.iter()
                .map(|v| Ok(v.as_tensor().flatten_all()?.to_vec1::<f32>()?))
                .collect()
        };

        let ppo = Ppo::build(
            PpoConfig::default(),
            actor_vars.clone(),
            PassthroughBase,
            Stepwise(f.actor.clone()),
            Stepwise(f.critic.clone()),
            Softmax { n: 2 },
            None,
        );
        let advantages = ppo.advantage(&f.rollout)?;
        let (grad, _) = ppo.run(&f.rollout, &advantages)?;
        for var in critic_vars.iter() {
            assert!(grad.get(var).is_none());
        }

        let actor_before = snapshot(&actor_vars)?;
        let critic_before = snapshot(&critic_vars)?;
        let mut opt = OptimizerConfig::Sgd { lr: 0.1 }.build(f.varmap.all_vars())?;
        opt.ascend(grad)?;
        assert_eq!(snapshot(&critic_vars)?, critic_before);
        assert_ne!(snapshot(&actor_vars)?, actor_before);
        Ok(())
    }
}
