use anyhow::Result;
use candle_core::{backprop::GradStore, DType, Tensor, TensorId, Var};
use std::collections::HashMap;

/// Gradients of an objective with respect to a fixed set of parameters.
///
/// A [`Gradient`] starts empty and accumulates additively: the gradient of each
/// variable is the sum over every [`GradStore`] passed to
/// [`Gradient::accumulate`]. Only the parameters are kept; gradients of other
/// tensors in the graph are dropped with the store. Applying it is the only way
/// the trainer changes parameters, either directly with
/// [`Gradient::add_to_vars`] or through
/// [`Optimizer::ascend`](crate::opt::Optimizer::ascend).
pub struct Gradient {
    vars: Vec<Var>,
    grads: HashMap<TensorId, Tensor>,
}

impl Gradient {
    /// A zero gradient over `vars`.
    pub fn new(vars: Vec<Var>) -> Self {
        Self {
            vars,
            grads: HashMap::new(),
        }
    }

    /// Returns `true` if there are no parameters to differentiate.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// The parameters.
    pub fn vars(&self) -> &[Var] {
        &self.vars
    }

    /// Gradient of a parameter, `None` if nothing has reached it.
    pub fn get(&self, var: &Var) -> Option<&Tensor> {
        self.grads.get(&var.id())
    }

    /// Adds the gradients of the parameters found in `grads`.
    pub fn accumulate(&mut self, grads: GradStore) -> Result<()> {
        for var in self.vars.iter() {
            if let Some(g) = grads.get(var.as_tensor()) {
                let sum = match self.grads.get(&var.id()) {
                    Some(prev) => (prev + g)?,
                    None => g.clone(),
                };
                self.grads.insert(var.id(), sum);
            }
        }
        Ok(())
    }

    /// Moves every parameter by `scale` times its gradient.
    pub fn add_to_vars(&self, scale: f64) -> Result<()> {
        for var in self.vars.iter() {
            if let Some(g) = self.get(var) {
                var.set(&(var.as_tensor() + g.affine(scale, 0.0)?)?)?;
            }
        }
        Ok(())
    }

    /// Negated gradients of the parameters, for optimizers that minimize.
    ///
    /// The store holds nothing but the parameters. Returns `None` if nothing has
    /// been accumulated.
    pub fn into_descent(self) -> Result<Option<GradStore>> {
        let device = match self.vars.first() {
            Some(var) if !self.grads.is_empty() => var.device().clone(),
            _ => return Ok(None),
        };
        let mut store = empty_store(&device)?;
        for var in self.vars.iter() {
            if let Some(g) = self.grads.get(&var.id()) {
                store.insert(var.as_tensor(), g.neg()?);
            }
        }
        Ok(Some(store))
    }
}

// `GradStore` has no public constructor; a backward pass over a constant leaves
// only the constant itself in the store.
fn empty_store(device: &candle_core::Device) -> Result<GradStore> {
    let root = Tensor::zeros((), DType::F32, device)?;
    let mut store = root.backward()?;
    store.remove(&root);
    Ok(store)
}
