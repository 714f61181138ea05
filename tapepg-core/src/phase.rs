//! Exclusion between rollout collection and training.
//!
//! Acting in environments reads the policy parameters while training writes
//! them. A [`PhaseLock`] puts the parameters behind one mutex and tracks which
//! phase holds it:
//!
//! * [`PhaseLock::read`] gives collectors a consistent view of the parameters.
//! * [`PhaseLock::train`] switches to [`Phase::Training`] and hands out mutable
//!   access until the returned guard is dropped.
//! * [`PhaseLock::persist`] holds the same lock while the parameters are saved,
//!   so a save never observes a partially applied update.
//!
//! The lock only guards what is reached through it. Parameters with shared
//! interior state, such as candle `Var` handles and models holding clones of
//! them, must be put behind the lock as a whole and touched only through
//! [`PhaseLock::read`], [`PhaseLock::train`] and [`PhaseLock::persist`].
use crate::error::TapeError;
use anyhow::Result;
use log::debug;
use std::{
    ops::{Deref, DerefMut},
    sync::{Arc, Mutex, MutexGuard},
};

/// The phase of the training loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Rollouts are collected with the current parameters.
    Collecting,

    /// Gradients are being applied to the parameters.
    Training,
}

struct Shared<P> {
    phase: Phase,
    params: P,
}

/// Shared handle to parameters guarded by the current [`Phase`].
pub struct PhaseLock<P> {
    shared: Arc<Mutex<Shared<P>>>,
}

impl<P> Clone for PhaseLock<P> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<P> PhaseLock<P> {
    /// Starts in [`Phase::Collecting`].
    pub fn new(params: P) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                phase: Phase::Collecting,
                params,
            })),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Shared<P>>> {
        self.shared
            .lock()
            .map_err(|_| TapeError::PoisonedLock.into())
    }

    /// The current phase.
    ///
    /// Blocks while a training guard is alive, so from another thread this
    /// observes [`Phase::Collecting`] only.
    pub fn phase(&self) -> Result<Phase> {
        Ok(self.lock()?.phase)
    }

    /// Runs `f` on the parameters for acting.
    pub fn read<T>(&self, f: impl FnOnce(&P) -> T) -> Result<T> {
        let shared = self.lock()?;
        Ok(f(&shared.params))
    }

    /// Runs `f` on the parameters for saving them.
    pub fn persist<T>(&self, f: impl FnOnce(&P) -> Result<T>) -> Result<T> {
        let shared = self.lock()?;
        debug!("Persist parameters in phase {:?}", shared.phase);
        f(&shared.params)
    }

    /// Enters [`Phase::Training`].
    ///
    /// The returned guard gives mutable access to the parameters. Readers block
    /// until it is dropped, which returns the lock to [`Phase::Collecting`].
    pub fn train(&self) -> Result<TrainingGuard<'_, P>> {
        let mut shared = self.lock()?;
        shared.phase = Phase::Training;
        debug!("Enter training phase");
        Ok(TrainingGuard { shared })
    }
}

/// Exclusive access to the parameters during [`Phase::Training`].
pub struct TrainingGuard<'a, P> {
    shared: MutexGuard<'a, Shared<P>>,
}

impl<'a, P> TrainingGuard<'a, P> {
    /// Always [`Phase::Training`].
    pub fn phase(&self) -> Phase {
        self.shared.phase
    }
}

impl<'a, P> Deref for TrainingGuard<'a, P> {
    type Target = P;

    fn deref(&self) -> &P {
        &self.shared.params
    }
}

impl<'a, P> DerefMut for TrainingGuard<'a, P> {
    fn deref_mut(&mut self) -> &mut P {
        &mut self.shared.params
    }
}

impl<'a, P> Drop for TrainingGuard<'a, P> {
    fn drop(&mut self) {
        self.shared.phase = Phase::Collecting;
        debug!("Leave training phase");
    }
}
