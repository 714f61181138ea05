//! Errors in the library.
use thiserror::Error;

/// Errors in the library.
#[derive(Error, Debug, PartialEq)]
pub enum TapeError {
    /// The packed values do not match the presence mask.
    #[error("Packed length {actual} does not match {expected} values implied by the presence mask")]
    PresenceMismatch {
        /// Number of values implied by the mask and width.
        expected: usize,
        /// Number of values given.
        actual: usize,
    },

    /// The number of lanes differs between two batches or tapes.
    #[error("Lane count mismatch: expected {expected}, got {actual}")]
    LaneMismatch {
        /// Expected number of lanes.
        expected: usize,
        /// Actual number of lanes.
        actual: usize,
    },

    /// The row width differs between two batches or tapes.
    #[error("Row width mismatch: expected {expected}, got {actual}")]
    WidthMismatch {
        /// Expected width.
        expected: usize,
        /// Actual width.
        actual: usize,
    },

    /// The number of time steps differs between tapes of a rollout set.
    #[error("Step count mismatch: expected {expected}, got {actual}")]
    StepMismatch {
        /// Expected number of steps.
        expected: usize,
        /// Actual number of steps.
        actual: usize,
    },

    /// A lane became present again after its episode ended.
    #[error("Lane {lane} reappears at step {step} after being absent")]
    NonMonotonicPresence {
        /// Time step of the offending batch.
        step: usize,
        /// Offending lane.
        lane: usize,
    },

    /// Random access past the end of a tape.
    #[error("Step {step} is out of range for a tape of length {len}")]
    StepOutOfRange {
        /// Requested step.
        step: usize,
        /// Length of the tape.
        len: usize,
    },

    /// An aggregate over lanes was requested for a tape without lanes.
    #[error("The tape has no lanes")]
    NoLanes,

    /// A discount factor outside `(0, 1]`.
    #[error("Factor {0} is outside of (0, 1]")]
    InvalidFactor(f64),

    /// A thread panicked while holding the parameter lock.
    #[error("Parameter lock is poisoned")]
    PoisonedLock,

    /// The key is not in the record.
    #[error("Record key error: {0}")]
    RecordKeyError(String),

    /// The value in the record has another type.
    #[error("Record value type error: expected {0}")]
    RecordValueTypeError(String),
}
