use super::{
    base::{Inner, Storage},
    codec::encode_segment,
    Codec, Tape, TapeConfig,
};
use crate::{error::TapeError, Batch};
use anyhow::Result;
use std::sync::Arc;

enum State {
    Reference(Vec<Batch>),
    Compressed {
        checkpoint_interval: usize,
        codec: Codec,
        pending: Vec<Batch>,
        segments: Vec<Vec<u8>>,
    },
}

/// Appends batches to a tape under construction.
///
/// Every pushed batch must have the lane count and width given to
/// [`TapeWriter::new`], and a lane absent at one step must stay absent at every
/// later step.
pub struct TapeWriter {
    lanes: usize,
    width: usize,
    config: TapeConfig,
    len: usize,
    last_present: Option<Vec<bool>>,
    state: State,
}

impl TapeWriter {
    /// Starts a tape with the given lane count, row width and backend.
    pub fn new(lanes: usize, width: usize, config: &TapeConfig) -> Self {
        let state = match config {
            TapeConfig::Reference => State::Reference(vec![]),
            TapeConfig::Compressed {
                checkpoint_interval,
                codec,
            } => State::Compressed {
                checkpoint_interval: (*checkpoint_interval).max(1),
                codec: *codec,
                pending: vec![],
                segments: vec![],
            },
        };
        Self {
            lanes,
            width,
            config: config.clone(),
            len: 0,
            last_present: None,
            state,
        }
    }

    /// Number of batches pushed so far.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if nothing has been pushed.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends the batch of the next time step.
    pub fn push(&mut self, batch: Batch) -> Result<()> {
        if batch.lanes() != self.lanes {
            return Err(TapeError::LaneMismatch {
                expected: self.lanes,
                actual: batch.lanes(),
            }
            .into());
        }
        if batch.width() != self.width {
            return Err(TapeError::WidthMismatch {
                expected: self.width,
                actual: batch.width(),
            }
            .into());
        }
        if let Some(prev) = &self.last_present {
            if let Some(lane) = batch.reappearing_lane(prev) {
                return Err(TapeError::NonMonotonicPresence {
                    step: self.len,
                    lane,
                }
                .into());
            }
        }
        self.last_present = Some(batch.present().to_vec());

        match &mut self.state {
            State::Reference(batches) => batches.push(batch),
            State::Compressed {
                checkpoint_interval,
                codec,
                pending,
                segments,
            } => {
                pending.push(batch);
                if pending.len() >= *checkpoint_interval {
                    segments.push(encode_segment(pending, *codec)?);
                    pending.clear();
                }
            }
        }
        self.len += 1;
        Ok(())
    }

    /// Finishes the tape.
    pub fn close(self) -> Result<Tape> {
        let storage = match self.state {
            State::Reference(batches) => Storage::Reference(batches),
            State::Compressed {
                checkpoint_interval,
                codec,
                pending,
                mut segments,
            } => {
                if !pending.is_empty() {
                    segments.push(encode_segment(&pending, codec)?);
                }
                log::trace!(
                    "Closed compressed tape: {} steps in {} segments",
                    self.len,
                    segments.len()
                );
                Storage::Compressed {
                    checkpoint_interval,
                    segments,
                }
            }
        };
        Ok(Tape {
            inner: Arc::new(Inner {
                lanes: self.lanes,
                width: self.width,
                len: self.len,
                config: self.config,
                storage,
            }),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_push_rejects_reappearing_lane() -> Result<()> {
        let mut writer = TapeWriter::new(2, 1, &TapeConfig::compressed(Codec::Raw));
        writer.push(Batch::full(vec![1., 2.], 1)?)?;
        writer.push(Batch::new(vec![true, false], vec![3.], 1)?)?;
        let err = writer
            .push(Batch::full(vec![4., 5.], 1)?)
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<TapeError>(),
            Some(&TapeError::NonMonotonicPresence { step: 2, lane: 1 })
        );
        assert_eq!(writer.len(), 2);
        Ok(())
    }

    #[test]
    fn test_push_rejects_other_shapes() -> Result<()> {
        let mut writer = TapeWriter::new(2, 1, &TapeConfig::Reference);
        assert!(writer.push(Batch::full(vec![1., 2., 3.], 1)?).is_err());
        assert!(writer.push(Batch::full(vec![1., 2., 3., 4.], 2)?).is_err());
        assert!(writer.is_empty());
        Ok(())
    }

    #[test]
    fn test_close_flushes_partial_segment() -> Result<()> {
        let config = TapeConfig::compressed(Codec::Raw).checkpoint_interval(4);
        let batches = (0..6).map(|t| Batch::full(vec![t as f32], 1)).collect::<Result<Vec<_>, _>>()?;
        let tape = Tape::from_batches(1, 1, batches, &config)?;
        assert_eq!(tape.len(), 6);
        assert_eq!(tape.get(5)?.packed(), &[5.]);
        assert_eq!(tape.get(3)?.packed(), &[3.]);
        Ok(())
    }
}
