use super::{TapeConfig, TapeReader, TapeWriter};
use crate::{error::TapeError, Batch};
use anyhow::Result;
use std::{fmt, sync::Arc};

pub(super) enum Storage {
    Reference(Vec<Batch>),
    Compressed {
        checkpoint_interval: usize,
        segments: Vec<Vec<u8>>,
    },
}

pub(super) struct Inner {
    pub(super) lanes: usize,
    pub(super) width: usize,
    pub(super) len: usize,
    pub(super) config: TapeConfig,
    pub(super) storage: Storage,
}

/// An immutable sequence of [`Batch`]es indexed by time step.
///
/// Every batch of a tape has the same number of lanes and the same row width,
/// and a lane that becomes absent stays absent. Cloning a tape shares the
/// underlying storage, which is released when the last clone is dropped.
#[derive(Clone)]
pub struct Tape {
    pub(super) inner: Arc<Inner>,
}

impl fmt::Debug for Tape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tape")
            .field("lanes", &self.inner.lanes)
            .field("width", &self.inner.width)
            .field("len", &self.inner.len)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl Tape {
    /// Builds a tape from batches in time order.
    pub fn from_batches(
        lanes: usize,
        width: usize,
        batches: impl IntoIterator<Item = Batch>,
        config: &TapeConfig,
    ) -> Result<Self> {
        let mut writer = TapeWriter::new(lanes, width, config);
        for batch in batches {
            writer.push(batch)?;
        }
        writer.close()
    }

    /// Builds a tape of `len` steps from per-lane sequences.
    ///
    /// `lanes[l]` holds the rows of lane `l` back to back, one row of `width`
    /// values per step in which the lane is present. A lane is present from step
    /// 0 until its rows run out.
    pub fn from_lane_values(
        lanes: &[Vec<f32>],
        width: usize,
        len: usize,
        config: &TapeConfig,
    ) -> Result<Self> {
        for l in lanes {
            if width == 0 || l.len() % width != 0 {
                return Err(TapeError::WidthMismatch {
                    expected: width,
                    actual: l.len(),
                }
                .into());
            }
            if l.len() / width > len {
                return Err(TapeError::StepOutOfRange {
                    step: l.len() / width,
                    len,
                }
                .into());
            }
        }

        let batches = (0..len).map(|t| {
            let present = lanes
                .iter()
                .map(|l| (t + 1) * width <= l.len())
                .collect::<Vec<_>>();
            let packed = lanes
                .iter()
                .filter(|l| (t + 1) * width <= l.len())
                .flat_map(|l| l[t * width..(t + 1) * width].iter().copied())
                .collect::<Vec<_>>();
            (present, packed)
        });

        let mut writer = TapeWriter::new(lanes.len(), width, config);
        for (present, packed) in batches {
            writer.push(Batch::new(present, packed, width)?)?;
        }
        writer.close()
    }

    /// Collects the rows of each lane, in time order, back to back.
    ///
    /// This is the inverse of [`Tape::from_lane_values`].
    pub fn to_lane_values(&self) -> Result<Vec<Vec<f32>>> {
        let mut lanes = vec![vec![]; self.lanes()];
        for batch in self.read(0, None) {
            let batch = batch?;
            for (lane, row) in batch.rows() {
                lanes[lane].extend_from_slice(row);
            }
        }
        Ok(lanes)
    }

    /// Number of time steps.
    pub fn len(&self) -> usize {
        self.inner.len
    }

    /// Returns `true` if the tape has no time steps.
    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// Number of lanes.
    pub fn lanes(&self) -> usize {
        self.inner.lanes
    }

    /// Number of values per lane and step.
    pub fn width(&self) -> usize {
        self.inner.width
    }

    /// Backend configuration the tape was written with.
    pub fn config(&self) -> &TapeConfig {
        &self.inner.config
    }

    /// Streams the batches of steps `start..end`.
    ///
    /// `end` defaults to the length of the tape and is clamped to it.
    pub fn read(&self, start: usize, end: Option<usize>) -> TapeReader<'_> {
        let end = end.unwrap_or(self.len()).min(self.len());
        TapeReader::new(self, start.min(end), end)
    }

    /// Returns the batch at `step`.
    ///
    /// Compressed tapes decode the segment containing `step`.
    pub fn get(&self, step: usize) -> Result<Batch> {
        if step >= self.len() {
            return Err(TapeError::StepOutOfRange {
                step,
                len: self.len(),
            }
            .into());
        }
        match self.read(step, Some(step + 1)).next() {
            Some(batch) => batch,
            None => Err(TapeError::StepOutOfRange {
                step,
                len: self.len(),
            }
            .into()),
        }
    }

    /// Total number of present lane-steps.
    pub fn num_present(&self) -> Result<usize> {
        let mut n = 0;
        for batch in self.read(0, None) {
            n += batch?.num_present();
        }
        Ok(n)
    }

    /// Writes a new tape whose step `t` is `f(t, batch_t)`.
    pub fn map<F>(&self, config: &TapeConfig, mut f: F) -> Result<Self>
    where
        F: FnMut(usize, Batch) -> Result<Batch>,
    {
        let mut writer: Option<TapeWriter> = None;
        for (t, batch) in self.read(0, None).enumerate() {
            let out = f(t, batch?)?;
            let w = writer.get_or_insert_with(|| TapeWriter::new(out.lanes(), out.width(), config));
            w.push(out)?;
        }
        match writer {
            Some(w) => w.close(),
            None => TapeWriter::new(self.lanes(), self.width(), config).close(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tape::Codec;

    fn lanes() -> Vec<Vec<f32>> {
        vec![
            vec![1., 2., 3., 4., 5.],
            vec![10., 20.],
            vec![],
            vec![7., 8., 9.],
        ]
    }

    fn configs() -> Vec<TapeConfig> {
        vec![
            TapeConfig::Reference,
            TapeConfig::compressed(Codec::Raw).checkpoint_interval(2),
            TapeConfig::compressed(Codec::Uint8).checkpoint_interval(3),
        ]
    }

    #[test]
    fn test_lane_values_survive_every_backend() -> Result<()> {
        for config in configs() {
            let tape = Tape::from_lane_values(&lanes(), 1, 6, &config)?;
            assert_eq!(tape.len(), 6);
            assert_eq!(tape.lanes(), 4);
            assert_eq!(tape.num_present()?, 10);
            assert_eq!(tape.to_lane_values()?, lanes());
            assert_eq!(tape.get(5)?, Batch::absent(4, 1));
        }
        Ok(())
    }

    #[test]
    fn test_replay_from_the_middle() -> Result<()> {
        for config in configs() {
            let tape = Tape::from_lane_values(&lanes(), 1, 5, &config)?;
            let tail = tape
                .read(3, None)
                .map(|b| b.map(|b| b.packed().to_vec()))
                .collect::<Result<Vec<_>>>()?;
            assert_eq!(tail, vec![vec![4.], vec![5.]]);

            // Replaying twice gives the same data.
            let first = tape.read(1, Some(4)).collect::<Result<Vec<_>>>()?;
            let second = tape.read(1, Some(4)).collect::<Result<Vec<_>>>()?;
            assert_eq!(first, second);
            assert_eq!(first[0].packed(), &[2., 20., 8.]);
        }
        Ok(())
    }

    #[test]
    fn test_get_out_of_range() -> Result<()> {
        let tape = Tape::from_lane_values(&lanes(), 1, 5, &TapeConfig::Reference)?;
        let err = tape.get(5).unwrap_err();
        assert_eq!(
            err.downcast_ref::<TapeError>(),
            Some(&TapeError::StepOutOfRange { step: 5, len: 5 })
        );
        Ok(())
    }

    #[test]
    fn test_clones_share_storage() -> Result<()> {
        let tape = Tape::from_lane_values(&lanes(), 1, 5, &TapeConfig::Reference)?;
        let clone = tape.clone();
        assert!(Arc::ptr_eq(&tape.inner, &clone.inner));
        drop(tape);
        assert_eq!(clone.to_lane_values()?, lanes());
        Ok(())
    }
}
