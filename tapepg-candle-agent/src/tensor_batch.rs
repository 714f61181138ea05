use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use tapepg_core::{error::TapeError, Batch, Tape, TapeConfig, TapeWriter};

/// A [`Batch`] held as a tensor of shape `[num_present, width]`.
///
/// `packed` is `None` when no lane is present.
#[derive(Clone, Debug)]
pub struct TensorBatch {
    present: Vec<bool>,
    packed: Option<Tensor>,
}

impl TensorBatch {
    /// Creates a batch from a presence mask and the rows of the present lanes.
    pub fn new(present: Vec<bool>, packed: Option<Tensor>) -> Self {
        Self { present, packed }
    }

    /// Copies a [`Batch`] to `device`.
    pub fn from_batch(batch: &Batch, device: &Device) -> Result<Self> {
        let n = batch.num_present();
        let packed = if n == 0 {
            None
        } else {
            Some(Tensor::from_slice(batch.packed(), (n, batch.width()), device)?)
        };
        Ok(Self {
            present: batch.present().to_vec(),
            packed,
        })
    }

    /// Copies the values back into a [`Batch`] with rows of `width` values.
    pub fn to_batch(&self, width: usize) -> Result<Batch> {
        let packed = match &self.packed {
            Some(t) => t.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?,
            None => vec![],
        };
        Ok(Batch::new(self.present.clone(), packed, width)?)
    }

    /// The presence mask.
    pub fn present(&self) -> &[bool] {
        &self.present
    }

    /// Rows of the present lanes.
    pub fn packed(&self) -> Option<&Tensor> {
        self.packed.as_ref()
    }

    /// Rows of the present lanes, failing if no lane is present.
    pub fn required(&self) -> Result<&Tensor> {
        match &self.packed {
            Some(t) => Ok(t),
            None => Err(TapeError::PresenceMismatch {
                expected: self.present.iter().filter(|p| **p).count().max(1),
                actual: 0,
            }
            .into()),
        }
    }

    /// Number of present lanes.
    pub fn num_present(&self) -> usize {
        self.packed.as_ref().map(|t| t.dims()[0]).unwrap_or(0)
    }

    /// Stops gradients from flowing back through the values.
    pub fn detach(&self) -> Self {
        Self {
            present: self.present.clone(),
            packed: self.packed.as_ref().map(|t| t.detach()),
        }
    }
}

/// Steps of a tape as tensors that take part in automatic differentiation.
///
/// Gradients of anything computed from a [`TensorSeq`] flow back into the
/// tensors it holds, and further into whatever produced them. Sequences read
/// from a tape are leaves.
#[derive(Clone, Debug)]
pub struct TensorSeq {
    lanes: usize,
    steps: Vec<TensorBatch>,
}

impl TensorSeq {
    /// Creates a sequence from its steps.
    pub fn new(lanes: usize, steps: Vec<TensorBatch>) -> Self {
        Self { lanes, steps }
    }

    /// Reads steps `start..end` of a tape into `device`.
    ///
    /// `end` defaults to the length of the tape.
    pub fn from_tape(tape: &Tape, start: usize, end: Option<usize>, device: &Device) -> Result<Self> {
        let steps = tape
            .read(start, end)
            .map(|b| TensorBatch::from_batch(&b?, device))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            lanes: tape.lanes(),
            steps,
        })
    }

    /// Writes the values into a new tape with rows of `width` values.
    pub fn to_tape(&self, width: usize, config: &TapeConfig) -> Result<Tape> {
        let mut writer = TapeWriter::new(self.lanes, width, config);
        for step in self.steps.iter() {
            writer.push(step.to_batch(width)?)?;
        }
        writer.close()
    }

    /// Number of lanes.
    pub fn lanes(&self) -> usize {
        self.lanes
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` if there are no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The steps.
    pub fn steps(&self) -> &[TensorBatch] {
        &self.steps
    }

    /// Applies `f` to the rows of every step in which some lane is present.
    pub fn map(&self, mut f: impl FnMut(&Tensor) -> Result<Tensor>) -> Result<Self> {
        let steps = self
            .steps
            .iter()
            .map(|s| -> Result<TensorBatch> {
                let packed = match s.packed() {
                    Some(t) => Some(f(t)?),
                    None => None,
                };
                Ok(TensorBatch::new(s.present.clone(), packed))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(self.lanes, steps))
    }

    /// Stacks the rows of all steps into one tensor, or `None` if no lane is
    /// ever present.
    pub fn flatten(&self) -> Result<Option<Tensor>> {
        let rows = self.steps.iter().filter_map(|s| s.packed()).collect::<Vec<_>>();
        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Tensor::cat(&rows, 0)?))
        }
    }

    /// Splits rows stacked like [`TensorSeq::flatten`] back into the steps of
    /// this sequence.
    pub fn unflatten(&self, xs: &Tensor) -> Result<Self> {
        let mut offset = 0;
        let steps = self
            .steps
            .iter()
            .map(|s| -> Result<TensorBatch> {
                let n = s.num_present();
                let packed = if n == 0 {
                    None
                } else {
                    Some(xs.narrow(0, offset, n)?)
                };
                offset += n;
                Ok(TensorBatch::new(s.present.clone(), packed))
            })
            .collect::<Result<Vec<_>>>()?;
        if offset != xs.dims()[0] {
            return Err(TapeError::PresenceMismatch {
                expected: offset,
                actual: xs.dims()[0],
            }
            .into());
        }
        Ok(Self::new(self.lanes, steps))
    }

    /// Stops gradients from flowing back through the values.
    pub fn detach(&self) -> Self {
        Self::new(self.lanes, self.steps.iter().map(|s| s.detach()).collect())
    }
}
