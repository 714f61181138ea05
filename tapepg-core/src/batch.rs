//! One time step of a batched tape.
use crate::error::TapeError;
use serde::{Deserialize, Serialize};

/// Values of a single time step across a set of lanes.
///
/// Only the lanes flagged in `present` carry values. Their rows are stored
/// back to back in `packed`, so `packed.len() == num_present() * width()`.
/// Rows for absent lanes are never materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    present: Vec<bool>,
    packed: Vec<f32>,
    width: usize,
}

impl Batch {
    /// Creates a batch, checking the packed values against the presence mask.
    pub fn new(present: Vec<bool>, packed: Vec<f32>, width: usize) -> Result<Self, TapeError> {
        let expected = present.iter().filter(|p| **p).count() * width;
        if packed.len() != expected {
            return Err(TapeError::PresenceMismatch {
                expected,
                actual: packed.len(),
            });
        }
        Ok(Self {
            present,
            packed,
            width,
        })
    }

    /// Creates a batch in which every lane is present.
    ///
    /// The number of lanes is `values.len() / width`.
    pub fn full(values: Vec<f32>, width: usize) -> Result<Self, TapeError> {
        if width == 0 || values.len() % width != 0 {
            return Err(TapeError::WidthMismatch {
                expected: width,
                actual: values.len(),
            });
        }
        let present = vec![true; values.len() / width];
        Self::new(present, values, width)
    }

    /// Creates a batch where no lane is present.
    pub fn absent(lanes: usize, width: usize) -> Self {
        Self {
            present: vec![false; lanes],
            packed: vec![],
            width,
        }
    }

    /// Number of lanes, present or not.
    pub fn lanes(&self) -> usize {
        self.present.len()
    }

    /// Number of values per lane.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of present lanes.
    pub fn num_present(&self) -> usize {
        if self.width == 0 {
            self.present.iter().filter(|p| **p).count()
        } else {
            self.packed.len() / self.width
        }
    }

    /// The presence mask.
    pub fn present(&self) -> &[bool] {
        &self.present
    }

    /// Rows of the present lanes, back to back.
    pub fn packed(&self) -> &[f32] {
        &self.packed
    }

    /// Consumes the batch and returns the mask and the packed values.
    pub fn into_parts(self) -> (Vec<bool>, Vec<f32>) {
        (self.present, self.packed)
    }

    /// Iterates over `(lane, row)` for the present lanes.
    pub fn rows(&self) -> impl Iterator<Item = (usize, &[f32])> + '_ {
        let width = self.width;
        self.present
            .iter()
            .enumerate()
            .filter(|(_, p)| **p)
            .map(|(lane, _)| lane)
            .zip(self.packed.chunks(width.max(1)))
    }

    /// Returns the row of a lane, or `None` if the lane is absent.
    pub fn row(&self, lane: usize) -> Option<&[f32]> {
        self.rows().find(|(l, _)| *l == lane).map(|(_, row)| row)
    }

    /// Re-expresses the batch under another presence mask.
    ///
    /// Lanes present in `present` but absent here get zero rows; lanes absent in
    /// `present` are dropped.
    pub fn expand(&self, present: &[bool]) -> Result<Self, TapeError> {
        self.check_lanes(present.len())?;
        let mut packed = Vec::with_capacity(present.len() * self.width);
        let mut rows = self.rows().peekable();
        for (lane, &p) in present.iter().enumerate() {
            let row = if rows.peek().map(|(l, _)| *l) == Some(lane) {
                rows.next().map(|(_, row)| row)
            } else {
                None
            };
            if p {
                match row {
                    Some(row) => packed.extend_from_slice(row),
                    None => packed.extend(std::iter::repeat(0.0).take(self.width)),
                }
            }
        }
        Self::new(present.to_vec(), packed, self.width)
    }

    /// Keeps only the lanes that are present both here and in `present`.
    pub fn reduce(&self, present: &[bool]) -> Result<Self, TapeError> {
        self.check_lanes(present.len())?;
        let mask = self
            .present
            .iter()
            .zip(present)
            .map(|(a, b)| *a && *b)
            .collect::<Vec<_>>();
        let packed = self
            .rows()
            .filter(|(lane, _)| mask[*lane])
            .flat_map(|(_, row)| row.iter().copied())
            .collect();
        Self::new(mask, packed, self.width)
    }

    /// Multiplies every value by `factor`.
    pub fn scale(&mut self, factor: f32) {
        self.packed.iter_mut().for_each(|v| *v *= factor);
    }

    /// Concatenates batches along the lane dimension.
    pub fn concat(batches: &[Batch]) -> Result<Self, TapeError> {
        let width = match batches.first() {
            Some(b) => b.width,
            None => return Err(TapeError::NoLanes),
        };
        let mut present = vec![];
        let mut packed = vec![];
        for b in batches {
            if b.width != width {
                return Err(TapeError::WidthMismatch {
                    expected: width,
                    actual: b.width,
                });
            }
            present.extend_from_slice(&b.present);
            packed.extend_from_slice(&b.packed);
        }
        Self::new(present, packed, width)
    }

    /// Returns the first lane present here but absent in `prev_present`, if any.
    pub(crate) fn reappearing_lane(&self, prev_present: &[bool]) -> Option<usize> {
        self.present
            .iter()
            .zip(prev_present)
            .position(|(now, before)| *now && !*before)
    }

    fn check_lanes(&self, lanes: usize) -> Result<(), TapeError> {
        if lanes != self.lanes() {
            Err(TapeError::LaneMismatch {
                expected: self.lanes(),
                actual: lanes,
            })
        } else {
            Ok(())
        }
    }
}
