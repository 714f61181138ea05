use super::{base::Storage, codec::decode_segment, Tape};
use crate::{error::TapeError, Batch};
use anyhow::Result;

/// Streams the batches of a [`Tape`] in time order.
///
/// For a compressed tape the reader decodes the segment containing the first
/// requested step, skips forward within it, and decodes the following segments
/// as it goes. At most one decoded segment is held at a time.
///
/// Decoding errors are yielded once; the reader is exhausted afterwards.
pub struct TapeReader<'a> {
    tape: &'a Tape,
    next: usize,
    end: usize,
    buffered: std::vec::IntoIter<Batch>,
}

impl<'a> TapeReader<'a> {
    pub(super) fn new(tape: &'a Tape, start: usize, end: usize) -> Self {
        Self {
            tape,
            next: start,
            end,
            buffered: Vec::new().into_iter(),
        }
    }

    fn next_compressed(
        &mut self,
        checkpoint_interval: usize,
        segments: &[Vec<u8>],
    ) -> Result<Batch> {
        if let Some(batch) = self.buffered.next() {
            return Ok(batch);
        }
        let index = self.next / checkpoint_interval;
        let offset = self.next % checkpoint_interval;
        log::trace!("Decode segment {} from offset {}", index, offset);
        let bytes = segments.get(index).ok_or(TapeError::StepOutOfRange {
            step: self.next,
            len: self.tape.len(),
        })?;
        self.buffered = decode_segment(bytes, self.tape.width())?.into_iter();
        match self.buffered.nth(offset) {
            Some(batch) => Ok(batch),
            None => Err(TapeError::StepOutOfRange {
                step: self.next,
                len: self.tape.len(),
            }
            .into()),
        }
    }
}

impl<'a> Iterator for TapeReader<'a> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let tape = self.tape;
        let item = match &tape.inner.storage {
            Storage::Reference(batches) => Ok(batches[self.next].clone()),
            Storage::Compressed {
                checkpoint_interval,
                segments,
            } => self.next_compressed(*checkpoint_interval, segments),
        };
        match item {
            Ok(_) => self.next += 1,
            Err(_) => self.next = self.end,
        }
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.end - self.next;
        (n, Some(n))
    }
}

impl<'a> ExactSizeIterator for TapeReader<'a> {}
