//! Write-once, replayable sequences of batches.
//!
//! A [`Tape`] is produced by a [`TapeWriter`], which appends [`Batch`]es in time
//! order and is consumed by [`TapeWriter::close`]. Once closed, a tape is
//! immutable and cheap to clone; clones share the same storage.
//!
//! The storage backend is chosen with [`TapeConfig`]:
//!
//! * [`TapeConfig::Reference`] keeps every batch in memory and supports random
//!   access.
//! * [`TapeConfig::Compressed`] encodes segments of `checkpoint_interval` steps
//!   with a [`Codec`]. Readers replay forward from the segment boundary at or
//!   before the requested step and hold one decoded segment at a time.
//!
//! [`Batch`]: crate::Batch
mod base;
mod codec;
mod config;
mod reader;
mod writer;
pub use base::Tape;
pub use config::{Codec, TapeConfig, DEFAULT_CHECKPOINT_INTERVAL};
pub use reader::TapeReader;
pub use writer::TapeWriter;
