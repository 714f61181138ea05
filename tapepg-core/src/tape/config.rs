//! Configuration of the tape backend.
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Number of steps per encoded segment when not given explicitly.
pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 64;

/// How values are stored in a compressed tape.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Copy)]
pub enum Codec {
    /// Lossless `f32` values.
    Raw,

    /// Values rounded and clamped to `0..=255`, one byte each.
    ///
    /// Intended for image frames whose values are already integers in that range.
    Uint8,
}

/// Selects the storage backend of a [`Tape`](super::Tape).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub enum TapeConfig {
    /// All batches are kept in memory.
    Reference,

    /// Batches are encoded in segments, each compressed with DEFLATE.
    Compressed {
        /// Number of steps per segment; readers restart from segment boundaries.
        checkpoint_interval: usize,

        /// Encoding of the values.
        codec: Codec,
    },
}

impl Default for TapeConfig {
    fn default() -> Self {
        Self::Reference
    }
}

impl TapeConfig {
    /// Compressed backend with the default checkpoint interval.
    pub fn compressed(codec: Codec) -> Self {
        Self::Compressed {
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            codec,
        }
    }

    /// Sets the checkpoint interval. No effect on the reference backend.
    pub fn checkpoint_interval(self, v: usize) -> Self {
        match self {
            Self::Reference => Self::Reference,
            Self::Compressed { codec, .. } => Self::Compressed {
                checkpoint_interval: v.max(1),
                codec,
            },
        }
    }

    /// Constructs [`TapeConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`TapeConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}
