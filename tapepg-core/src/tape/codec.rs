//! Segment encoding for compressed tapes.
//!
//! A segment is the bincode encoding of its batches, compressed with DEFLATE.
use super::Codec;
use crate::Batch;
use anyhow::Result;
use flate2::{read::DeflateDecoder, write::DeflateEncoder, Compression};
use serde::{Deserialize, Serialize};
use std::io::Write;

#[derive(Serialize, Deserialize)]
enum Values {
    Raw(Vec<f32>),
    Uint8(Vec<u8>),
}

#[derive(Serialize, Deserialize)]
struct EncodedBatch {
    present: Vec<bool>,
    values: Values,
}

fn quantize(v: f32) -> u8 {
    v.round().max(0.0).min(255.0) as u8
}

/// Encodes consecutive batches into one byte buffer.
pub(super) fn encode_segment(batches: &[Batch], codec: Codec) -> Result<Vec<u8>> {
    let encoded = batches
        .iter()
        .map(|b| {
            let values = match codec {
                Codec::Raw => Values::Raw(b.packed().to_vec()),
                Codec::Uint8 => Values::Uint8(b.packed().iter().copied().map(quantize).collect()),
            };
            EncodedBatch {
                present: b.present().to_vec(),
                values,
            }
        })
        .collect::<Vec<_>>();
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&bincode::serialize(&encoded)?)?;
    Ok(encoder.finish()?)
}

/// Decodes a buffer produced by [`encode_segment`].
pub(super) fn decode_segment(bytes: &[u8], width: usize) -> Result<Vec<Batch>> {
    let encoded: Vec<EncodedBatch> = bincode::deserialize_from(DeflateDecoder::new(bytes))?;
    encoded
        .into_iter()
        .map(|e| {
            let packed = match e.values {
                Values::Raw(v) => v,
                Values::Uint8(v) => v.into_iter().map(f32::from).collect(),
            };
            Ok(Batch::new(e.present, packed, width)?)
        })
        .collect()
}
