//! Block-level delta computation.
//!
//! rsync-style pipeline: the reference side is summarized as a `Signature`
//! (per-block rolling checksum + MD5), the source is scanned with an O(1)
//! sliding rolling checksum against that signature, and the result is a
//! list of `DeltaOp`s that rebuild the source from reference blocks plus
//! literal bytes. When matched blocks cover too little of the source the
//! caller should abandon the delta and send the file whole.

use std::collections::HashMap;

use crate::errors::{CopyError, Result};

const ADLER_MOD: u32 = 65521;

const MIN_BLOCK: usize = 2 * 1024;
const MAX_BLOCK: usize = 128 * 1024;

/// Matched blocks must cover at least this fraction of the source bytes
/// for a delta to be worth transmitting.
pub(crate) const MIN_MATCH_COVERAGE: f64 = 0.25;

/// Adler-style checksum of a whole window.
pub(crate) fn rolling_checksum(data: &[u8]) -> u32 {
    let mut a: u32 = 0;
    let mut b: u32 = 0;
    for &byte in data {
        a = (a + u32::from(byte)) % ADLER_MOD;
        b = (b + a) % ADLER_MOD;
    }
    (b << 16) | a
}

/// Slide the window one byte: drop `out`, add `in_`. `len` is the window
/// length, unchanged by the slide.
pub(crate) fn rolling_update(sum: u32, out: u8, in_: u8, len: usize) -> u32 {
    let a = sum & 0xFFFF;
    let b = sum >> 16;
    let len = (len as u32) % ADLER_MOD;
    let out = u32::from(out);
    let in_ = u32::from(in_);
    // +ADLER_MOD multiples keep the subtractions non-negative in u32.
    let a2 = (a + ADLER_MOD + in_ - out) % ADLER_MOD;
    let b2 = (b + a2 + ADLER_MOD - (len * out) % ADLER_MOD) % ADLER_MOD;
    (b2 << 16) | a2
}

fn strong_checksum(data: &[u8]) -> [u8; 16] {
    md5::compute(data).0
}

/// Block size for a file: the largest power of two at most √len, clamped.
pub(crate) fn block_size_for_len(len: u64) -> usize {
    let root = (len as f64).sqrt() as u64;
    let pow2 = if root < 2 {
        MIN_BLOCK as u64
    } else {
        1u64 << (63 - root.leading_zeros())
    };
    (pow2 as usize).clamp(MIN_BLOCK, MAX_BLOCK)
}

/// Summary of one reference block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockSum {
    pub rolling: u32,
    pub strong: [u8; 16],
}

/// Reference-side summary a delta is computed against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub(crate) block_size: usize,
    pub(crate) blocks: Vec<BlockSum>,
}

impl Signature {
    pub(crate) fn block_size(&self) -> usize {
        self.block_size
    }
}

/// Summarize `reference` into per-block checksums.
pub(crate) fn compute_signature(reference: &[u8], block_size: usize) -> Signature {
    let blocks = reference
        .chunks(block_size)
        .map(|chunk| BlockSum {
            rolling: rolling_checksum(chunk),
            strong: strong_checksum(chunk),
        })
        .collect();
    Signature {
        block_size,
        blocks,
    }
}

/// One reconstruction step. `Copy` spans `block_count` consecutive
/// reference blocks starting at `block_index`; `Literal` carries raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DeltaOp {
    Copy { block_index: u64, block_count: u64 },
    Literal(Vec<u8>),
}

/// A computed delta plus the fraction of source bytes covered by matches.
#[derive(Debug, Clone)]
pub(crate) struct Delta {
    pub ops: Vec<DeltaOp>,
    pub matched_bytes: u64,
    pub source_len: u64,
}

impl Delta {
    /// True when enough of the source was matched for the delta to pay off.
    pub(crate) fn is_worthwhile(&self) -> bool {
        if self.source_len == 0 {
            return true;
        }
        (self.matched_bytes as f64) / (self.source_len as f64) >= MIN_MATCH_COVERAGE
    }
}

/// Scan `source` against `signature`, emitting copy ops for matched
/// reference blocks and literals for everything else.
pub(crate) fn compute_delta(source: &[u8], signature: &Signature) -> Delta {
    let block_size = signature.block_size;
    let mut ops: Vec<DeltaOp> = Vec::new();
    let mut matched_bytes: u64 = 0;

    if block_size == 0 || signature.blocks.is_empty() || source.len() < block_size {
        if !source.is_empty() {
            ops.push(DeltaOp::Literal(source.to_vec()));
        }
        return Delta {
            ops,
            matched_bytes: 0,
            source_len: source.len() as u64,
        };
    }

    // rolling -> candidate block indices (collisions resolved by MD5).
    let mut index: HashMap<u32, Vec<usize>> = HashMap::new();
    for (i, block) in signature.blocks.iter().enumerate() {
        index.entry(block.rolling).or_default().push(i);
    }

    let mut literal_start = 0usize;
    let mut pos = 0usize;
    let mut sum = rolling_checksum(&source[..block_size]);

    while pos + block_size <= source.len() {
        let window = &source[pos..pos + block_size];
        // A short tail block in the reference can never MD5-match a
        // full-size window, so copy ops always span whole blocks.
        let matched = index.get(&sum).and_then(|candidates| {
            let strong = strong_checksum(window);
            candidates
                .iter()
                .copied()
                .find(|&i| signature.blocks[i].strong == strong)
        });

        if let Some(block_index) = matched {
            if literal_start < pos {
                ops.push(DeltaOp::Literal(source[literal_start..pos].to_vec()));
            }
            push_copy(&mut ops, block_index as u64);
            matched_bytes += block_size as u64;
            pos += block_size;
            literal_start = pos;
            if pos + block_size <= source.len() {
                sum = rolling_checksum(&source[pos..pos + block_size]);
            }
        } else {
            let out = source[pos];
            pos += 1;
            if pos + block_size <= source.len() {
                sum = rolling_update(sum, out, source[pos + block_size - 1], block_size);
            }
        }
    }

    if literal_start < source.len() {
        ops.push(DeltaOp::Literal(source[literal_start..].to_vec()));
    }

    Delta {
        ops,
        matched_bytes,
        source_len: source.len() as u64,
    }
}

fn push_copy(ops: &mut Vec<DeltaOp>, block_index: u64) {
    if let Some(DeltaOp::Copy {
        block_index: start,
        block_count,
    }) = ops.last_mut()
    {
        if *start + *block_count == block_index {
            *block_count += 1;
            return;
        }
    }
    ops.push(DeltaOp::Copy {
        block_index,
        block_count: 1,
    });
}

/// Rebuild the source bytes from `reference` and delta ops.
pub(crate) fn apply_delta(reference: &[u8], block_size: usize, ops: &[DeltaOp]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for op in ops {
        match op {
            DeltaOp::Copy {
                block_index,
                block_count,
            } => {
                let start = (*block_index as usize)
                    .checked_mul(block_size)
                    .ok_or_else(|| CopyError::DeltaCopy("copy op offset overflow".into()))?;
                let len = (*block_count as usize)
                    .checked_mul(block_size)
                    .ok_or_else(|| CopyError::DeltaCopy("copy op length overflow".into()))?;
                let end = start
                    .checked_add(len)
                    .filter(|&e| e <= reference.len())
                    .ok_or_else(|| {
                        CopyError::DeltaCopy(format!(
                            "copy op outside reference: blocks {block_index}+{block_count}"
                        ))
                    })?;
                out.extend_from_slice(&reference[start..end]);
            }
            DeltaOp::Literal(bytes) => out.extend_from_slice(bytes),
        }
    }
    Ok(out)
}
