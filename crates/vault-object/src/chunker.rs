//! Content-defined chunking with a gear rolling hash.
//!
//! Boundaries depend only on the bytes near them, so an insertion early in a
//! file shifts at most a couple of chunks and every later chunk keeps its id.

use serde::{Deserialize, Serialize};

use crate::error::{ObjectError, ObjectResult};

/// Chunk size bounds, in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkConfig {
    pub min_size: usize,
    /// Expected chunk size. Must be a power of two.
    pub avg_size: usize,
    pub max_size: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            min_size: 2 * 1024,
            avg_size: 8 * 1024,
            max_size: 64 * 1024,
        }
    }
}

impl ChunkConfig {
    pub fn validate(&self) -> ObjectResult<()> {
        if self.min_size == 0 {
            return Err(ObjectError::InvalidConfig("min_size must be positive".into()));
        }
        if !self.avg_size.is_power_of_two() {
            return Err(ObjectError::InvalidConfig(format!(
                "avg_size {} is not a power of two",
                self.avg_size
            )));
        }
        if !(self.min_size <= self.avg_size && self.avg_size <= self.max_size) {
            return Err(ObjectError::InvalidConfig(format!(
                "expected min <= avg <= max, got {} / {} / {}",
                self.min_size, self.avg_size, self.max_size
            )));
        }
        Ok(())
    }

    /// Boundary mask: log2(avg) bits taken from the top of the hash, where
    /// the gear hash has mixed in the most input.
    fn mask(&self) -> u64 {
        let bits = self.avg_size.trailing_zeros();
        if bits == 0 {
            0
        } else {
            (u64::MAX >> (64 - bits)) << (64 - bits)
        }
    }
}

const GEAR: [u64; 256] = gear_table();

/// Deterministic per-byte gear values from a splitmix64 sequence.
const fn gear_table() -> [u64; 256] {
    let mut table = [0u64; 256];
    let mut state: u64 = 0x5641_554c_545f_4344;
    let mut i = 0;
    while i < 256 {
        state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        table[i] = z ^ (z >> 31);
        i += 1;
    }
    table
}

/// Iterator over the content-defined chunks of a byte slice.
#[derive(Clone, Debug)]
pub struct Chunker<'a> {
    data: &'a [u8],
    config: ChunkConfig,
    mask: u64,
}

impl<'a> Chunker<'a> {
    pub fn new(data: &'a [u8], config: ChunkConfig) -> ObjectResult<Self> {
        config.validate()?;
        Ok(Self {
            data,
            mask: config.mask(),
            config,
        })
    }

    fn boundary(&self) -> usize {
        let len = self.data.len();
        if len <= self.config.min_size {
            return len;
        }
        let end = len.min(self.config.max_size);
        let mut hash: u64 = 0;
        for (i, &byte) in self.data[..end].iter().enumerate().skip(self.config.min_size) {
            hash = (hash << 1).wrapping_add(GEAR[byte as usize]);
            if hash & self.mask == 0 {
                return i + 1;
            }
        }
        end
    }
}

impl<'a> Iterator for Chunker<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.data.is_empty() {
            return None;
        }
        let cut = self.boundary();
        let (chunk, rest) = self.data.split_at(cut);
        self.data = rest;
        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn small() -> ChunkConfig {
        ChunkConfig {
            min_size: 64,
            avg_size: 256,
            max_size: 1024,
        }
    }

    fn noise(len: usize, seed: u64) -> Vec<u8> {
        let mut x = seed | 1;
        (0..len)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 7;
                x ^= x << 17;
                (x >> 24) as u8
            })
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        ChunkConfig::default().validate().unwrap();
    }

    #[test]
    fn bad_configs_are_rejected() {
        let not_pow2 = ChunkConfig {
            avg_size: 3000,
            ..ChunkConfig::default()
        };
        assert!(not_pow2.validate().is_err());
        let inverted = ChunkConfig {
            min_size: 16 * 1024,
            ..ChunkConfig::default()
        };
        assert!(inverted.validate().is_err());
        let zero = ChunkConfig {
            min_size: 0,
            ..ChunkConfig::default()
        };
        assert!(Chunker::new(b"", zero).is_err());
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert_eq!(Chunker::new(b"", small()).unwrap().count(), 0);
    }

    #[test]
    fn gear_table_entries_are_distinct() {
        let distinct: HashSet<u64> = GEAR.iter().copied().collect();
        assert_eq!(distinct.len(), 256);
    }

    #[test]
    fn prefix_insert_keeps_later_chunks() {
        let data = noise(64 * 1024, 7);
        let mut edited = b"inserted prefix".to_vec();
        edited.extend_from_slice(&data);

        let before: HashSet<&[u8]> = Chunker::new(&data, small()).unwrap().collect();
        let after: Vec<&[u8]> = Chunker::new(&edited, small()).unwrap().collect();
        let shared = after.iter().filter(|c| before.contains(*c)).count();
        assert!(
            shared * 10 >= after.len() * 8,
            "only {shared} of {} chunks survived",
            after.len()
        );
    }

    proptest! {
        #[test]
        fn chunks_reassemble_within_bounds(data in proptest::collection::vec(any::<u8>(), 0..8192)) {
            let config = small();
            let chunks: Vec<&[u8]> = Chunker::new(&data, config).unwrap().collect();
            prop_assert_eq!(chunks.concat(), data.clone());
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert!(chunk.len() <= config.max_size);
                if i + 1 < chunks.len() {
                    prop_assert!(chunk.len() >= config.min_size);
                }
            }
        }

        #[test]
        fn chunking_is_deterministic(seed in any::<u64>()) {
            let data = noise(4096, seed);
            let a: Vec<&[u8]> = Chunker::new(&data, small()).unwrap().collect();
            let b: Vec<&[u8]> = Chunker::new(&data, small()).unwrap().collect();
            prop_assert_eq!(a, b);
        }
    }
}
