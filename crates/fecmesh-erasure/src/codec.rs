//! RS(k, m) + LRC encode/decode, per §4.1.
//!
//! Encoding produces `k` data shards, `m` Reed-Solomon parity shards
//! (via `reed-solomon-simd`), and one XOR local-recovery shard per
//! contiguous group of data shards. Decoding prefers the cheap LRC
//! repair path over full RS reconstruction whenever a group has
//! exactly one shard missing, per the tie-break in §4.1.

use std::collections::HashMap;

use fecmesh_common::config::ErasureConfig;
use fecmesh_common::LocalGroup;
use reed_solomon_simd::{ReedSolomonDecoder, ReedSolomonEncoder};
use thiserror::Error;

use crate::groups::build_local_groups;

/// Errors specific to encode/decode operations.
#[derive(Debug, Error)]
pub enum ErasureError {
    #[error("invalid erasure configuration: {0}")]
    InvalidConfig(String),
    #[error("encoding failed: {0}")]
    EncodingFailed(String),
    #[error("decoding failed: {0}")]
    DecodingFailed(String),
    #[error("insufficient shards: have {available}, need {required}, missing {missing:?}")]
    InsufficientShards {
        available: usize,
        required: usize,
        missing: Vec<u16>,
    },
    #[error("shard size mismatch: expected {expected}, got {actual}")]
    ShardSizeMismatch { expected: usize, actual: usize },
}

impl From<ErasureError> for fecmesh_common::Error {
    fn from(err: ErasureError) -> Self {
        match err {
            ErasureError::InsufficientShards { available, required, missing } => {
                fecmesh_common::Error::InsufficientShards {
                    available,
                    required,
                    missing,
                }
            }
            ErasureError::EncodingFailed(msg) => fecmesh_common::Error::Encoding(msg),
            ErasureError::DecodingFailed(msg) => fecmesh_common::Error::Decoding(msg),
            other => fecmesh_common::Error::Decoding(other.to_string()),
        }
    }
}

/// The output of an encode pass: shards in `[data..][parity..][lrc..]`
/// order, plus the metadata a manifest needs to reconstruct later.
#[derive(Clone, Debug)]
pub struct EncodedShards {
    /// `k` data shards, then `m` parity shards, then one LRC shard per
    /// local group, all padded to `shard_size` bytes.
    pub shards: Vec<Vec<u8>>,
    pub local_groups: Vec<LocalGroup>,
    pub shard_size: usize,
    pub original_len: usize,
}

impl EncodedShards {
    /// Total shard count: `k + m + G`.
    #[must_use]
    pub fn total_shards(&self) -> usize {
        self.shards.len()
    }
}

/// Input to `ErasureCodec::decode`: whatever shards are currently
/// available, indexed by their position in `[0, k+m+G)`.
#[derive(Clone, Debug, Default)]
pub struct DecodeInput {
    pub shards: HashMap<u16, Vec<u8>>,
}

impl DecodeInput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: u16, shard: Vec<u8>) {
        self.shards.insert(index, shard);
    }
}

/// A configured RS(k, m) + LRC codec instance.
#[derive(Clone, Debug)]
pub struct ErasureCodec {
    k: u16,
    m: u16,
    local_groups: Vec<LocalGroup>,
}

impl ErasureCodec {
    /// Build a codec for the given configuration, precomputing the
    /// local-group partition.
    pub fn new(config: ErasureConfig) -> Result<Self, ErasureError> {
        if config.data_shards == 0 {
            return Err(ErasureError::InvalidConfig(
                "data_shards must be at least 1".to_string(),
            ));
        }
        if (config.data_shards as u32 + config.parity_shards as u32) > 255 {
            return Err(ErasureError::InvalidConfig(
                "data_shards + parity_shards must fit in GF(2^8) (<= 255)".to_string(),
            ));
        }
        let local_groups =
            build_local_groups(config.data_shards, config.parity_shards, config.lrc_group_size);
        Ok(Self {
            k: config.data_shards,
            m: config.parity_shards,
            local_groups,
        })
    }

    #[must_use]
    pub fn k(&self) -> u16 {
        self.k
    }

    #[must_use]
    pub fn m(&self) -> u16 {
        self.m
    }

    #[must_use]
    pub fn local_groups(&self) -> &[LocalGroup] {
        &self.local_groups
    }

    /// Encode `data` into `k` data shards, `m` RS parity shards, and
    /// one XOR local-recovery shard per group.
    pub fn encode(&self, data: &[u8]) -> Result<EncodedShards, ErasureError> {
        let original_len = data.len();
        let shard_size = data.len().div_ceil(self.k as usize).max(1);
        // reed-solomon-simd requires shard_size to be a multiple of 2.
        let shard_size = shard_size + (shard_size % 2);

        let mut data_shards: Vec<Vec<u8>> = Vec::with_capacity(self.k as usize);
        for i in 0..self.k as usize {
            let start = i * shard_size;
            let mut shard = vec![0u8; shard_size];
            if start < data.len() {
                let end = (start + shard_size).min(data.len());
                shard[..end - start].copy_from_slice(&data[start..end]);
            }
            data_shards.push(shard);
        }

        let parity_shards = if self.m > 0 {
            let mut encoder =
                ReedSolomonEncoder::new(self.k as usize, self.m as usize, shard_size)
                    .map_err(|e| ErasureError::EncodingFailed(e.to_string()))?;
            for shard in &data_shards {
                encoder
                    .add_original_shard(shard)
                    .map_err(|e| ErasureError::EncodingFailed(e.to_string()))?;
            }
            let result = encoder
                .encode()
                .map_err(|e| ErasureError::EncodingFailed(e.to_string()))?;
            result
                .recovery_iter()
                .map(|shard| shard.to_vec())
                .collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        let lrc_shards: Vec<Vec<u8>> = self
            .local_groups
            .iter()
            .map(|group| xor_group(&data_shards, group, shard_size))
            .collect();

        let mut shards = Vec::with_capacity(data_shards.len() + parity_shards.len() + lrc_shards.len());
        shards.extend(data_shards);
        shards.extend(parity_shards);
        shards.extend(lrc_shards);

        Ok(EncodedShards {
            shards,
            local_groups: self.local_groups.clone(),
            shard_size,
            original_len,
        })
    }

    /// Reconstruct the original data from a (possibly partial) set of
    /// shards, per §4.1's LRC-then-RS policy:
    ///
    /// 1. For each local group missing exactly one data shard, recover
    ///    it by XOR-ing the present group members against the group's
    ///    LRC shard. Repeat until no group makes further progress.
    /// 2. If data shards are still missing, fall back to full RS
    ///    decode using whatever data/parity shards remain.
    /// 3. Concatenate data shards `0..k` and truncate to `original_len`.
    pub fn decode(
        &self,
        input: &DecodeInput,
        shard_size: usize,
        original_len: usize,
    ) -> Result<Vec<u8>, ErasureError> {
        let mut data: HashMap<u16, Vec<u8>> = HashMap::new();
        let mut parity: HashMap<u16, Vec<u8>> = HashMap::new();
        let lrc_base = self.k + self.m;

        for (&index, shard) in &input.shards {
            if shard.len() != shard_size {
                return Err(ErasureError::ShardSizeMismatch {
                    expected: shard_size,
                    actual: shard.len(),
                });
            }
            if index < self.k {
                data.insert(index, shard.clone());
            } else if index < lrc_base {
                parity.insert(index, shard.clone());
            }
        }

        self.recover_via_lrc(input, &mut data, shard_size);

        if (data.len() as u16) < self.k {
            let recovered = self.recover_via_rs(&data, &parity, shard_size)?;
            for (index, shard) in recovered {
                data.entry(index).or_insert(shard);
            }
        }

        if (data.len() as u16) < self.k {
            return Err(ErasureError::InsufficientShards {
                available: data.len() + parity.len(),
                required: self.k as usize,
                missing: (0..self.k).filter(|i| !data.contains_key(i)).collect(),
            });
        }

        let mut out = Vec::with_capacity(self.k as usize * shard_size);
        for i in 0..self.k {
            let shard = data.get(&i).ok_or_else(|| {
                ErasureError::DecodingFailed(format!("data shard {i} missing after recovery"))
            })?;
            out.extend_from_slice(shard);
        }
        out.truncate(original_len);
        Ok(out)
    }

    /// Attempt to fill in missing data shards using each group's LRC
    /// shard, looping while any group makes progress (a recovered
    /// shard in one group never unblocks another, since groups
    /// partition disjoint index ranges, but the loop stays generic).
    fn recover_via_lrc(
        &self,
        input: &DecodeInput,
        data: &mut HashMap<u16, Vec<u8>>,
        shard_size: usize,
    ) {
        let mut progress = true;
        while progress {
            progress = false;
            for group in &self.local_groups {
                let missing: Vec<u16> = group
                    .shard_indices
                    .iter()
                    .copied()
                    .filter(|idx| !data.contains_key(idx))
                    .collect();
                if missing.len() != 1 {
                    continue;
                }
                let Some(lrc_shard) = input.shards.get(&group.local_recovery_index) else {
                    continue;
                };
                let mut recovered = lrc_shard.clone();
                let mut complete = true;
                for &idx in &group.shard_indices {
                    if idx == missing[0] {
                        continue;
                    }
                    if let Some(present) = data.get(&idx) {
                        xor_into(&mut recovered, present);
                    } else {
                        complete = false;
                        break;
                    }
                }
                if complete && recovered.len() == shard_size {
                    data.insert(missing[0], recovered);
                    progress = true;
                }
            }
        }
    }

    fn recover_via_rs(
        &self,
        data: &HashMap<u16, Vec<u8>>,
        parity: &HashMap<u16, Vec<u8>>,
        shard_size: usize,
    ) -> Result<Vec<(u16, Vec<u8>)>, ErasureError> {
        if self.m == 0 {
            return Err(ErasureError::InsufficientShards {
                available: data.len(),
                required: self.k as usize,
                missing: (0..self.k + self.m).filter(|i| !data.contains_key(i) && !parity.contains_key(i)).collect(),
            });
        }
        let available = data.len() + parity.len();
        if available < self.k as usize {
            return Err(ErasureError::InsufficientShards {
                available,
                required: self.k as usize,
                missing: (0..self.k + self.m).filter(|i| !data.contains_key(i) && !parity.contains_key(i)).collect(),
            });
        }

        let mut decoder = ReedSolomonDecoder::new(self.k as usize, self.m as usize, shard_size)
            .map_err(|e| ErasureError::DecodingFailed(e.to_string()))?;
        for (&index, shard) in data {
            decoder
                .add_original_shard(index as usize, shard)
                .map_err(|e| ErasureError::DecodingFailed(e.to_string()))?;
        }
        for (&index, shard) in parity {
            decoder
                .add_recovery_shard((index - self.k) as usize, shard)
                .map_err(|e| ErasureError::DecodingFailed(e.to_string()))?;
        }
        let result = decoder
            .decode()
            .map_err(|e| ErasureError::DecodingFailed(e.to_string()))?;
        Ok(result
            .restored_original_iter()
            .map(|(index, shard)| (index as u16, shard.to_vec()))
            .collect())
    }
}

fn xor_group(data_shards: &[Vec<u8>], group: &LocalGroup, shard_size: usize) -> Vec<u8> {
    let mut out = vec![0u8; shard_size];
    for &idx in &group.shard_indices {
        xor_into(&mut out, &data_shards[idx as usize]);
    }
    out
}

fn xor_into(dest: &mut [u8], src: &[u8]) {
    for (d, s) in dest.iter_mut().zip(src.iter()) {
        *d ^= s;
    }
}
