//! Persisted key layout.
//!
//! Envelopes live under `log/` followed by the sequence as 20 zero-padded
//! decimal digits, so byte order of keys equals numeric order of sequences.
//! The last allocated sequence sits under `meta/`, outside any log scan.
//! The pending index is a separate table keyed by the raw `u64`.

use super::error::{StoreError, StoreResult};

pub const LOG_PREFIX: &str = "log/";
/// First key after every `log/` key (`'0'` sorts after `'/'`).
pub const LOG_END: &str = "log0";
pub const LAST_SEQ_KEY: &str = "meta/last_seq";

const SEQ_WIDTH: usize = 20;

pub fn log_key(seq: u64) -> String {
    format!("{}{:0width$}", LOG_PREFIX, seq, width = SEQ_WIDTH)
}

pub fn seq_from_log_key(key: &str) -> StoreResult<u64> {
    key.strip_prefix(LOG_PREFIX)
        .filter(|digits| digits.len() == SEQ_WIDTH)
        .and_then(|digits| digits.parse().ok())
        .ok_or_else(|| StoreError::Corrupt(format!("malformed log key {:?}", key)))
}

pub fn encode_seq(seq: u64) -> [u8; 8] {
    seq.to_be_bytes()
}

pub fn decode_seq(bytes: &[u8]) -> StoreResult<u64> {
    let raw: [u8; 8] = bytes.try_into().map_err(|_| {
        StoreError::Corrupt(format!("last sequence marker has {} bytes", bytes.len()))
    })?;
    Ok(u64::from_be_bytes(raw))
}
