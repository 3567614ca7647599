//! Hashed block stream framing (C3): the kdbx3 payload is split into
//! blocks, each prefixed with a sequence index, a SHA-256 hash of the
//! block's data, and a length, so a single flipped bit anywhere in the
//! ciphertext is caught before it reaches the XML parser. A final
//! zero-length block marks the end of the stream.
//!
//! Framed as whole-buffer encode/decode rather than as `Read`/`Write`
//! adapters: every caller in this crate already holds the full
//! decrypted or to-be-encrypted payload in memory, so there is no
//! streaming reader to preserve here.

use crate::errors::{Error, Result};
use crate::util::{sha256, verify_sha256};

/// Default block size used when framing a freshly written stream.
pub(crate) const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Whether a hash or index mismatch aborts the stream or is skipped.
///
/// Permissive mode exists for diagnostics only; [`decode`] callers in
/// this crate always use [`Mode::Strict`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Strict,
    Permissive,
}

/// Outcome of a permissive-mode decode: the payload recovered so far,
/// plus whether any block failed verification along the way.
pub(crate) struct Decoded {
    pub(crate) payload: Vec<u8>,
    pub(crate) corrupted: bool,
}

/// Split `data` into hashed blocks of up to `block_size` bytes each,
/// followed by the zero-length terminator block.
pub(crate) fn encode(data: &[u8], block_size: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / block_size.max(1) * 40 + 40);
    let mut index = 0u32;
    for chunk in data.chunks(block_size.max(1)) {
        write_block(&mut out, index, chunk);
        index += 1;
    }
    write_block(&mut out, index, &[]);
    out
}

fn write_block(out: &mut Vec<u8>, index: u32, chunk: &[u8]) {
    out.extend_from_slice(&index.to_le_bytes());
    out.extend_from_slice(&sha256(chunk));
    out.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
    out.extend_from_slice(chunk);
}

/// Parse a hashed block stream in strict mode, verifying every block's
/// index and hash, and return the reassembled payload.
///
/// Fails with [`Error::IntegrityFailure`] on a hash mismatch, an
/// out-of-sequence index, or a truncated block.
pub(crate) fn decode(data: &[u8]) -> Result<Vec<u8>> {
    let decoded = decode_with_mode(data, Mode::Strict)?;
    Ok(decoded.payload)
}

/// Parse a hashed block stream, honoring `mode`. In [`Mode::Permissive`]
/// a hash or index mismatch is recorded in [`Decoded::corrupted`] and
/// the block is skipped rather than aborting the stream.
pub(crate) fn decode_with_mode(data: &[u8], mode: Mode) -> Result<Decoded> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    let mut expected_index = 0u32;
    let mut corrupted = false;

    loop {
        let header_len = 4 + 32 + 4;
        if pos + header_len > data.len() {
            return Err(Error::IntegrityFailure(
                "truncated hashed block header".into(),
            ));
        }
        let index = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap());
        let hash = &data[pos + 4..pos + 4 + 32];
        let len = u32::from_le_bytes(data[pos + 36..pos + 40].try_into().unwrap()) as usize;
        pos += header_len;

        if pos + len > data.len() {
            return Err(Error::IntegrityFailure("truncated hashed block body".into()));
        }
        let block = &data[pos..pos + len];
        pos += len;

        if len == 0 {
            if hash.iter().any(|&b| b != 0) || index != expected_index {
                if mode == Mode::Permissive {
                    corrupted = true;
                } else {
                    return Err(Error::IntegrityFailure("bad terminator block".into()));
                }
            }
            return Ok(Decoded {
                payload: out,
                corrupted,
            });
        }

        let valid = index == expected_index && verify_sha256(block, hash);
        if !valid {
            if mode == Mode::Permissive {
                corrupted = true;
            } else {
                return Err(Error::IntegrityFailure(
                    "hashed block failed verification".into(),
                ));
            }
        }
        out.extend_from_slice(block);
        expected_index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_small_payload() {
        let data = b"the quick brown fox jumps over the lazy dog".to_vec();
        let encoded = encode(&data, 16);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn round_trips_empty_payload() {
        let data = Vec::new();
        let encoded = encode(&data, DEFAULT_BLOCK_SIZE);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn detects_flipped_bit() {
        let data = b"some reasonably long payload to chunk up".to_vec();
        let mut encoded = encode(&data, 8);
        let last = encoded.len() - 1;
        encoded[last / 2] ^= 0x01;
        assert!(matches!(decode(&encoded), Err(Error::IntegrityFailure(_))));
    }

    #[test]
    fn detects_truncation() {
        let data = b"another payload".to_vec();
        let encoded = encode(&data, 4);
        let truncated = &encoded[..encoded.len() - 5];
        assert!(matches!(decode(truncated), Err(Error::IntegrityFailure(_))));
    }

    #[test]
    fn permissive_mode_reports_corruption_but_recovers_remaining_blocks() {
        let data = b"one-two-three-four-five-six-seven-eight".to_vec();
        let mut encoded = encode(&data, 8);
        // Corrupt the first block's hash (bytes 4..36) without touching length/payload.
        encoded[4] ^= 0xFF;
        let decoded = decode_with_mode(&encoded, Mode::Permissive).unwrap();
        assert!(decoded.corrupted);
        assert_eq!(decoded.payload.len(), data.len());
    }
}
