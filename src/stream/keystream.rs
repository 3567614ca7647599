//! Protected-value keystream (C2): a Salsa20 stream keyed off the
//! header's inner random stream key, used to decrypt `Protected="True"`
//! XML field values in document order.

use cipher::{KeyIvInit, StreamCipher as _};
use salsa20::Salsa20;
use sha2::{Digest, Sha256};

/// Fixed IV KeePass uses for the inner Salsa20 protected-value stream.
/// Not a secret: it is constant across every kdbx3 file ever written.
const SALSA20_IV: [u8; 8] = [0xe8, 0x30, 0x09, 0x4b, 0x97, 0x20, 0x5d, 0x2a];

/// Keystream over `Protected="True"` field values.
///
/// Each call to [`Keystream::apply`] consumes the next `data.len()`
/// bytes of keystream, so fields must be decrypted in the same order
/// they appear in the document - this type has no way to seek.
pub(crate) struct Keystream {
    cipher: Salsa20,
}

impl Keystream {
    /// Build a keystream from the header's raw protected-stream key.
    /// The key is hashed with SHA-256 first to produce the 32-byte
    /// Salsa20 key.
    pub(crate) fn new(protected_stream_key: &[u8]) -> Keystream {
        let key = Sha256::digest(protected_stream_key);
        let cipher = Salsa20::new_from_slices(&key, &SALSA20_IV)
            .expect("sha256 output is always a valid salsa20 key length");
        Keystream { cipher }
    }

    /// XOR the next `data.len()` bytes of keystream over `data` in place.
    pub(crate) fn apply(&mut self, data: &mut [u8]) {
        self.cipher.apply_keystream(data);
    }

    /// Consume and return the next `n` bytes of keystream, without
    /// applying them to anything. Used to capture the exact slice a
    /// protected XML node consumed, for later XOR against its
    /// ciphertext.
    pub(crate) fn next_bytes(&mut self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        self.apply(&mut buf);
        buf
    }

    /// Decrypt a protected value, consuming that much keystream.
    pub(crate) fn decrypt(&mut self, data: &[u8]) -> Vec<u8> {
        let mut buf = data.to_vec();
        self.apply(&mut buf);
        buf
    }
}
