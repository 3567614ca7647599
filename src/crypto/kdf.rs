//! Key transform (C8): derive the AES key used to decrypt/encrypt the
//! kdbx payload from the composite credential hash, the header's master
//! and transform seeds, and the round count.

use super::block_cipher::ecb_grind;
use super::credential::ComposedKey;
use crate::util::sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AES-256 key used to decrypt/encrypt the payload body.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct CipherKey(pub(crate) [u8; 32]);

/// Derive the payload cipher key from a composed credential hash.
///
/// `rounds` is carried as a plain `u64`: unlike narrow-integer hosts,
/// Rust's native 64-bit integer already holds the full range the
/// header's 8-byte round count field can express, so there is no need
/// to decompose it into 16-bit limbs the way the reference
/// implementation does on platforms without a native 64-bit type. The
/// loop below and a limb-wise decomposition are required by spec to
/// produce bit-identical output; a straight `for _ in 0..rounds` loop
/// trivially satisfies that since it performs the exact same sequence
/// of AES-ECB encryptions.
pub(crate) fn derive_cipher_key(
    composed: &ComposedKey,
    master_seed: &[u8; 32],
    transform_seed: &[u8; 32],
    rounds: u64,
) -> CipherKey {
    let mut t = composed.0;
    ecb_grind(transform_seed, &mut t, rounds);

    let final_key = sha256(&t);

    let mut to_hash = Vec::with_capacity(64);
    to_hash.extend_from_slice(master_seed);
    to_hash.extend_from_slice(&final_key);

    let mut key = [0u8; 32];
    key.copy_from_slice(&sha256(&to_hash));
    CipherKey(key)
}
