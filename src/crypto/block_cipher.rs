//! AES-256 block primitives: CBC with PKCS#7 padding, and the bare ECB
//! "grind" used by the key transform (C1 in the design doc)

use crate::errors::{Error, Result};
use aes::Aes256;
use cbc::cipher::block_padding::{Padding, Pkcs7};
use cbc::cipher::{generic_array::GenericArray, BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Encrypt `plaintext` with AES-256-CBC, padding it to a block boundary
/// with PKCS#7 first.
pub(crate) fn encrypt_cbc(key: &[u8; 32], iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    let cipher = Aes256CbcEnc::new(key.into(), iv.into());
    cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// Decrypt an AES-256-CBC ciphertext that is PKCS#7 padded.
///
/// Fails with [`Error::BadCredential`] rather than a generic decrypt
/// error: in this crate's only two callers (start-bytes canary check
/// and the cache envelope), a CBC/PKCS#7 failure this far into the
/// pipeline means the derived key was wrong.
pub(crate) fn decrypt_cbc(key: &[u8; 32], iv: &[u8; 16], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(Error::BadCredential);
    }
    let cipher = Aes256CbcDec::new(key.into(), iv.into());
    let mut buf = ciphertext.to_vec();
    let plaintext_len = cipher
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|_| Error::BadCredential)?
        .len();
    buf.truncate(plaintext_len);
    Ok(buf)
}

/// Pad `data` to a 16-byte boundary per PKCS#7 (a full extra block if
/// `data` is already aligned).
#[cfg(test)]
pub(crate) fn pad_pkcs7(data: &[u8]) -> Vec<u8> {
    let mut buf = data.to_vec();
    let pad_len = 16 - (buf.len() % 16);
    buf.resize(buf.len() + pad_len, pad_len as u8);
    buf
}

/// Undo PKCS#7 padding, rejecting a zero or oversized pad length, or a
/// tail whose bytes don't all equal the declared pad length.
#[cfg(test)]
pub(crate) fn unpad_pkcs7(data: &[u8]) -> Result<Vec<u8>> {
    let unpadded =
        Pkcs7::unpad(data).map_err(|_| Error::IntegrityFailure("bad PKCS#7 padding".into()))?;
    Ok(unpadded.to_vec())
}

/// Run the AES-ECB "grind" used by the key transform: encrypt the 32-byte
/// block in place, `n_rounds` times, under `key` with no IV and no
/// padding. The block is logically two 16-byte AES blocks; each round
/// re-encrypts both independently in ECB mode.
pub(crate) fn ecb_grind(key: &[u8; 32], block: &mut [u8; 32], n_rounds: u64) {
    let cipher = Aes256::new(GenericArray::from_slice(key));
    let mut halves = [
        *GenericArray::from_slice(&block[0..16]),
        *GenericArray::from_slice(&block[16..32]),
    ];
    for _ in 0..n_rounds {
        cipher.encrypt_blocks_mut(&mut halves);
    }
    block[0..16].copy_from_slice(&halves[0]);
    block[16..32].copy_from_slice(&halves[1]);
}
