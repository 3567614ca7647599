//! kdbx container orchestration (C9): ties the header (C7), key
//! transform (C8), block cipher (C1), hashed block stream (C3), and
//! gzip (C4) together into whole-file decrypt/encrypt.

use super::header::{Compression, KdbxHeader, StreamCipher};
use crate::compress::{compress_gzip, decompress_gzip};
use crate::crypto::{decrypt_cbc, derive_cipher_key, encrypt_cbc, CompositeCredential};
use crate::errors::{Error, Result};
use crate::stream::hashed_block;
use std::io::Read;

/// Payload recovered from a successful decrypt, plus the pieces of
/// header state a caller needs to decrypt per-field protected values.
pub(crate) struct DecryptedPayload {
    pub(crate) payload: Vec<u8>,
    pub(crate) header_hash: Vec<u8>,
    pub(crate) protected_stream_key: Vec<u8>,
    pub(crate) stream_cipher: StreamCipher,
    /// Set when the hashed block stream was decoded in
    /// [`hashed_block::Mode::Permissive`] and at least one block failed
    /// its index/hash check. Always `false` when decoded in strict
    /// mode, since a strict-mode failure aborts the decrypt instead.
    pub(crate) corrupted: bool,
}

/// Parse, authenticate, and decrypt a kdbx v3 file in strict mode: a
/// hashed block index/hash mismatch aborts the decrypt with
/// [`Error::IntegrityFailure`].
pub(crate) fn decrypt(bytes: &[u8], credential: &CompositeCredential) -> Result<DecryptedPayload> {
    decrypt_with_mode(bytes, credential, hashed_block::Mode::Strict)
}

/// Parse, authenticate, and decrypt a kdbx v3 file in permissive mode:
/// a hashed block index/hash mismatch is recorded in
/// [`DecryptedPayload::corrupted`] and decoding continues past it. For
/// diagnostics only - never the default a caller should reach for.
pub(crate) fn decrypt_permissive(
    bytes: &[u8],
    credential: &CompositeCredential,
) -> Result<DecryptedPayload> {
    decrypt_with_mode(bytes, credential, hashed_block::Mode::Permissive)
}

fn decrypt_with_mode(
    bytes: &[u8],
    credential: &CompositeCredential,
    mode: hashed_block::Mode,
) -> Result<DecryptedPayload> {
    let mut cursor = std::io::Cursor::new(bytes);
    let header = KdbxHeader::parse(&mut cursor)?;

    let mut encrypted = Vec::new();
    cursor.read_to_end(&mut encrypted)?;

    let cipher_key = derive_cipher_key(
        &credential.hash(),
        &header.master_seed,
        &header.transform_seed,
        header.rounds,
    );
    let plaintext = decrypt_cbc(&cipher_key.0, &header.encryption_iv, &encrypted)?;

    if plaintext.len() < 32 || plaintext[..32] != header.stream_start_bytes[..] {
        return Err(Error::BadCredential);
    }

    let decoded = hashed_block::decode_with_mode(&plaintext[32..], mode)?;

    let payload = match header.compression {
        Compression::None => decoded.payload,
        Compression::Gzip => decompress_gzip(&decoded.payload)?,
    };

    Ok(DecryptedPayload {
        payload,
        header_hash: header.digest(),
        protected_stream_key: header.protected_stream_key,
        stream_cipher: header.stream_cipher,
        corrupted: decoded.corrupted,
    })
}

/// Build a fresh header for encryption: random seeds, IV, protected
/// stream key and start-bytes canary from the OS secure RNG via
/// `getrandom`. A failure there is [`Error::PrepareFailure`], never a
/// silently weaker fallback.
pub(crate) fn build_header(rounds: u64) -> Result<KdbxHeader> {
    let master_seed = random_32()?;
    let transform_seed = random_32()?;
    let mut encryption_iv = [0u8; 16];
    getrandom::getrandom(&mut encryption_iv)
        .map_err(|e| Error::PrepareFailure(e.to_string()))?;
    let protected_stream_key = random_32()?;
    let stream_start_bytes = random_32()?;

    Ok(KdbxHeader::build_for_encrypt(
        master_seed,
        transform_seed,
        encryption_iv,
        protected_stream_key,
        stream_start_bytes,
        rounds,
    ))
}

/// Encrypt `plaintext` under an already-built `header`: derive the
/// cipher key from `credential` and the header's seeds/rounds, frame
/// the payload as a hashed block stream behind the start-bytes canary,
/// then AES-CBC encrypt and prepend the header bytes.
pub(crate) fn encrypt_with_header(
    plaintext: &[u8],
    credential: &CompositeCredential,
    header: &KdbxHeader,
) -> Result<Vec<u8>> {
    let cipher_key = derive_cipher_key(
        &credential.hash(),
        &header.master_seed,
        &header.transform_seed,
        header.rounds,
    );

    let framed = hashed_block::encode(plaintext, hashed_block::DEFAULT_BLOCK_SIZE);
    let mut to_encrypt = Vec::with_capacity(32 + framed.len());
    to_encrypt.extend_from_slice(&header.stream_start_bytes);
    to_encrypt.extend_from_slice(&framed);
    let ciphertext = encrypt_cbc(&cipher_key.0, &header.encryption_iv, &to_encrypt);

    let mut out = Vec::with_capacity(header.raw.len() + ciphertext.len());
    header.write(&mut out)?;
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Encrypt `plaintext` into a fresh kdbx v3 file: no compression, no
/// per-field stream, AES256 cipher, the given round count.
pub(crate) fn encrypt(
    plaintext: &[u8],
    credential: &CompositeCredential,
    rounds: u64,
) -> Result<Vec<u8>> {
    let header = build_header(rounds)?;
    encrypt_with_header(plaintext, credential, &header)
}

fn random_32() -> Result<[u8; 32]> {
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).map_err(|e| Error::PrepareFailure(e.to_string()))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_plaintext() {
        let credential = CompositeCredential::from_password("abcdefg");
        let encrypted = encrypt(b"hello", &credential, 16).unwrap();
        let decrypted = decrypt(&encrypted, &credential).unwrap();
        assert_eq!(decrypted.payload, b"hello");
    }

    #[test]
    fn wrong_credential_fails_with_bad_credential() {
        let right = CompositeCredential::from_password("abcdefg");
        let wrong = CompositeCredential::from_password("abcdefh");
        let encrypted = encrypt(b"hello", &right, 16).unwrap();
        assert!(matches!(decrypt(&encrypted, &wrong), Err(Error::BadCredential)));
    }

    #[test]
    fn header_hash_is_consistent_between_encrypt_and_decrypt() {
        let credential = CompositeCredential::from_password("abcdefg");
        let encrypted = encrypt(b"some plaintext", &credential, 4).unwrap();
        let decrypted = decrypt(&encrypted, &credential).unwrap();
        let mut cursor = std::io::Cursor::new(&encrypted);
        let header = KdbxHeader::parse(&mut cursor).unwrap();
        assert_eq!(decrypted.header_hash, header.digest());
    }

    #[test]
    fn tampered_block_is_rejected() {
        let credential = CompositeCredential::from_password("abcdefg");
        let mut encrypted = encrypt(b"a reasonably long plaintext payload", &credential, 4).unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0x01;
        assert!(decrypt(&encrypted, &credential).is_err());
    }

    #[test]
    fn permissive_mode_recovers_from_a_corrupted_block_instead_of_failing() {
        let credential = CompositeCredential::from_password("abcdefg");
        let plaintext = vec![b'x'; 300];
        let encrypted = encrypt(&plaintext, &credential, 4).unwrap();

        let header_len = {
            let mut cursor = std::io::Cursor::new(&encrypted);
            KdbxHeader::parse(&mut cursor).unwrap().raw.len()
        };
        // Flip a byte just past the start-bytes canary, inside the
        // hashed block stream itself and clear of the final CBC block,
        // so PKCS#7 unpadding still succeeds and only the hashed-block
        // stage notices the tamper.
        let mut tampered = encrypted.clone();
        let offset = header_len + 32;
        tampered[offset] ^= 0x01;

        assert!(matches!(
            decrypt(&tampered, &credential),
            Err(Error::IntegrityFailure(_))
        ));

        let permissive = decrypt_permissive(&tampered, &credential).unwrap();
        assert!(permissive.corrupted);
    }
}
