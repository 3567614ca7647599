#![warn(missing_docs)]

//! Read-only parser for KeePass 2.x ("kdbx", version 3) password database
//! files, plus a writable cache envelope that persists a sanitized
//! projection of an opened database so later list-style queries don't
//! have to re-pay the database's key derivation cost.
//!
//! The primary entry point is [`open_primary`], which authenticates and
//! decrypts a kdbx v3 file with a password (and optionally a key file)
//! and hands back a [`Database`]:
//!
//! ```
//! # fn main() -> Result<(), kdbx3_cache::Error> {
//! use kdbx3_cache::{cache_password, open_primary};
//!
//! # let bytes: Vec<u8> = vec![];
//! # if false {
//! let db = open_primary(&bytes, "hunter2", None)?;
//! if let Some(password) = db.groups[0].entries[0].password()? {
//!     println!("first entry's password is {password}");
//! }
//! # }
//!
//! // A cache envelope's own credential is conventionally derived from
//! // the primary password rather than stored alongside it.
//! let _cache_credential = cache_password("hunter2");
//! # Ok(())
//! # }
//! ```
//!
//! Lower-level operations - generic container encrypt/decrypt without the
//! KeePass XML schema, and the cache envelope's own encrypt/decrypt - are
//! exposed as [`decrypt_kdbx`]/[`encrypt_kdbx`] and
//! [`cache_serialize`]/[`cache_deserialize`].
//!
//! Only the kdbx v3 container is supported (AES-256-CBC, SHA-256 hashed
//! blocks, optional GZIP, optional Salsa20 per-field protection). KeePass
//! 1.x and kdbx v4 (Argon2, ChaCha20, HMAC block authentication) are out
//! of scope, as is writing the primary format - only the cache envelope
//! is ever encrypted by this crate.

mod binary;
mod compress;
mod crypto;
mod database;
mod errors;
mod stream;
mod util;
mod xml;

pub mod cache;
pub mod keyfile;

pub use crate::cache::CacheEnvelope;
pub use crate::crypto::CompositeCredential;
pub use crate::database::{Database, Entry, Field, Filter, Group};
pub use crate::errors::{Error, Result};
pub use crate::xml::Value;

use std::io::Cursor;

/// Open a primary kdbx v3 database: authenticate `bytes` against a
/// composite credential built from `password` and, if present,
/// `key_file_bytes`, then parse the decrypted XML into a [`Database`].
///
/// Fails with [`Error::BadCredential`] if the credential is wrong,
/// [`Error::UnsupportedCipher`]/[`Error::UnsupportedStreamCipher`] if the
/// file names an algorithm outside AES256/NONE/SALSA20, and
/// [`Error::IntegrityFailure`] if the database's own `HeaderHash` meta
/// value does not match the outer container's header digest.
pub fn open_primary(
    bytes: &[u8],
    password: &str,
    key_file_bytes: Option<&[u8]>,
) -> Result<Database> {
    let (database, _corrupted) = open_primary_with_mode(bytes, password, key_file_bytes, false)?;
    Ok(database)
}

/// Open a primary kdbx v3 database the same as [`open_primary`], but
/// decode its hashed block stream in permissive mode: a block
/// index/hash mismatch is recorded rather than aborting the open. The
/// returned `bool` is `true` if any block failed that check. Diagnostic
/// use only - prefer [`open_primary`] unless you specifically need to
/// recover a partially corrupted database.
pub fn open_primary_permissive(
    bytes: &[u8],
    password: &str,
    key_file_bytes: Option<&[u8]>,
) -> Result<(Database, bool)> {
    open_primary_with_mode(bytes, password, key_file_bytes, true)
}

fn open_primary_with_mode(
    bytes: &[u8],
    password: &str,
    key_file_bytes: Option<&[u8]>,
    permissive: bool,
) -> Result<(Database, bool)> {
    let credential = match key_file_bytes {
        Some(key_file) => CompositeCredential::from_password_and_key_file(password, key_file),
        None => CompositeCredential::from_password(password),
    };

    let decrypted = if permissive {
        binary::decrypt_permissive(bytes, &credential)?
    } else {
        binary::decrypt(bytes, &credential)?
    };
    let keystream = match decrypted.stream_cipher {
        binary::StreamCipher::Salsa20 => Some(stream::Keystream::new(&decrypted.protected_stream_key)),
        binary::StreamCipher::None => None,
    };

    let mut database = xml::parse_xml(
        Cursor::new(decrypted.payload),
        keystream,
        decrypted.stream_cipher,
    )?;

    if let Some(claimed) = &database.header_hash {
        if claimed.as_slice() != decrypted.header_hash.as_slice() {
            return Err(Error::IntegrityFailure(
                "database HeaderHash does not match outer kdbx header".into(),
            ));
        }
    }
    database.header_hash = Some(decrypted.header_hash);

    Ok((database, decrypted.corrupted))
}

/// Payload recovered from a raw kdbx v3 decrypt, with no assumption
/// made about its shape - used by [`decrypt_kdbx`], and internally by
/// [`open_primary`] and the cache envelope, both of which parse this
/// payload further (as KeePass XML or as cache-envelope JSON,
/// respectively).
#[derive(Clone, Debug)]
pub struct DecryptedPayload {
    /// The decrypted, decompressed payload bytes.
    pub payload: Vec<u8>,
    /// SHA-256 digest of the exact header bytes this container parsed.
    pub header_hash: Vec<u8>,
    /// Set when the hashed block stream was decoded in permissive mode
    /// (see [`decrypt_kdbx_permissive`]) and at least one block failed
    /// its index/hash check. Always `false` for [`decrypt_kdbx`], which
    /// decodes strictly and fails outright instead.
    pub corrupted: bool,
}

/// Authenticate and decrypt a kdbx v3 container, without interpreting
/// its payload as KeePass XML or cache-envelope JSON.
pub fn decrypt_kdbx(bytes: &[u8], credential: &CompositeCredential) -> Result<DecryptedPayload> {
    let decrypted = binary::decrypt(bytes, credential)?;
    Ok(DecryptedPayload {
        payload: decrypted.payload,
        header_hash: decrypted.header_hash,
        corrupted: decrypted.corrupted,
    })
}

/// Authenticate and decrypt a kdbx v3 container the same as
/// [`decrypt_kdbx`], but decode its hashed block stream in permissive
/// mode: a block index/hash mismatch is recorded in
/// [`DecryptedPayload::corrupted`] rather than aborting the decrypt.
/// For diagnostics only; this must never be the default a caller
/// reaches for (spec's strict mode is the default for good reason -
/// silently tolerating a tampered block is a data-integrity
/// trade-off the caller has to opt into explicitly).
pub fn decrypt_kdbx_permissive(
    bytes: &[u8],
    credential: &CompositeCredential,
) -> Result<DecryptedPayload> {
    let decrypted = binary::decrypt_permissive(bytes, credential)?;
    Ok(DecryptedPayload {
        payload: decrypted.payload,
        header_hash: decrypted.header_hash,
        corrupted: decrypted.corrupted,
    })
}

/// Encrypt `plaintext` into a fresh kdbx v3 container: AES256 cipher, no
/// compression, no per-field protection, `rounds` rounds of key
/// transform. This is the primitive the cache envelope is built on; it
/// does not know anything about the KeePass XML schema, so it cannot by
/// itself produce a file [`open_primary`] would recognize as a primary
/// database (this crate never writes that schema; see the crate docs).
pub fn encrypt_kdbx(
    plaintext: &[u8],
    credential: &CompositeCredential,
    rounds: u64,
) -> Result<Vec<u8>> {
    binary::encrypt(plaintext, credential, rounds)
}

/// Project `database` to JSON under `filter` (or the default filter,
/// which accepts everything except passwords) and wrap it in a fresh
/// kdbx v3 container keyed by `credential`.
///
/// `dbfile_bytes` and `key_file_bytes` are the primary database's (and
/// its key file's, if any) raw bytes, hashed and stamped into the
/// envelope so a later [`cache_deserialize`] can recognize which
/// primary file this cache mirrors. The envelope's own `headerhash`
/// field is not a caller input - it is the digest of the outer kdbx
/// container this call itself builds, adopted as-is, so a later reload
/// can detect tampering with the envelope independent of the primary
/// file.
///
/// `database` is `None` to produce a type-`NONE` envelope with no
/// wrapped database at all (e.g. to record that a primary file is
/// known but has not yet been cached); otherwise the envelope is
/// type-`KDBX` and carries `database`'s projection.
pub fn cache_serialize(
    database: Option<&Database>,
    credential: &CompositeCredential,
    dbfile_bytes: &[u8],
    key_file_bytes: Option<&[u8]>,
    filter: Option<&Filter>,
) -> Result<Vec<u8>> {
    cache::to_kdbx(database, credential, dbfile_bytes, key_file_bytes, filter)
}

/// Decrypt and parse a cache envelope, verifying that its stamped
/// header hash matches this outer container's own header digest at
/// load time - the self-referential tamper check spec.md §3 invariant
/// (v) describes, not a staleness check against some other file.
pub fn cache_deserialize(bytes: &[u8], credential: &CompositeCredential) -> Result<CacheEnvelope> {
    cache::from_kdbx(bytes, credential)
}

/// Derive the conventional cache-envelope credential from a primary
/// database password: its first `floor(len/2)` characters, or the full
/// password if it is shorter than 4 characters.
///
/// This is a convenience only - any credential may be used for the
/// cache envelope, including the primary database's own.
pub fn cache_password(password: &str) -> String {
    let chars: Vec<char> = password.chars().collect();
    if chars.len() < 4 {
        return password.to_string();
    }
    let half = chars.len() / 2;
    chars[..half].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::{build_header as build_cache_header, encrypt_with_header, Compression, KdbxHeader, StreamCipher};
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    fn b64(bytes: &[u8]) -> String {
        STANDARD.encode(bytes)
    }

    /// Hand-build a kdbx v3 file the way KeePass itself would: a SALSA20
    /// per-field stream, one group "Root" holding one entry with a
    /// protected `Password` field. This crate never writes this schema
    /// itself (see crate docs), so the test constructs it directly from
    /// crate-internal pieces rather than via the public API.
    fn build_primary_kdbx(password: &str, rounds: u64) -> (Vec<u8>, String) {
        let protected_stream_key = [42u8; 32];
        let header = KdbxHeader::build(
            Compression::None,
            [1u8; 32],
            [2u8; 32],
            rounds,
            [3u8; 16],
            protected_stream_key.to_vec(),
            [4u8; 32],
            StreamCipher::Salsa20,
        );

        let mut keystream = stream::Keystream::new(&protected_stream_key);
        let ciphertext = keystream.decrypt(b"c");

        let entry_uuid = b64(b"entry-uuid-16byt");
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<KeePassFile>
 <Meta><DatabaseName>Test</DatabaseName></Meta>
 <Root>
  <Group>
   <UUID>{group_uuid}</UUID>
   <Name>Root</Name>
   <Entry>
    <UUID>{entry_uuid}</UUID>
    <String><Key>Title</Key><Value>a</Value></String>
    <String><Key>UserName</Key><Value>b</Value></String>
    <String><Key>Password</Key><Value Protected="True">{password_b64}</Value></String>
   </Entry>
  </Group>
 </Root>
</KeePassFile>"#,
            group_uuid = b64(b"group-uuid-16byt"),
            entry_uuid = entry_uuid,
            password_b64 = b64(&ciphertext),
        );

        let credential = CompositeCredential::from_password(password);
        let bytes = encrypt_with_header(xml.as_bytes(), &credential, &header).unwrap();
        (bytes, entry_uuid)
    }

    #[test]
    fn opens_a_salsa20_protected_primary_database() {
        let (bytes, entry_uuid) = build_primary_kdbx("abcdefg", 6000);
        let db = open_primary(&bytes, "abcdefg", None).unwrap();

        assert_eq!(db.groups.len(), 1);
        assert_eq!(db.groups[0].name, "Root");
        let entry = &db.groups[0].entries[0];
        assert_eq!(entry.title().unwrap(), Some("a".to_string()));
        assert_eq!(entry.username().unwrap(), Some("b".to_string()));
        assert_eq!(db.get_password(&entry_uuid).unwrap(), Some("c".to_string()));
    }

    #[test]
    fn wrong_password_is_rejected() {
        let (bytes, _) = build_primary_kdbx("abcdefg", 6000);
        assert!(matches!(
            open_primary(&bytes, "abcdefh", None),
            Err(Error::BadCredential)
        ));
    }

    #[test]
    fn key_file_augments_the_password() {
        let key_file = [0u8; 32];
        let protected_stream_key = [7u8; 32];
        let header = KdbxHeader::build(
            Compression::None,
            [9u8; 32],
            [8u8; 32],
            4,
            [6u8; 16],
            protected_stream_key.to_vec(),
            [5u8; 32],
            StreamCipher::None,
        );
        let credential = CompositeCredential::from_password_and_key_file("k", &key_file);
        let bytes = encrypt_with_header(b"<KeePassFile></KeePassFile>", &credential, &header).unwrap();

        // Without the key file, the password alone must not unlock it.
        assert!(open_primary(&bytes, "k", None).is_err());
        // With the key file, it must.
        assert!(open_primary(&bytes, "k", Some(&key_file)).is_ok());
    }

    #[test]
    fn gzip_compressed_payload_is_transparently_decompressed() {
        let protected_stream_key = [1u8; 32];
        let xml = b"<KeePassFile><Root><Group><Name>Root</Name></Group></Root></KeePassFile>";
        let compressed = crate::compress::compress_gzip(xml).unwrap();
        let header = KdbxHeader::build(
            Compression::Gzip,
            [11u8; 32],
            [12u8; 32],
            2,
            [13u8; 16],
            protected_stream_key.to_vec(),
            [14u8; 32],
            StreamCipher::None,
        );
        let credential = CompositeCredential::from_password("zipped");
        let bytes = encrypt_with_header(&compressed, &credential, &header).unwrap();
        let db = open_primary(&bytes, "zipped", None).unwrap();
        assert_eq!(db.groups[0].name, "Root");
    }

    #[test]
    fn cache_password_helper_halves_long_passwords_but_keeps_short_ones_whole() {
        assert_eq!(cache_password("abcdefgh"), "abcd");
        assert_eq!(cache_password("abcdefg"), "abc");
        assert_eq!(cache_password("abc"), "abc");
        assert_eq!(cache_password(""), "");
    }

    #[test]
    fn build_header_produces_fresh_randomness_each_call() {
        let a = build_cache_header(4).unwrap();
        let b = build_cache_header(4).unwrap();
        assert_ne!(a.master_seed, b.master_seed);
    }
}
