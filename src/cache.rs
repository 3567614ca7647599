//! Cache envelope (C12): a second kdbx-format container whose payload
//! is a JSON projection of a [`Database`] instead of KeePass's own XML
//! schema, meant for fast local reads without re-parsing the primary
//! file.

use crate::binary;
use crate::crypto::CompositeCredential;
use crate::database::{self, Database, Filter, PROJECTION_CURRENT_VERSION};
use crate::errors::{Error, Result};
use crate::util::sha1_hex;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// Fixed round count for cache envelopes. The cache is a local,
/// frequently-rewritten artifact, not something that needs to resist
/// offline brute force the way a primary database does.
const CACHE_ROUNDS: u64 = 128;

/// No wrapped database; `db` is absent.
const ENVELOPE_TYPE_NONE: u8 = 1;
/// `db` carries a kdbx-sourced database's projection.
const ENVELOPE_TYPE_KDBX: u8 = 2;

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u64,
    #[serde(rename = "type")]
    kind: u8,
    dbfile: String,
    keyfile: Option<String>,
    headerhash: String,
    db: Option<serde_json::Value>,
}

/// A deserialized cache envelope: the reloaded [`Database`] (absent for
/// a type-`NONE` envelope) plus the identifying metadata it was stamped
/// with when produced.
pub struct CacheEnvelope {
    pub database: Option<Database>,
    pub dbfile: String,
    pub keyfile: Option<String>,
}

/// Serialize `database` into a fresh cache envelope container, keyed
/// by `credential` and stamped with the content hashes identifying the
/// primary database (and key file, if any) it was built from.
///
/// `database` is `None` to produce a type-`NONE` envelope with no
/// wrapped database (`db` is serialized as `null`); otherwise the
/// envelope is type-`KDBX` and carries `database`'s projection under
/// `filter` (`None` for the default, which accepts everything but
/// passwords).
///
/// The envelope's `headerhash` is the digest of the outer kdbx
/// container built here to carry it - computed from a header built
/// before the plaintext is assembled, then embedded in that same
/// plaintext and used to encrypt it - not a digest of anything
/// external. [`from_kdbx`] re-derives the same quantity at load time
/// and compares.
pub fn to_kdbx(
    database: Option<&Database>,
    credential: &CompositeCredential,
    dbfile_bytes: &[u8],
    keyfile_bytes: Option<&[u8]>,
    filter: Option<&Filter>,
) -> Result<Vec<u8>> {
    let default_filter = Filter::default();
    let filter = filter.unwrap_or(&default_filter);

    let header = binary::build_header(CACHE_ROUNDS)?;
    let headerhash = STANDARD.encode(header.digest());

    let (kind, db) = match database {
        Some(db) => (ENVELOPE_TYPE_KDBX, Some(database::to_projection(db, filter))),
        None => (ENVELOPE_TYPE_NONE, None),
    };

    let envelope = Envelope {
        version: PROJECTION_CURRENT_VERSION,
        kind,
        dbfile: sha1_hex(dbfile_bytes),
        keyfile: keyfile_bytes.map(sha1_hex),
        headerhash,
        db,
    };

    let plaintext = serde_json::to_vec(&envelope)
        .map_err(|e| Error::ParseFailure(format!("could not serialize cache envelope: {e}")))?;
    binary::encrypt_with_header(&plaintext, credential, &header)
}

/// Decrypt and parse a cache envelope, verifying that its stamped
/// `headerhash` matches this outer container's own header digest at
/// load time.
///
/// Returns [`Error::IntegrityFailure`] on a mismatch - the envelope's
/// own bytes have been tampered with or reassembled incorrectly, since
/// a correctly produced envelope always stamps the header digest of
/// the very container it ends up encrypted in.
pub fn from_kdbx(bytes: &[u8], credential: &CompositeCredential) -> Result<CacheEnvelope> {
    let decrypted = binary::decrypt(bytes, credential)?;
    let envelope: Envelope = serde_json::from_slice(&decrypted.payload)
        .map_err(|e| Error::ParseFailure(format!("could not parse cache envelope: {e}")))?;

    let actual_headerhash = STANDARD.encode(&decrypted.header_hash);
    if envelope.headerhash != actual_headerhash {
        return Err(Error::IntegrityFailure(
            "cache envelope header hash does not match its own outer kdbx container".into(),
        ));
    }

    let database = match envelope.kind {
        ENVELOPE_TYPE_KDBX => {
            let projection = envelope.db.ok_or_else(|| {
                Error::ParseFailure("type-KDBX cache envelope is missing its database".into())
            })?;
            Some(database::from_projection(&projection)?)
        }
        ENVELOPE_TYPE_NONE => None,
        other => {
            return Err(Error::ParseFailure(format!(
                "unrecognized cache envelope type {other}"
            )))
        }
    };

    Ok(CacheEnvelope {
        database,
        dbfile: envelope.dbfile,
        keyfile: envelope.keyfile,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Entry, Group};
    use crate::xml::Value;

    fn sample_database() -> Database {
        let entry = Entry {
            uuid: "ZW50cnktMQ==".into(),
            password: Some(Value::Clear("s3cr3t".into())),
            ..Default::default()
        };
        let group = Group {
            uuid: "Z3JvdXAtMQ==".into(),
            name: "Root".into(),
            entries: vec![entry],
            ..Default::default()
        };
        Database {
            name: "cached db".into(),
            groups: vec![group],
            ..Default::default()
        }
    }

    #[test]
    fn round_trips_and_excludes_password_by_default() {
        let credential = CompositeCredential::from_password("cache-password");
        let db = sample_database();

        let blob = to_kdbx(Some(&db), &credential, b"primary bytes", None, None).unwrap();
        let reloaded = from_kdbx(&blob, &credential).unwrap();

        let database = reloaded.database.expect("type-KDBX envelope carries a database");
        assert_eq!(database.name, "cached db");
        assert!(database.groups[0].entries[0].password.is_none());
    }

    #[test]
    fn headerhash_is_self_referential_not_tied_to_an_external_value() {
        // Two envelopes for the same database, built independently,
        // get different fresh headers (and so different headerhash
        // stamps) - each is still internally consistent.
        let credential = CompositeCredential::from_password("cache-password");
        let db = sample_database();

        let first = to_kdbx(Some(&db), &credential, b"primary bytes", None, None).unwrap();
        let second = to_kdbx(Some(&db), &credential, b"primary bytes", None, None).unwrap();

        assert!(from_kdbx(&first, &credential).is_ok());
        assert!(from_kdbx(&second, &credential).is_ok());
    }

    #[test]
    fn tampered_envelope_bytes_fail_the_header_hash_check() {
        let credential = CompositeCredential::from_password("cache-password");
        let db = sample_database();
        let mut blob = to_kdbx(Some(&db), &credential, b"primary bytes", None, None).unwrap();

        let last = blob.len() - 1;
        blob[last] ^= 0x01;

        // Either the AES-CBC/hashed-block layer below already rejects
        // the tamper, or (if it somehow didn't) the header-hash
        // self-check would. Either is an error.
        assert!(from_kdbx(&blob, &credential).is_err());
    }

    #[test]
    fn filter_can_include_passwords() {
        let credential = CompositeCredential::from_password("cache-password");
        let db = sample_database();
        let filter = Filter {
            accept_passwords: true,
            ..Filter::default()
        };

        let blob = to_kdbx(
            Some(&db),
            &credential,
            b"primary bytes",
            None,
            Some(&filter),
        )
        .unwrap();
        let reloaded = from_kdbx(&blob, &credential).unwrap();
        let database = reloaded.database.unwrap();
        let entry = &database.groups[0].entries[0];
        assert_eq!(entry.password().unwrap(), Some("s3cr3t".to_string()));
    }

    #[test]
    fn type_none_envelope_round_trips_with_no_database() {
        let credential = CompositeCredential::from_password("cache-password");

        let blob = to_kdbx(None, &credential, b"primary bytes", None, None).unwrap();
        let reloaded = from_kdbx(&blob, &credential).unwrap();

        assert!(reloaded.database.is_none());
        assert_eq!(reloaded.dbfile, sha1_hex(b"primary bytes"));
    }
}
