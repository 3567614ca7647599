//! Composite credential model (C5): password key plus an optional
//! key-file key, combined into one 32-byte hash.

use crate::keyfile;
use crate::util::sha256;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Credential used to unlock a primary database or a cache envelope.
///
/// Built from a password, a key file, or both. Internally this is an
/// ordered list of 32-byte member hashes; [`CompositeCredential::hash`]
/// folds them into the single digest the key transform consumes.
pub struct CompositeCredential {
    members: Vec<[u8; 32]>,
}

impl CompositeCredential {
    /// Start building a credential with no members yet.
    pub fn new() -> CompositeCredential {
        CompositeCredential {
            members: Vec::new(),
        }
    }

    /// Credential from a password alone.
    pub fn from_password(password: &str) -> CompositeCredential {
        let mut cred = CompositeCredential::new();
        cred.add_password(password);
        cred
    }

    /// Credential from a password and the raw bytes of a key file.
    ///
    /// If the key file bytes don't match any recognized form
    /// ([`keyfile::parse`]), the key file is silently dropped rather
    /// than contributing a member — per spec, an unparsed key file
    /// must not contribute to the composite key.
    pub fn from_password_and_key_file(password: &str, key_file_bytes: &[u8]) -> CompositeCredential {
        let mut cred = CompositeCredential::from_password(password);
        if let Ok(secret) = keyfile::parse(key_file_bytes) {
            cred.add_raw_hash(secret);
        }
        cred
    }

    /// Add a password member. Hashed with SHA-256 before joining the
    /// composite, per spec's `SHA-256(h1 ∥ h2 ∥ ... )` construction.
    pub fn add_password(&mut self, password: &str) {
        self.add_raw_hash(Sha256::digest(password.as_bytes()).into());
    }

    /// Add an already-32-byte secret (e.g. the output of
    /// [`keyfile::parse`]) as a composite member directly.
    pub fn add_raw_hash(&mut self, hash: [u8; 32]) {
        self.members.push(hash);
    }

    /// `SHA-256(h1 ∥ h2 ∥ ... ∥ hN)` over every member added so far, in
    /// the order they were added.
    pub(crate) fn hash(&self) -> ComposedKey {
        let mut buffer = Vec::with_capacity(self.members.len() * 32);
        for member in &self.members {
            buffer.extend_from_slice(member);
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&sha256(&buffer));
        ComposedKey(out)
    }
}

impl Default for CompositeCredential {
    fn default() -> CompositeCredential {
        CompositeCredential::new()
    }
}

/// The composite credential's hash, consumed by the key transform.
/// Lives only for the duration of one open or one encrypt call.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct ComposedKey(pub(crate) [u8; 32]);
