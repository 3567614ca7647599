//! Error types for this crate
//!
//! Every fallible entry point returns one of the kinds named in the
//! top level [`Error`] enum. Nothing here ever panics or aborts the
//! process; a failed open simply yields no `Database`.

use thiserror::Error;

/// Wrapper error type for this crate
#[derive(Error, Debug)]
pub enum Error {
    /// The unencrypted kdbx header is missing a required field, has a
    /// field of the wrong size, or a magic number does not match
    #[error("Invalid or incomplete kdbx header: {0}")]
    HeaderInvalid(String),

    /// The header names a cipher other than the AES sentinel this crate
    /// supports
    #[error("Unsupported cipher")]
    UnsupportedCipher,

    /// The header names a per-field stream cipher other than NONE or
    /// SALSA20 (in practice: the ARC4 family)
    #[error("Unsupported inner stream cipher")]
    UnsupportedStreamCipher,

    /// Decryption succeeded structurally but the recovered start-bytes
    /// canary did not match the header, which means the supplied
    /// credential was wrong
    #[error("Incorrect password or key file")]
    BadCredential,

    /// A hashed block's digest did not match its payload, the header
    /// digest did not match the header bytes, or a cache envelope's
    /// stored header-hash did not match its outer container
    #[error("Integrity check failed: {0}")]
    IntegrityFailure(String),

    /// The GZIP payload was malformed (bad magic, method, CRC or ISIZE)
    #[error("Could not decompress payload: {0}")]
    DecompressFailure(String),

    /// The decrypted XML or the cache envelope's JSON could not be parsed
    #[error("Could not parse payload: {0}")]
    ParseFailure(String),

    /// A key file did not match any recognized form (XML/Key/Data,
    /// 32 raw bytes, or 64 hex characters)
    #[error("Key file is not in a recognized format")]
    KeyFileInvalid,

    /// A parsed or loaded database projection has neither a name nor
    /// any groups
    #[error("Database is empty")]
    EmptyDatabase,

    /// Fresh random material could not be obtained, or came back the
    /// wrong size, while preparing to encrypt
    #[error("Could not prepare encryption: {0}")]
    PrepareFailure(String),

    /// Underlying I/O failure reading or writing a byte stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for this crate's fallible operations
pub type Result<T> = std::result::Result<T, Error>;
