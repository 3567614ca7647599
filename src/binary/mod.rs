//! Binary kdbx v3 container: header (C7) and the encrypt/decrypt
//! orchestration built on top of it (C9).

pub(crate) mod container;
pub(crate) mod header;

pub(crate) use container::{
    build_header, decrypt, decrypt_permissive, encrypt, encrypt_with_header, DecryptedPayload,
};
pub(crate) use header::{Compression, KdbxHeader, StreamCipher};
