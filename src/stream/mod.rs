//! Stream-level framing: the protected-value keystream and the hashed
//! block stream the kdbx3 payload is wrapped in.

pub(crate) mod hashed_block;
mod keystream;

pub(crate) use keystream::Keystream;
