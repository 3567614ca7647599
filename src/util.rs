//! Small helpers shared across modules

use sha2::{Digest, Sha256};
use std::io;

pub(crate) fn buffer(len: usize) -> Vec<u8> {
    let mut v = Vec::with_capacity(len);
    v.resize_with(len, Default::default);
    v
}

pub(crate) fn sha256(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

pub(crate) fn verify_sha256(data: &[u8], expected: &[u8]) -> bool {
    expected == Sha256::digest(data).as_slice()
}

/// A `Read` adapter that remembers every byte it has yielded so far.
///
/// Used while parsing the kdbx header, whose digest is defined over
/// the exact bytes consumed to parse it.
pub(crate) struct CachingReader<'a, R: io::Read> {
    inner: &'a mut R,
    consumed: Vec<u8>,
}

impl<'a, R: io::Read> CachingReader<'a, R> {
    pub(crate) fn new(inner: &'a mut R) -> CachingReader<'a, R> {
        CachingReader {
            inner,
            consumed: Vec::new(),
        }
    }

    pub(crate) fn into_consumed(self) -> Vec<u8> {
        self.consumed
    }
}

impl<'a, R: io::Read> io::Read for CachingReader<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.consumed.extend_from_slice(&buf[..n]);
        Ok(n)
    }
}

/// Lowercased hex digest of SHA-1(`data`), used by the collaborator layer
/// to name blobs in its content-addressed store. Exposed here because it
/// is the one fact about that layer the core needs to agree on: the
/// cache envelope stores these same digests to recognize which primary
/// file and key file it was built from.
pub fn sha1_hex(data: &[u8]) -> String {
    use sha1::{Digest as _, Sha1};
    hex::encode(Sha1::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_known_answer() {
        // "abc" -> a9993e364706816aba3e25717850c26c9cd0d89
        assert_eq!(sha1_hex(b"abc"), "a9993e364706816aba3e25717850c26c9cd0d89");
        assert_eq!(sha1_hex(b""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }
}
