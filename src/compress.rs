//! Payload compression (C4): optional gzip around the decrypted inner
//! stream, selected by the header's compression flag.

use crate::errors::{Error, Result};
use std::io::{Read, Write};

/// Gzip-decompress `data`, the whole of it at once.
pub(crate) fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder =
        libflate::gzip::Decoder::new(data).map_err(|e| Error::DecompressFailure(e.to_string()))?;
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::DecompressFailure(e.to_string()))?;
    Ok(out)
}

/// Gzip-compress `data`.
pub(crate) fn compress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = libflate::gzip::Encoder::new(Vec::new())?;
    encoder.write_all(data)?;
    Ok(encoder.finish().into_result()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let data = b"compress me please, over and over and over".repeat(4);
        let compressed = compress_gzip(&data).unwrap();
        assert_ne!(compressed, data);
        let decompressed = decompress_gzip(&compressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn rejects_garbage() {
        assert!(decompress_gzip(b"not gzip data at all").is_err());
    }
}
