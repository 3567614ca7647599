//! Protected-value decoding (C10's keystream half): turns a
//! `Protected="True"` field's base64 text plus the database's keystream
//! into a [`ProtectedValue`] that can be revealed later.

use crate::binary::StreamCipher;
use crate::errors::{Error, Result};
use crate::stream::Keystream;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A field value straight out of the decrypted XML: either cleartext,
/// or a protected value that must be [`reveal`][ProtectedValue::reveal]ed
/// to read.
#[derive(Clone, Debug)]
pub enum Value {
    Clear(String),
    Protected(ProtectedValue),
}

impl Value {
    /// The plaintext, decrypting a protected value if needed.
    pub fn reveal(&self) -> Result<String> {
        match self {
            Value::Clear(s) => Ok(s.clone()),
            Value::Protected(p) => p.reveal(),
        }
    }
}

/// Ciphertext plus the exact keystream slice consumed when this node
/// was read. Revealing XORs the two; it does not happen eagerly so
/// that a caller who never asks for a password never materializes it.
#[derive(Clone, Debug, Zeroize, ZeroizeOnDrop)]
pub struct ProtectedValue {
    ciphertext: Vec<u8>,
    keystream: Vec<u8>,
}

impl ProtectedValue {
    pub fn reveal(&self) -> Result<String> {
        let bytes: Vec<u8> = self
            .ciphertext
            .iter()
            .zip(self.keystream.iter())
            .map(|(c, k)| c ^ k)
            .collect();
        String::from_utf8(bytes)
            .map_err(|_| Error::ParseFailure("protected value is not valid utf-8".into()))
    }
}

/// Decode a `<Value>` node's text into a [`Value`], applying the
/// keystream if `protected` is set.
///
/// If `protected` is set but no keystream is available, the
/// conservative fallback applies: return the raw decoded bytes as
/// cleartext only when the database's stream tag is `None` (the cache
/// envelope's case); any other stream tag without a live keystream is
/// a parse failure, since that combination should never arise from a
/// correctly derived header.
pub(crate) fn decode_value(
    text: &str,
    protected: bool,
    keystream: Option<&mut Keystream>,
    stream_cipher: StreamCipher,
) -> Result<Value> {
    if !protected {
        return Ok(Value::Clear(text.to_string()));
    }

    let ciphertext = STANDARD
        .decode(text)
        .map_err(|e| Error::ParseFailure(format!("protected value is not valid base64: {e}")))?;

    match keystream {
        Some(stream) => {
            let slice = stream.next_bytes(ciphertext.len());
            Ok(Value::Protected(ProtectedValue {
                ciphertext,
                keystream: slice,
            }))
        }
        None => match stream_cipher {
            StreamCipher::None => Ok(Value::Clear(
                String::from_utf8(ciphertext).map_err(|_| {
                    Error::ParseFailure("protected value is not valid utf-8".into())
                })?,
            )),
            StreamCipher::Salsa20 => Err(Error::ParseFailure(
                "protected value with no keystream configured".into(),
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleartext_value_passes_through() {
        let value = decode_value("hello", false, None, StreamCipher::Salsa20).unwrap();
        assert_eq!(value.reveal().unwrap(), "hello");
    }

    #[test]
    fn protected_value_reveals_with_matching_keystream() {
        let key = b"a protected stream key";
        let mut encrypt = Keystream::new(key);
        let ciphertext = encrypt.decrypt(b"s3cr3t");
        let text = STANDARD.encode(&ciphertext);

        let mut decrypt = Keystream::new(key);
        let value = decode_value(&text, true, Some(&mut decrypt), StreamCipher::Salsa20).unwrap();
        assert_eq!(value.reveal().unwrap(), "s3cr3t");
    }

    #[test]
    fn protected_value_without_keystream_and_none_tag_is_cleartext() {
        let value = decode_value(
            &STANDARD.encode(b"plain"),
            true,
            None,
            StreamCipher::None,
        )
        .unwrap();
        assert_eq!(value.reveal().unwrap(), "plain");
    }

    #[test]
    fn protected_value_without_keystream_and_salsa20_tag_fails() {
        let result = decode_value(&STANDARD.encode(b"plain"), true, None, StreamCipher::Salsa20);
        assert!(matches!(result, Err(Error::ParseFailure(_))));
    }
}
