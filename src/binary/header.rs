//! Outer header TLV parsing/serialization (C7): the unencrypted prelude
//! of a kdbx v3 file, covering the two magic numbers, the format
//! version, and the field records up to the end-of-header terminator.

use crate::errors::{Error, Result};
use crate::util::{sha256, CachingReader};
use std::io::{Read, Write};

pub(crate) const KEEPASS_MAGIC: u32 = 0x9AA2_D903;
pub(crate) const KDBX_MAGIC: u32 = 0xB54B_FB67;

/// 16-byte UUID KeePass uses to identify the AES256/CBC cipher. The
/// only cipher this crate recognizes; anything else is
/// [`Error::UnsupportedCipher`].
const AES256_CIPHER_UUID: [u8; 16] = [
    0x31, 0xc1, 0xf2, 0xe6, 0xbf, 0x71, 0x43, 0x50, 0xbe, 0x58, 0x05, 0x21, 0x6a, 0xfc, 0x5a, 0xff,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamCipher {
    None,
    Salsa20,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldId {
    EndOfHeader,
    Comment,
    CipherId,
    CompressionFlags,
    MasterSeed,
    TransformSeed,
    TransformRounds,
    EncryptionIv,
    ProtectedStreamKey,
    StreamStartBytes,
    InnerRandomStreamId,
    Unknown(u8),
}

impl From<u8> for FieldId {
    fn from(id: u8) -> FieldId {
        match id {
            0 => FieldId::EndOfHeader,
            1 => FieldId::Comment,
            2 => FieldId::CipherId,
            3 => FieldId::CompressionFlags,
            4 => FieldId::MasterSeed,
            5 => FieldId::TransformSeed,
            6 => FieldId::TransformRounds,
            7 => FieldId::EncryptionIv,
            8 => FieldId::ProtectedStreamKey,
            9 => FieldId::StreamStartBytes,
            10 => FieldId::InnerRandomStreamId,
            x => FieldId::Unknown(x),
        }
    }
}

impl From<FieldId> for u8 {
    fn from(id: FieldId) -> u8 {
        match id {
            FieldId::EndOfHeader => 0,
            FieldId::Comment => 1,
            FieldId::CipherId => 2,
            FieldId::CompressionFlags => 3,
            FieldId::MasterSeed => 4,
            FieldId::TransformSeed => 5,
            FieldId::TransformRounds => 6,
            FieldId::EncryptionIv => 7,
            FieldId::ProtectedStreamKey => 8,
            FieldId::StreamStartBytes => 9,
            FieldId::InnerRandomStreamId => 10,
            FieldId::Unknown(x) => x,
        }
    }
}

/// A single TLV record as read off the wire, before it's folded into
/// [`KdbxHeader`] by [`KdbxHeader::parse`].
struct RawField {
    id: FieldId,
    data: Vec<u8>,
}

fn read_one_field<R: Read>(reader: &mut R) -> Result<RawField> {
    let mut id_buf = [0u8; 1];
    reader.read_exact(&mut id_buf)?;
    let id = FieldId::from(id_buf[0]);

    let mut len_buf = [0u8; 2];
    reader.read_exact(&mut len_buf)?;
    let len = u16::from_le_bytes(len_buf) as usize;

    let mut data = crate::util::buffer(len);
    reader.read_exact(&mut data)?;
    Ok(RawField { id, data })
}

/// The unencrypted kdbx v3 header: cipher, compression, key derivation
/// seeds, and the material needed to seed the per-field keystream.
#[derive(Debug, Clone)]
pub(crate) struct KdbxHeader {
    pub(crate) compression: Compression,
    pub(crate) master_seed: [u8; 32],
    pub(crate) transform_seed: [u8; 32],
    pub(crate) rounds: u64,
    pub(crate) encryption_iv: [u8; 16],
    pub(crate) protected_stream_key: Vec<u8>,
    pub(crate) stream_start_bytes: [u8; 32],
    pub(crate) stream_cipher: StreamCipher,
    /// Exact bytes consumed parsing (or produced serializing) this
    /// header, magic numbers and version included. Its SHA-256 is the
    /// header digest recorded in [`KdbxHeader::digest`].
    pub(crate) raw: Vec<u8>,
}

impl KdbxHeader {
    /// SHA-256 of the exact bytes that make up this header.
    pub(crate) fn digest(&self) -> Vec<u8> {
        sha256(&self.raw)
    }

    /// Read magic numbers, version, and header fields from `reader`.
    pub(crate) fn parse<R: Read>(reader: &mut R) -> Result<KdbxHeader> {
        let mut caching = CachingReader::new(reader);

        let mut magic = [0u8; 4];
        caching.read_exact(&mut magic)?;
        if u32::from_le_bytes(magic) != KEEPASS_MAGIC {
            return Err(Error::HeaderInvalid("bad keepass magic number".into()));
        }
        caching.read_exact(&mut magic)?;
        if u32::from_le_bytes(magic) != KDBX_MAGIC {
            return Err(Error::HeaderInvalid("bad kdbx magic number".into()));
        }

        let mut version_buf = [0u8; 4];
        caching.read_exact(&mut version_buf)?;
        let major_version = u16::from_le_bytes([version_buf[2], version_buf[3]]);
        if major_version > 3 {
            return Err(Error::HeaderInvalid(format!(
                "unsupported major version {major_version}"
            )));
        }

        let mut cipher_id: Option<[u8; 16]> = None;
        let mut compression: Option<Compression> = None;
        let mut master_seed: Option<[u8; 32]> = None;
        let mut transform_seed: Option<[u8; 32]> = None;
        let mut rounds: Option<u64> = None;
        let mut encryption_iv: Option<[u8; 16]> = None;
        let mut protected_stream_key: Option<Vec<u8>> = None;
        let mut stream_start_bytes: Option<[u8; 32]> = None;
        let mut stream_cipher: Option<StreamCipher> = None;

        loop {
            let field = read_one_field(&mut caching)?;
            match field.id {
                FieldId::EndOfHeader => break,
                FieldId::Comment | FieldId::Unknown(_) => {}
                FieldId::CipherId => {
                    cipher_id = Some(to_array_16(&field.data, "cipher id")?);
                }
                FieldId::CompressionFlags => {
                    let flags = to_array_4(&field.data, "compression flags")?;
                    compression = Some(match u32::from_le_bytes(flags) {
                        0 => Compression::None,
                        1 => Compression::Gzip,
                        other => {
                            return Err(Error::HeaderInvalid(format!(
                                "unknown compression flag {other}"
                            )))
                        }
                    });
                }
                FieldId::MasterSeed => master_seed = Some(to_array_32(&field.data, "master seed")?),
                FieldId::TransformSeed => {
                    transform_seed = Some(to_array_32(&field.data, "transform seed")?)
                }
                FieldId::TransformRounds => {
                    rounds = Some(u64::from_le_bytes(to_array_8(&field.data, "rounds")?))
                }
                FieldId::EncryptionIv => {
                    encryption_iv = Some(to_array_16(&field.data, "encryption iv")?)
                }
                FieldId::ProtectedStreamKey => protected_stream_key = Some(field.data),
                FieldId::StreamStartBytes => {
                    stream_start_bytes = Some(to_array_32(&field.data, "start bytes")?)
                }
                FieldId::InnerRandomStreamId => {
                    let tag = to_array_4(&field.data, "inner stream tag")?;
                    stream_cipher = Some(match u32::from_le_bytes(tag) {
                        0 => StreamCipher::None,
                        2 => StreamCipher::Salsa20,
                        1 => return Err(Error::UnsupportedStreamCipher),
                        _ => return Err(Error::UnsupportedStreamCipher),
                    });
                }
            }
        }

        let cipher_id = cipher_id.ok_or_else(|| Error::HeaderInvalid("missing cipher id".into()))?;
        if cipher_id != AES256_CIPHER_UUID {
            return Err(Error::UnsupportedCipher);
        }

        let header = KdbxHeader {
            compression: compression
                .ok_or_else(|| Error::HeaderInvalid("missing compression flags".into()))?,
            master_seed: master_seed
                .ok_or_else(|| Error::HeaderInvalid("missing master seed".into()))?,
            transform_seed: transform_seed
                .ok_or_else(|| Error::HeaderInvalid("missing transform seed".into()))?,
            rounds: rounds.ok_or_else(|| Error::HeaderInvalid("missing round count".into()))?,
            encryption_iv: encryption_iv
                .ok_or_else(|| Error::HeaderInvalid("missing encryption iv".into()))?,
            protected_stream_key: protected_stream_key
                .ok_or_else(|| Error::HeaderInvalid("missing protected stream key".into()))?,
            stream_start_bytes: stream_start_bytes
                .ok_or_else(|| Error::HeaderInvalid("missing start bytes".into()))?,
            stream_cipher: stream_cipher
                .ok_or_else(|| Error::HeaderInvalid("missing inner random stream id".into()))?,
            raw: caching.into_consumed(),
        };
        Ok(header)
    }

    /// Build a fresh header for encryption: AES256 cipher, no
    /// compression, no per-field stream, with the given seeds/IV/round
    /// count and a freshly generated start-bytes canary.
    pub(crate) fn build_for_encrypt(
        master_seed: [u8; 32],
        transform_seed: [u8; 32],
        encryption_iv: [u8; 16],
        protected_stream_key: [u8; 32],
        stream_start_bytes: [u8; 32],
        rounds: u64,
    ) -> KdbxHeader {
        KdbxHeader::build(
            Compression::None,
            master_seed,
            transform_seed,
            rounds,
            encryption_iv,
            protected_stream_key.to_vec(),
            stream_start_bytes,
            StreamCipher::None,
        )
    }

    /// Build a header from explicit field values, for any combination
    /// of compression and per-field stream cipher. `build_for_encrypt`
    /// is a thin wrapper over this for the one combination this crate's
    /// own `encrypt_kdbx` ever produces (no compression, no per-field
    /// stream); this general form exists for tests that need to
    /// exercise a header shape this crate never writes itself, such as
    /// a SALSA20-protected file as KeePass 2.x itself would produce.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn build(
        compression: Compression,
        master_seed: [u8; 32],
        transform_seed: [u8; 32],
        rounds: u64,
        encryption_iv: [u8; 16],
        protected_stream_key: Vec<u8>,
        stream_start_bytes: [u8; 32],
        stream_cipher: StreamCipher,
    ) -> KdbxHeader {
        let mut header = KdbxHeader {
            compression,
            master_seed,
            transform_seed,
            rounds,
            encryption_iv,
            protected_stream_key,
            stream_start_bytes,
            stream_cipher,
            raw: Vec::new(),
        };
        header.raw = header.serialize();
        header
    }

    /// Serialize this header: magic numbers, version `3.1`, every
    /// field, then the end-of-header terminator.
    fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&KEEPASS_MAGIC.to_le_bytes());
        out.extend_from_slice(&KDBX_MAGIC.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes()); // minor
        out.extend_from_slice(&3u16.to_le_bytes()); // major

        write_field(&mut out, FieldId::CipherId, &AES256_CIPHER_UUID);
        write_field(
            &mut out,
            FieldId::CompressionFlags,
            &(match self.compression {
                Compression::None => 0u32,
                Compression::Gzip => 1u32,
            })
            .to_le_bytes(),
        );
        write_field(&mut out, FieldId::MasterSeed, &self.master_seed);
        write_field(&mut out, FieldId::TransformSeed, &self.transform_seed);
        write_field(&mut out, FieldId::TransformRounds, &self.rounds.to_le_bytes());
        write_field(&mut out, FieldId::EncryptionIv, &self.encryption_iv);
        write_field(
            &mut out,
            FieldId::ProtectedStreamKey,
            &self.protected_stream_key,
        );
        write_field(&mut out, FieldId::StreamStartBytes, &self.stream_start_bytes);
        write_field(
            &mut out,
            FieldId::InnerRandomStreamId,
            &(match self.stream_cipher {
                StreamCipher::None => 0u32,
                StreamCipher::Salsa20 => 2u32,
            })
            .to_le_bytes(),
        );
        write_field(&mut out, FieldId::EndOfHeader, &[]);
        out
    }

    pub(crate) fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.raw)?;
        Ok(())
    }
}

fn write_field(out: &mut Vec<u8>, id: FieldId, data: &[u8]) {
    out.push(id.into());
    out.extend_from_slice(&(data.len() as u16).to_le_bytes());
    out.extend_from_slice(data);
}

fn to_array_32(data: &[u8], field: &str) -> Result<[u8; 32]> {
    data.try_into()
        .map_err(|_| Error::HeaderInvalid(format!("{field} must be 32 bytes")))
}

fn to_array_16(data: &[u8], field: &str) -> Result<[u8; 16]> {
    data.try_into()
        .map_err(|_| Error::HeaderInvalid(format!("{field} must be 16 bytes")))
}

fn to_array_8(data: &[u8], field: &str) -> Result<[u8; 8]> {
    data.try_into()
        .map_err(|_| Error::HeaderInvalid(format!("{field} must be 8 bytes")))
}

fn to_array_4(data: &[u8], field: &str) -> Result<[u8; 4]> {
    data.try_into()
        .map_err(|_| Error::HeaderInvalid(format!("{field} must be 4 bytes")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> KdbxHeader {
        KdbxHeader::build_for_encrypt([1u8; 32], [2u8; 32], [3u8; 16], [4u8; 32], [5u8; 32], 128)
    }

    #[test]
    fn digest_matches_sha256_of_raw() {
        let header = sample_header();
        assert_eq!(header.digest(), sha256(&header.raw));
    }

    #[test]
    fn round_trips_through_parse() {
        let header = sample_header();
        let mut cursor = std::io::Cursor::new(header.raw.clone());
        let parsed = KdbxHeader::parse(&mut cursor).unwrap();
        assert_eq!(parsed.master_seed, header.master_seed);
        assert_eq!(parsed.transform_seed, header.transform_seed);
        assert_eq!(parsed.rounds, header.rounds);
        assert_eq!(parsed.encryption_iv, header.encryption_iv);
        assert_eq!(parsed.stream_start_bytes, header.stream_start_bytes);
        assert_eq!(parsed.compression, Compression::None);
        assert_eq!(parsed.stream_cipher, StreamCipher::None);
        assert_eq!(parsed.digest(), header.digest());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut cursor = std::io::Cursor::new(vec![0u8; 64]);
        assert!(matches!(
            KdbxHeader::parse(&mut cursor),
            Err(Error::HeaderInvalid(_))
        ));
    }

    #[test]
    fn rejects_rc4_stream_tag() {
        let mut header = sample_header();
        header.stream_cipher = StreamCipher::Salsa20;
        let mut raw = header.serialize();
        // Flip the InnerRandomStreamId value (last field's payload, a
        // u32) from 2 (Salsa20) to 1 (RC4).
        let terminator_offset = raw.len() - 3; // id(1)+len(2) of EndOfHeader
        let tag_value_offset = terminator_offset - 4;
        raw[tag_value_offset] = 1;
        let mut cursor = std::io::Cursor::new(raw);
        assert!(matches!(
            KdbxHeader::parse(&mut cursor),
            Err(Error::UnsupportedStreamCipher)
        ));
    }
}
