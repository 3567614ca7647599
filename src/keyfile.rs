//! Key file parsing (C6): turn the bytes of a key file into the 32-byte
//! secret it contributes to a composite credential.
//!
//! Three forms are recognized, tried in order: the XML key file format
//! (`KeyFile/Key/Data`, base64), a 64-character hex string, and a bare
//! 32-byte binary key.

use crate::errors::{Error, Result};
use xml::name::OwnedName;
use xml::reader::{EventReader, XmlEvent};

/// Parse a key file's bytes into its 32-byte secret.
///
/// Returns [`Error::KeyFileInvalid`] if none of the three recognized
/// forms match.
pub fn parse(bytes: &[u8]) -> Result<[u8; 32]> {
    if let Some(key) = parse_xml(bytes) {
        return to_array(&key);
    }
    if bytes.len() == 32 {
        return to_array(bytes);
    }
    if bytes.len() == 64 {
        if let Ok(decoded) = hex::decode(bytes) {
            return to_array(&decoded);
        }
    }
    Err(Error::KeyFileInvalid)
}

fn to_array(bytes: &[u8]) -> Result<[u8; 32]> {
    if bytes.len() != 32 {
        return Err(Error::KeyFileInvalid);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// Extract `KeyFile/Key/Data`'s base64-decoded content, if `bytes` parses
/// as XML at all and that path is present.
fn parse_xml(bytes: &[u8]) -> Option<Vec<u8>> {
    let parser = EventReader::new(bytes);
    let mut tag_stack: Vec<String> = Vec::new();

    for ev in parser {
        match ev.ok()? {
            XmlEvent::StartElement {
                name: OwnedName { ref local_name, .. },
                ..
            } => {
                tag_stack.push(local_name.clone());
            }
            XmlEvent::EndElement { .. } => {
                tag_stack.pop();
            }
            XmlEvent::Characters(text) => {
                if tag_stack == ["KeyFile", "Key", "Data"] {
                    use base64::{engine::general_purpose::STANDARD, Engine as _};
                    return STANDARD.decode(text.trim()).ok();
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_raw_binary_key() {
        let bytes = [5u8; 32];
        assert_eq!(parse(&bytes).unwrap(), bytes);
    }

    #[test]
    fn parses_hex_key() {
        let bytes = [0xabu8; 32];
        let hex_string = hex::encode(bytes);
        assert_eq!(parse(hex_string.as_bytes()).unwrap(), bytes);
    }

    #[test]
    fn parses_xml_key() {
        let raw = [9u8; 32];
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        let encoded = STANDARD.encode(raw);
        let xml = format!(
            "<KeyFile><Meta><Version>1.00</Version></Meta><Key><Data>{encoded}</Data></Key></KeyFile>"
        );
        assert_eq!(parse(xml.as_bytes()).unwrap(), raw);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(parse(b"not a key file"), Err(Error::KeyFileInvalid)));
    }
}
