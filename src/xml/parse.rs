//! Recursive-descent XML parser (C10/C11): walks the decrypted kdbx
//! payload with an `xml-rs` `EventReader`, building a [`Database`]
//! directly and decrypting `Protected="True"` field values as they are
//! encountered, in document order.

use super::protected::decode_value;
use crate::binary::StreamCipher;
use crate::database::{Database, Entry, Field, Group};
use crate::errors::{Error, Result};
use crate::stream::Keystream;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::io::Read;
use xml::reader::{EventReader, XmlEvent};

impl From<xml::reader::Error> for Error {
    fn from(e: xml::reader::Error) -> Error {
        Error::ParseFailure(format!("xml error: {e}"))
    }
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

fn parse_string<R: Read>(reader: &mut EventReader<R>) -> Result<Option<String>> {
    let mut content: Option<String> = None;
    loop {
        match reader.next()? {
            XmlEvent::Characters(text) | XmlEvent::CData(text) => {
                content = Some(content.map_or(text.clone(), |mut existing| {
                    existing.push_str(&text);
                    existing
                }));
            }
            XmlEvent::EndElement { .. } => break,
            _ => {}
        }
    }
    Ok(content)
}

fn parse_u32<R: Read>(reader: &mut EventReader<R>) -> Result<Option<u32>> {
    parse_string(reader)?.map(|s| s.parse()).transpose().map_err(|_| {
        Error::ParseFailure("expected a numeric field".into())
    })
}

struct Cursor<'a> {
    keystream: &'a mut Option<Keystream>,
    stream_cipher: StreamCipher,
}

fn parse_field<R: Read>(
    reader: &mut EventReader<R>,
    wrapper: &str,
    cursor: &mut Cursor,
) -> Result<(String, Field)> {
    let mut key = String::new();
    let mut value = Field::Clear(String::new());
    loop {
        match reader.next()? {
            XmlEvent::StartElement { name, .. } if eq_ignore_case(&name.local_name, "Key") => {
                key = parse_string(reader)?.ok_or_else(|| {
                    Error::ParseFailure("field is missing a Key".into())
                })?;
            }
            XmlEvent::StartElement {
                name, attributes, ..
            } if eq_ignore_case(&name.local_name, "Value") => {
                let protected = attributes.iter().any(|attr| {
                    eq_ignore_case(&attr.name.local_name, "Protected")
                        && attr.value.eq_ignore_ascii_case("true")
                });
                let text = parse_string(reader)?.unwrap_or_default();
                value = decode_value(
                    &text,
                    protected,
                    cursor.keystream.as_mut(),
                    cursor.stream_cipher,
                )?;
            }
            XmlEvent::EndElement { name, .. } if eq_ignore_case(&name.local_name, wrapper) => break,
            _ => {}
        }
    }
    Ok((key, value))
}

fn parse_history<R: Read>(reader: &mut EventReader<R>, cursor: &mut Cursor) -> Result<Vec<Entry>> {
    let mut history = Vec::new();
    loop {
        match reader.next()? {
            XmlEvent::StartElement { name, .. } if eq_ignore_case(&name.local_name, "Entry") => {
                history.push(parse_entry(reader, cursor)?);
            }
            XmlEvent::EndElement { name, .. } if eq_ignore_case(&name.local_name, "History") => break,
            _ => {}
        }
    }
    Ok(history)
}

fn parse_entry<R: Read>(reader: &mut EventReader<R>, cursor: &mut Cursor) -> Result<Entry> {
    let mut entry = Entry::default();
    loop {
        match reader.next()? {
            XmlEvent::StartElement { name, .. } => {
                let local = name.local_name.as_str();
                if eq_ignore_case(local, "UUID") {
                    entry.uuid = parse_string(reader)?.unwrap_or_default();
                } else if eq_ignore_case(local, "IconID") {
                    entry.icon_id = parse_u32(reader)?;
                } else if eq_ignore_case(local, "CustomIconUUID") {
                    entry.custom_icon_uuid = parse_string(reader)?;
                } else if eq_ignore_case(local, "Tags") {
                    entry.tags = parse_string(reader)?;
                } else if eq_ignore_case(local, "History") {
                    entry.history = parse_history(reader, cursor)?;
                } else if eq_ignore_case(local, "String") {
                    let (key, value) = parse_field(reader, "String", cursor)?;
                    if eq_ignore_case(&key, "Password") {
                        entry.password = Some(value);
                    } else if !key.is_empty() {
                        entry.fields.insert(key, value);
                    }
                }
            }
            XmlEvent::EndElement { name, .. } if eq_ignore_case(&name.local_name, "Entry") => break,
            _ => {}
        }
    }
    Ok(entry)
}

fn parse_group<R: Read>(reader: &mut EventReader<R>, cursor: &mut Cursor) -> Result<Group> {
    let mut group = Group::default();
    loop {
        match reader.next()? {
            XmlEvent::StartElement { name, .. } => {
                let local = name.local_name.as_str();
                if eq_ignore_case(local, "Group") {
                    group.groups.push(parse_group(reader, cursor)?);
                } else if eq_ignore_case(local, "Entry") {
                    group.entries.push(parse_entry(reader, cursor)?);
                } else if eq_ignore_case(local, "UUID") {
                    group.uuid = parse_string(reader)?.unwrap_or_default();
                } else if eq_ignore_case(local, "Name") {
                    group.name = parse_string(reader)?.unwrap_or_default();
                } else if eq_ignore_case(local, "IconID") {
                    group.icon_id = parse_u32(reader)?;
                } else if eq_ignore_case(local, "CustomIconUUID") {
                    group.custom_icon_uuid = parse_string(reader)?;
                }
            }
            XmlEvent::EndElement { name, .. } if eq_ignore_case(&name.local_name, "Group") => break,
            _ => {}
        }
    }
    Ok(group)
}

fn parse_root<R: Read>(reader: &mut EventReader<R>, cursor: &mut Cursor) -> Result<Vec<Group>> {
    let mut groups = Vec::new();
    loop {
        match reader.next()? {
            XmlEvent::StartElement { name, .. } if eq_ignore_case(&name.local_name, "Group") => {
                groups.push(parse_group(reader, cursor)?);
            }
            XmlEvent::EndElement { name, .. } if eq_ignore_case(&name.local_name, "Root") => break,
            _ => {}
        }
    }
    Ok(groups)
}

fn parse_custom_icons<R: Read>(reader: &mut EventReader<R>) -> Result<Vec<(String, Vec<u8>)>> {
    let mut icons = Vec::new();
    loop {
        match reader.next()? {
            XmlEvent::StartElement { name, .. } if eq_ignore_case(&name.local_name, "Icon") => {
                icons.push(parse_icon(reader)?);
            }
            XmlEvent::EndElement { name, .. } if eq_ignore_case(&name.local_name, "CustomIcons") => {
                break
            }
            _ => {}
        }
    }
    Ok(icons)
}

fn parse_icon<R: Read>(reader: &mut EventReader<R>) -> Result<(String, Vec<u8>)> {
    let mut uuid = String::new();
    let mut data = Vec::new();
    loop {
        match reader.next()? {
            XmlEvent::StartElement { name, .. } if eq_ignore_case(&name.local_name, "UUID") => {
                uuid = parse_string(reader)?.unwrap_or_default();
            }
            XmlEvent::StartElement { name, .. } if eq_ignore_case(&name.local_name, "Data") => {
                if let Some(text) = parse_string(reader)? {
                    data = STANDARD.decode(text.trim()).map_err(|e| {
                        Error::ParseFailure(format!("custom icon data is not valid base64: {e}"))
                    })?;
                }
            }
            XmlEvent::EndElement { name, .. } if eq_ignore_case(&name.local_name, "Icon") => break,
            _ => {}
        }
    }
    Ok((uuid, data))
}

fn parse_meta<R: Read>(
    reader: &mut EventReader<R>,
    database: &mut Database,
) -> Result<()> {
    loop {
        match reader.next()? {
            XmlEvent::StartElement { name, .. } => {
                let local = name.local_name.as_str();
                if eq_ignore_case(local, "DatabaseName") {
                    database.name = parse_string(reader)?.unwrap_or_default();
                } else if eq_ignore_case(local, "HeaderHash") {
                    if let Some(text) = parse_string(reader)? {
                        database.header_hash = STANDARD.decode(text.trim()).ok();
                    }
                } else if eq_ignore_case(local, "CustomIcons") {
                    for (uuid, data) in parse_custom_icons(reader)? {
                        database.custom_icons.insert(uuid, data);
                    }
                }
            }
            XmlEvent::EndElement { name, .. } if eq_ignore_case(&name.local_name, "Meta") => break,
            _ => {}
        }
    }
    Ok(())
}

/// Parse the decrypted kdbx payload into a [`Database`].
///
/// `keystream` must already be seeded from the header's per-field
/// protection key when `stream_cipher` is [`StreamCipher::Salsa20`];
/// pass `None` for the cache envelope's unprotected JSON-backed
/// payload, whose stream tag is always [`StreamCipher::None`].
pub(crate) fn parse_xml<R: Read>(
    xml_data: R,
    keystream: Option<Keystream>,
    stream_cipher: StreamCipher,
) -> Result<Database> {
    let config = xml::ParserConfig::new()
        .trim_whitespace(true)
        .cdata_to_characters(true);
    let mut reader = EventReader::new_with_config(xml_data, config);
    let mut keystream = keystream;
    let mut cursor = Cursor {
        keystream: &mut keystream,
        stream_cipher,
    };

    let mut database = Database::default();
    loop {
        match reader.next()? {
            XmlEvent::StartElement { name, .. } if eq_ignore_case(&name.local_name, "Meta") => {
                parse_meta(&mut reader, &mut database)?;
            }
            XmlEvent::StartElement { name, .. } if eq_ignore_case(&name.local_name, "Root") => {
                database.groups = parse_root(&mut reader, &mut cursor)?;
            }
            XmlEvent::EndElement { name, .. } if eq_ignore_case(&name.local_name, "KeePassFile") => {
                break
            }
            XmlEvent::EndDocument => break,
            _ => {}
        }
    }
    Ok(database)
}
