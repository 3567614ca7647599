//! In-memory database model (C11): groups, entries, and the lookup and
//! projection operations built on top of them.

use crate::errors::{Error, Result};
use crate::xml::Value;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::HashMap;

/// A single string field or the special `Password` field of an entry.
pub type Field = Value;

#[derive(Clone, Debug, Default)]
pub struct Entry {
    pub uuid: String,
    pub icon_id: Option<u32>,
    pub custom_icon_uuid: Option<String>,
    pub tags: Option<String>,
    pub password: Option<Field>,
    pub fields: HashMap<String, Field>,
    pub history: Vec<Entry>,
}

impl Entry {
    /// Decrypt and return this entry's password, if it has one.
    pub fn password(&self) -> Result<Option<String>> {
        self.password.as_ref().map(|v| v.reveal()).transpose()
    }

    /// Look up an arbitrary string field by its exact XML key, e.g.
    /// `"Title"`, `"UserName"` or a user-defined key.
    pub fn field(&self, key: &str) -> Option<&Field> {
        self.fields.get(key)
    }

    /// This entry's title, if it has one.
    pub fn title(&self) -> Result<Option<String>> {
        self.field("Title").map(|v| v.reveal()).transpose()
    }

    /// This entry's username, if it has one.
    pub fn username(&self) -> Result<Option<String>> {
        self.field("UserName").map(|v| v.reveal()).transpose()
    }

    /// This entry's URL, if it has one.
    pub fn url(&self) -> Result<Option<String>> {
        self.field("URL").map(|v| v.reveal()).transpose()
    }

    /// The KeepassXC-style `otp` field, a `otpauth://` URL, if present.
    ///
    /// This is a read of the already-generic string-field map under the
    /// conventional key KeepassXC stores TOTP secrets under; no TOTP
    /// code generation lives in this crate.
    pub fn otp_url(&self) -> Result<Option<String>> {
        self.field("otp").map(|v| v.reveal()).transpose()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Group {
    pub uuid: String,
    pub name: String,
    pub icon_id: Option<u32>,
    pub custom_icon_uuid: Option<String>,
    pub groups: Vec<Group>,
    pub entries: Vec<Entry>,
}

#[derive(Clone, Debug, Default)]
pub struct Database {
    pub name: String,
    pub header_hash: Option<Vec<u8>>,
    pub custom_icons: HashMap<String, Vec<u8>>,
    pub groups: Vec<Group>,
}

impl Database {
    /// Depth-first search for `uuid` (base64, matching [`Entry::uuid`])
    /// across every group, returning its decrypted password if found.
    pub fn get_password(&self, uuid: &str) -> Result<Option<String>> {
        for group in &self.groups {
            if let Some(password) = find_password_in_group(group, uuid)? {
                return Ok(Some(password));
            }
        }
        Ok(None)
    }
}

fn find_password_in_group(group: &Group, uuid: &str) -> Result<Option<String>> {
    for entry in &group.entries {
        if entry.uuid == uuid {
            return entry.password();
        }
    }
    for child in &group.groups {
        if let Some(password) = find_password_in_group(child, uuid)? {
            return Ok(Some(password));
        }
    }
    Ok(None)
}

/// Per-field projection policy (§9 Design notes: filters as a simple
/// predicate record). The default filter accepts everything except
/// passwords.
#[derive(Clone, Copy)]
pub struct Filter {
    pub accept_group: fn(&Group) -> bool,
    pub accept_entry: fn(&Entry) -> bool,
    pub accept_history: bool,
    pub accept_tags: bool,
    pub accept_icons: bool,
    pub accept_passwords: bool,
    pub accept_string_key: fn(&str) -> bool,
}

impl Default for Filter {
    fn default() -> Filter {
        Filter {
            accept_group: |_| true,
            accept_entry: |_| true,
            accept_history: true,
            accept_tags: true,
            accept_icons: true,
            accept_passwords: false,
            accept_string_key: |_| true,
        }
    }
}

/// Current cache envelope projection format version. Producers MUST
/// emit only this version; loaders accept this and [`PROJECTION_V0`].
pub(crate) const PROJECTION_CURRENT_VERSION: u64 = 1;
const PROJECTION_V0: u64 = 0;

/// Serialize `database` to its JSON-ready projection under `filter`.
pub(crate) fn to_projection(database: &Database, filter: &Filter) -> serde_json::Value {
    use serde_json::json;

    let groups: Vec<serde_json::Value> = database
        .groups
        .iter()
        .filter(|g| (filter.accept_group)(g))
        .map(|g| group_to_projection(g, filter))
        .collect();

    let mut custom_icons = serde_json::Map::new();
    if filter.accept_icons {
        for (uuid, data) in &database.custom_icons {
            custom_icons.insert(uuid.clone(), json!(STANDARD.encode(data)));
        }
    }

    json!({
        "name": database.name,
        "custom_icons": custom_icons,
        "groups": groups,
    })
}

fn group_to_projection(group: &Group, filter: &Filter) -> serde_json::Value {
    use serde_json::json;

    let entries: Vec<serde_json::Value> = group
        .entries
        .iter()
        .filter(|e| (filter.accept_entry)(e))
        .map(|e| entry_to_projection(e, filter))
        .collect();
    let groups: Vec<serde_json::Value> = group
        .groups
        .iter()
        .filter(|g| (filter.accept_group)(g))
        .map(|g| group_to_projection(g, filter))
        .collect();

    json!({
        "uuid": group.uuid,
        "name": group.name,
        "icon_id": filter.accept_icons.then_some(group.icon_id).flatten(),
        "custom_icon_uuid": filter.accept_icons.then(|| group.custom_icon_uuid.clone()).flatten(),
        "groups": groups,
        "entries": entries,
    })
}

fn entry_to_projection(entry: &Entry, filter: &Filter) -> serde_json::Value {
    use serde_json::json;

    let mut string_fields = serde_json::Map::new();
    for (key, value) in &entry.fields {
        if !(filter.accept_string_key)(key) {
            continue;
        }
        if let Ok(revealed) = value.reveal() {
            string_fields.insert(key.clone(), json!(revealed));
        }
    }

    let mut out = serde_json::Map::new();
    out.insert("version".into(), json!(PROJECTION_CURRENT_VERSION));
    out.insert("uuid".into(), json!(entry.uuid));
    if filter.accept_icons {
        out.insert("icon_id".into(), json!(entry.icon_id));
        out.insert("custom_icon_uuid".into(), json!(entry.custom_icon_uuid));
    }
    if filter.accept_tags {
        out.insert("tags".into(), json!(entry.tags));
    }
    out.insert("StringFields".into(), serde_json::Value::Object(string_fields));
    if filter.accept_passwords {
        if let Ok(Some(password)) = entry.password() {
            out.insert("password".into(), json!(password));
        }
    }
    if filter.accept_history {
        let history: Vec<serde_json::Value> = entry
            .history
            .iter()
            .map(|h| entry_to_projection(h, filter))
            .collect();
        out.insert("history".into(), json!(history));
    }
    serde_json::Value::Object(out)
}

/// Reconstruct a [`Database`] from its JSON projection, accepting both
/// the current (v1, `StringFields`-nested) and legacy (v0, flattened)
/// shapes.
pub(crate) fn from_projection(value: &serde_json::Value) -> Result<Database> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::ParseFailure("projection is not a JSON object".into()))?;

    let name = obj.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let groups_json = obj
        .get("groups")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let mut custom_icons = HashMap::new();
    if let Some(icons) = obj.get("custom_icons").and_then(|v| v.as_object()) {
        for (uuid, data) in icons {
            if let Some(encoded) = data.as_str() {
                if let Ok(decoded) = STANDARD.decode(encoded) {
                    custom_icons.insert(uuid.clone(), decoded);
                }
            }
        }
    }

    let groups = groups_json
        .iter()
        .map(group_from_projection)
        .collect::<Result<Vec<_>>>()?;

    if name.is_empty() && groups.is_empty() {
        return Err(Error::EmptyDatabase);
    }

    Ok(Database {
        name,
        header_hash: None,
        custom_icons,
        groups,
    })
}

fn group_from_projection(value: &serde_json::Value) -> Result<Group> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::ParseFailure("group projection is not an object".into()))?;

    let entries = obj
        .get("entries")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().map(entry_from_projection).collect::<Result<Vec<_>>>())
        .transpose()?
        .unwrap_or_default();
    let groups = obj
        .get("groups")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().map(group_from_projection).collect::<Result<Vec<_>>>())
        .transpose()?
        .unwrap_or_default();

    Ok(Group {
        uuid: obj.get("uuid").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        name: obj.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        icon_id: obj.get("icon_id").and_then(|v| v.as_u64()).map(|n| n as u32),
        custom_icon_uuid: obj
            .get("custom_icon_uuid")
            .and_then(|v| v.as_str())
            .map(String::from),
        groups,
        entries,
    })
}

fn entry_from_projection(value: &serde_json::Value) -> Result<Entry> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::ParseFailure("entry projection is not an object".into()))?;

    let version = obj.get("version").and_then(|v| v.as_u64()).unwrap_or(PROJECTION_V0);

    let mut fields = HashMap::new();
    if version >= PROJECTION_CURRENT_VERSION {
        if let Some(string_fields) = obj.get("StringFields").and_then(|v| v.as_object()) {
            for (key, value) in string_fields {
                if let Some(text) = value.as_str() {
                    fields.insert(key.clone(), Value::Clear(text.to_string()));
                }
            }
        }
    } else {
        // Pre-v1 shape: Title/UserName/URL (and anything else) sat as
        // top-level keys alongside the entry's own metadata.
        const RESERVED: &[&str] = &[
            "version", "uuid", "icon_id", "custom_icon_uuid", "tags", "password", "history",
        ];
        for (key, value) in obj {
            if RESERVED.contains(&key.as_str()) {
                continue;
            }
            if let Some(text) = value.as_str() {
                fields.insert(key.clone(), Value::Clear(text.to_string()));
            }
        }
    }

    let password = obj
        .get("password")
        .and_then(|v| v.as_str())
        .map(|s| Value::Clear(s.to_string()));

    let history = obj
        .get("history")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().map(entry_from_projection).collect::<Result<Vec<_>>>())
        .transpose()?
        .unwrap_or_default();

    Ok(Entry {
        uuid: obj.get("uuid").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
        icon_id: obj.get("icon_id").and_then(|v| v.as_u64()).map(|n| n as u32),
        custom_icon_uuid: obj
            .get("custom_icon_uuid")
            .and_then(|v| v.as_str())
            .map(String::from),
        tags: obj.get("tags").and_then(|v| v.as_str()).map(String::from),
        password,
        fields,
        history,
    })
}
