use std::collections::BTreeMap;
use std::fmt;

use log::debug;
use serde_json::Value;

use super::Collection;
use crate::constants::{TAG_ADDRESSBOOK, TAG_CALENDAR};
use crate::error::{StoreError, StoreResult};

/// Collection metadata. Keys are kept sorted so the serialized form is stable.
pub type Props = BTreeMap<String, String>;

/// Type of a collection, stored under the `tag` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionTag {
    Calendar,
    AddressBook,
}

impl CollectionTag {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            TAG_CALENDAR => Some(CollectionTag::Calendar),
            TAG_ADDRESSBOOK => Some(CollectionTag::AddressBook),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionTag::Calendar => TAG_CALENDAR,
            CollectionTag::AddressBook => TAG_ADDRESSBOOK,
        }
    }

    /// File name suffix for items in a collection of this type.
    pub fn item_suffix(&self) -> &'static str {
        match self {
            CollectionTag::Calendar => ".ics",
            CollectionTag::AddressBook => ".vcf",
        }
    }
}

impl fmt::Display for CollectionTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Drop an empty `tag` and reject unknown ones.
pub fn check_and_sanitize_props(mut props: Props) -> StoreResult<Props> {
    if props.get("tag").is_some_and(|tag| tag.is_empty()) {
        props.remove("tag");
    }
    if let Some(tag) = props.get("tag").filter(|tag| CollectionTag::parse(tag).is_none()) {
        return Err(StoreError::InvalidProps(format!("Unsupported collection tag: {tag:?}")));
    }
    Ok(props)
}

/// Parse stored metadata: `null` values are dropped, other non-strings are errors.
fn props_from_json(raw: &[u8]) -> StoreResult<Props> {
    let value: BTreeMap<String, Value> =
        serde_json::from_slice(raw).map_err(|e| StoreError::InvalidProps(e.to_string()))?;

    let mut props = Props::new();
    for (key, value) in value {
        match value {
            Value::Null => {}
            Value::String(s) => {
                props.insert(key, s);
            }
            other => {
                return Err(StoreError::InvalidProps(format!(
                    "Value of {key:?} must be a string, got {other}"
                )));
            }
        }
    }
    check_and_sanitize_props(props)
}

impl Collection {
    /// All metadata. Missing metadata is empty.
    pub fn get_meta(&self) -> StoreResult<Props> {
        if self.write_locked() {
            return self.read_meta();
        }
        self.meta_cache.get_or_try_init(|| self.read_meta()).cloned()
    }

    pub fn get_meta_value(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.get_meta()?.remove(key))
    }

    pub fn tag(&self) -> StoreResult<Option<CollectionTag>> {
        Ok(self
            .get_meta_value("tag")?
            .as_deref()
            .and_then(CollectionTag::parse))
    }

    fn read_meta(&self) -> StoreResult<Props> {
        let path = self.props_path();
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Props::new()),
            Err(e) => return Err(e.into()),
        };
        props_from_json(&raw).map_err(|e| {
            StoreError::InvalidProps(format!(
                "Failed to load properties of collection {:?}: {e}",
                self.path
            ))
        })
    }

    /// Replace all metadata atomically.
    pub fn set_meta(&self, props: Props) -> StoreResult<()> {
        let props = check_and_sanitize_props(props)?;
        let raw = serde_json::to_vec(&props).map_err(std::io::Error::from)?;
        debug!("Writing properties of collection {:?}", self.path);
        self.ctx.writer.replace_file(&self.props_path(), &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trip() {
        for tag in [CollectionTag::Calendar, CollectionTag::AddressBook] {
            assert_eq!(CollectionTag::parse(tag.as_str()), Some(tag));
        }
        assert_eq!(CollectionTag::parse("VJOURNAL"), None);
        assert_eq!(CollectionTag::Calendar.item_suffix(), ".ics");
    }

    #[test]
    fn test_empty_tag_is_dropped() {
        let props = Props::from([("tag".to_string(), String::new())]);
        assert!(check_and_sanitize_props(props).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        let props = Props::from([("tag".to_string(), "VTODO".to_string())]);
        assert!(matches!(
            check_and_sanitize_props(props),
            Err(StoreError::InvalidProps(_))
        ));
    }

    #[test]
    fn test_props_from_json() {
        let props = props_from_json(br#"{"D:displayname": "Work", "C:calendar-description": null, "tag": "VCALENDAR"}"#)
            .unwrap();
        assert_eq!(props.len(), 2);
        assert_eq!(props["D:displayname"], "Work");

        assert!(props_from_json(br#"{"D:displayname": 3}"#).is_err());
        assert!(props_from_json(b"not json").is_err());
    }
}
