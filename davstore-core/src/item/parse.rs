//! Structural parsing of iCalendar and vCard objects.
//!
//! Only what the storage engine needs is extracted: the top-level object
//! names, the component type, UIDs and the time range an object covers.
//! iCalendar objects go through the `icalendar` parser; vCards only need
//! their `UID` and are read with a content-line scan.

use chrono::{NaiveTime, TimeZone};
use icalendar::{
    CalendarDateTime, DatePerhapsTime,
    parser::{Component, read_calendar, unfold},
};

use crate::collection::CollectionTag;
use crate::constants::{TIMESTAMP_MAX, TIMESTAMP_MIN};
use crate::error::{StoreError, StoreResult};

const DAY_SECS: i64 = 24 * 60 * 60;
const UID_COMPONENTS: [&str; 3] = ["VEVENT", "VJOURNAL", "VTODO"];

/// Cheap derived fields of an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemMeta {
    /// Name of the top-level object (`VCALENDAR`, `VCARD`, `VLIST`).
    pub name: String,
    /// First component type inside a `VCALENDAR` other than `VTIMEZONE`.
    pub component_name: String,
    pub uid: Option<String>,
    /// Start and end as Unix timestamps.
    pub time_range: (i64, i64),
}

/// A component directly inside a `VCALENDAR`.
#[derive(Debug, Clone)]
struct InnerComponent {
    name: String,
    uid: Option<String>,
    range: Option<(i64, i64)>,
}

#[derive(Debug, Clone)]
struct TopLevel {
    name: String,
    uid: Option<String>,
    components: Vec<InnerComponent>,
}

/// A parsed object, kept long enough to validate and derive [`ItemMeta`].
#[derive(Debug, Clone)]
pub struct ParsedObject {
    objects: Vec<TopLevel>,
}

pub fn parse_object(text: &str) -> StoreResult<ParsedObject> {
    let unfolded = unfold(text);
    let mut objects = scan_top_level(&unfolded)?;

    if objects.iter().any(|o| o.name == "VCALENDAR") {
        let calendar = read_calendar(&unfolded).map_err(|e| StoreError::InvalidItem(e.to_string()))?;
        let components: Vec<&Component> = calendar
            .components
            .iter()
            .flat_map(|c| {
                if c.name == "VCALENDAR" {
                    c.components.iter().collect::<Vec<_>>()
                } else {
                    vec![c]
                }
            })
            .collect();

        let inner: Vec<InnerComponent> = components
            .into_iter()
            .map(|c| InnerComponent {
                name: c.name.to_string().to_uppercase(),
                uid: c.find_prop("UID").map(|p| p.val.to_string()),
                range: component_range(c),
            })
            .collect();

        // Several VCALENDARs are rejected by validation, the components are
        // attached to the first one only.
        if let Some(vcalendar) = objects.iter_mut().find(|o| o.name == "VCALENDAR") {
            vcalendar.components = inner;
        }
    }

    Ok(ParsedObject { objects })
}

impl ParsedObject {
    /// Check that the object may be stored in a collection with `tag`.
    pub fn check(&self, tag: Option<CollectionTag>) -> StoreResult<()> {
        if self.objects.len() != 1 {
            return Err(StoreError::InvalidItem(format!(
                "Item contains {} components",
                self.objects.len()
            )));
        }
        let object = &self.objects[0];

        match tag {
            Some(CollectionTag::Calendar) => check_calendar_object(object),
            Some(CollectionTag::AddressBook) => match object.name.as_str() {
                "VLIST" => Ok(()),
                "VCARD" if object.uid.is_some() => Ok(()),
                "VCARD" => Err(StoreError::InvalidItem("VCARD object without UID".into())),
                other => Err(StoreError::InvalidItem(format!(
                    "Item type {other:?} not supported in \"VADDRESSBOOK\" collection"
                ))),
            },
            None => Err(StoreError::InvalidItem(format!(
                "Item type {:?} not supported in generic collection",
                object.name
            ))),
        }
    }

    pub fn meta(&self) -> ItemMeta {
        let Some(object) = self.objects.first() else {
            return ItemMeta {
                name: String::new(),
                component_name: String::new(),
                uid: None,
                time_range: (TIMESTAMP_MIN, TIMESTAMP_MAX),
            };
        };

        let component_name = if object.name == "VCALENDAR" {
            object
                .components
                .iter()
                .find(|c| c.name != "VTIMEZONE")
                .map(|c| c.name.clone())
                .unwrap_or_default()
        } else {
            String::new()
        };

        let uid = match object.name.as_str() {
            "VCALENDAR" => UID_COMPONENTS.iter().find_map(|kind| {
                object
                    .components
                    .iter()
                    .find(|c| c.name == *kind)
                    .and_then(|c| c.uid.clone())
            }),
            "VCARD" => object.uid.clone(),
            _ => None,
        };

        ItemMeta {
            name: object.name.clone(),
            time_range: time_range(object, &component_name),
            component_name,
            uid,
        }
    }
}

fn check_calendar_object(object: &TopLevel) -> StoreResult<()> {
    if object.name != "VCALENDAR" {
        return Err(StoreError::InvalidItem(format!(
            "Item type {:?} not supported in \"VCALENDAR\" collection",
            object.name
        )));
    }

    let mut component_name: Option<&str> = None;
    let mut object_uid: Option<&str> = None;

    for component in object.components.iter().filter(|c| c.name != "VTIMEZONE") {
        match component_name {
            None => component_name = Some(component.name.as_str()),
            Some(name) if name != component.name => {
                return Err(StoreError::InvalidItem(format!(
                    "Multiple component types in object: {name:?}, {:?}",
                    component.name
                )));
            }
            Some(_) => {}
        }
        if !UID_COMPONENTS.contains(&component.name.as_str()) {
            continue;
        }

        match (object_uid, component.uid.as_deref()) {
            (None, Some(uid)) => object_uid = Some(uid),
            (None, None) => {
                return Err(StoreError::InvalidItem(format!(
                    "{} component without UID in object",
                    component.name
                )));
            }
            (Some(_), None) => {
                return Err(StoreError::InvalidItem(format!(
                    "Multiple {} components without UID in object",
                    component.name
                )));
            }
            (Some(first), Some(uid)) if first != uid => {
                return Err(StoreError::InvalidItem(format!(
                    "Multiple {} components with different UIDs in object: {first:?}, {uid:?}",
                    component.name
                )));
            }
            (Some(_), Some(_)) => {}
        }
    }
    Ok(())
}

/// Split an unfolded content line into its upper-cased name and value.
fn split_line(line: &str) -> Option<(String, &str)> {
    let (head, value) = line.split_once(':')?;
    let name = head.split(';').next().unwrap_or(head);
    Some((name.trim().to_uppercase(), value))
}

fn scan_top_level(unfolded: &str) -> StoreResult<Vec<TopLevel>> {
    let mut objects: Vec<TopLevel> = Vec::new();
    let mut depth = 0usize;

    for line in unfolded.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let Some((name, value)) = split_line(line) else {
            return Err(StoreError::InvalidItem(format!("Invalid content line: {line:?}")));
        };

        match name.as_str() {
            "BEGIN" => {
                depth += 1;
                if depth == 1 {
                    objects.push(TopLevel {
                        name: value.trim().to_uppercase(),
                        uid: None,
                        components: Vec::new(),
                    });
                }
            }
            "END" => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    StoreError::InvalidItem(format!("Unexpected {line:?}"))
                })?;
            }
            _ if depth == 0 => {
                return Err(StoreError::InvalidItem(format!(
                    "Content line outside of a component: {line:?}"
                )));
            }
            "UID" if depth == 1 => {
                if let Some(object) = objects.last_mut() {
                    object.uid = Some(value.trim().to_string());
                }
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(StoreError::InvalidItem("Unterminated component".into()));
    }
    if objects.is_empty() {
        return Err(StoreError::InvalidItem("No component found".into()));
    }
    Ok(objects)
}

fn time_range(object: &TopLevel, component_name: &str) -> (i64, i64) {
    if component_name.is_empty() {
        return (TIMESTAMP_MIN, TIMESTAMP_MAX);
    }

    let mut range: Option<(i64, i64)> = None;
    for (start, end) in object
        .components
        .iter()
        .filter(|c| c.name == component_name)
        .filter_map(|c| c.range)
    {
        range = Some(match range {
            None => (start, end),
            Some((s, e)) => (s.min(start), e.max(end)),
        });
    }
    range.unwrap_or((TIMESTAMP_MIN, TIMESTAMP_MAX))
}

/// Timestamp of a date or date-time property, and whether it was a plain date.
fn timestamp_of(component: &Component, name: &str) -> Option<(i64, bool)> {
    let dpt = DatePerhapsTime::try_from(component.find_prop(name)?).ok()?;
    Some(match dpt {
        DatePerhapsTime::Date(d) => (d.and_time(NaiveTime::MIN).and_utc().timestamp(), true),
        DatePerhapsTime::DateTime(cal_dt) => match cal_dt {
            CalendarDateTime::Utc(dt) => (dt.timestamp(), false),
            CalendarDateTime::Floating(naive) => (naive.and_utc().timestamp(), false),
            CalendarDateTime::WithTimezone { date_time, tzid } => {
                let zoned = tzid
                    .parse::<chrono_tz::Tz>()
                    .ok()
                    .and_then(|tz| tz.from_local_datetime(&date_time).earliest())
                    .map(|dt| dt.timestamp());
                (zoned.unwrap_or_else(|| date_time.and_utc().timestamp()), false)
            }
        },
    })
}

fn duration_secs(component: &Component) -> Option<i64> {
    let value = component.find_prop("DURATION")?.val.to_string();
    let negative = value.starts_with('-');
    let duration = iso8601::duration(value.trim_start_matches(['-', '+'])).ok()?;
    let std_duration: std::time::Duration = duration.into();
    let secs = std_duration.as_secs() as i64;
    Some(if negative { -secs } else { secs })
}

fn component_range(component: &Component) -> Option<(i64, i64)> {
    let recurring = component.find_prop("RRULE").is_some() || component.find_prop("RDATE").is_some();
    let start = timestamp_of(component, "DTSTART");

    let (start, end) = match component.name.to_string().to_uppercase().as_str() {
        "VEVENT" => {
            let (start, is_date) = start?;
            let end = timestamp_of(component, "DTEND")
                .map(|(end, _)| end)
                .or_else(|| duration_secs(component).map(|d| start + d))
                .unwrap_or(if is_date { start + DAY_SECS } else { start });
            (start, end)
        }
        "VTODO" => {
            let due = timestamp_of(component, "DUE").map(|(due, _)| due);
            match (start, due) {
                (Some((start, _)), Some(due)) => (start, due),
                (Some((start, _)), None) => match duration_secs(component) {
                    Some(d) => (start, start + d),
                    None => (start, TIMESTAMP_MAX),
                },
                (None, Some(due)) => (TIMESTAMP_MIN, due),
                (None, None) => (TIMESTAMP_MIN, TIMESTAMP_MAX),
            }
        }
        "VJOURNAL" => {
            let (start, is_date) = start?;
            (start, if is_date { start + DAY_SECS } else { start })
        }
        _ => return None,
    };

    let end = if recurring { TIMESTAMP_MAX } else { end.max(start) };
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENT: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:-//davstore//test//EN\r\n\
BEGIN:VEVENT\r\n\
UID:event-1\r\n\
DTSTAMP:20250101T000000Z\r\n\
DTSTART:20250320T150000Z\r\n\
DTEND:20250320T160000Z\r\n\
SUMMARY:Standup\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    const CARD: &str = "BEGIN:VCARD\r\nVERSION:3.0\r\nUID:contact-1\r\nFN:Alice\r\nEND:VCARD\r\n";

    #[test]
    fn test_event_meta() {
        let parsed = parse_object(EVENT).unwrap();
        parsed.check(Some(CollectionTag::Calendar)).unwrap();

        let meta = parsed.meta();
        assert_eq!(meta.name, "VCALENDAR");
        assert_eq!(meta.component_name, "VEVENT");
        assert_eq!(meta.uid.as_deref(), Some("event-1"));
        assert_eq!(meta.time_range, (1_742_482_800, 1_742_486_400));
    }

    #[test]
    fn test_all_day_event_spans_one_day() {
        let ics = EVENT
            .replace("DTSTART:20250320T150000Z", "DTSTART;VALUE=DATE:20250320")
            .replace("DTEND:20250320T160000Z\r\n", "");
        let meta = parse_object(&ics).unwrap().meta();
        assert_eq!(meta.time_range, (1_742_428_800, 1_742_428_800 + DAY_SECS));
    }

    #[test]
    fn test_recurring_event_is_open_ended() {
        let ics = EVENT.replace("SUMMARY:Standup", "RRULE:FREQ=DAILY\r\nSUMMARY:Standup");
        let meta = parse_object(&ics).unwrap().meta();
        assert_eq!(meta.time_range.1, TIMESTAMP_MAX);
    }

    #[test]
    fn test_vcard_meta_and_check() {
        let parsed = parse_object(CARD).unwrap();
        parsed.check(Some(CollectionTag::AddressBook)).unwrap();

        let meta = parsed.meta();
        assert_eq!(meta.name, "VCARD");
        assert_eq!(meta.component_name, "");
        assert_eq!(meta.uid.as_deref(), Some("contact-1"));
        assert_eq!(meta.time_range, (TIMESTAMP_MIN, TIMESTAMP_MAX));
    }

    #[test]
    fn test_check_rejects_wrong_collection_type() {
        assert!(parse_object(CARD).unwrap().check(Some(CollectionTag::Calendar)).is_err());
        assert!(parse_object(EVENT).unwrap().check(Some(CollectionTag::AddressBook)).is_err());
        assert!(parse_object(EVENT).unwrap().check(None).is_err());
    }

    #[test]
    fn test_check_rejects_missing_uid() {
        let ics = EVENT.replace("UID:event-1\r\n", "");
        let err = parse_object(&ics).unwrap().check(Some(CollectionTag::Calendar)).unwrap_err();
        assert!(err.to_string().contains("without UID"));

        let card = CARD.replace("UID:contact-1\r\n", "");
        assert!(parse_object(&card).unwrap().check(Some(CollectionTag::AddressBook)).is_err());
    }

    #[test]
    fn test_check_rejects_mixed_uids() {
        let second = "BEGIN:VEVENT\r\nUID:event-2\r\nDTSTART:20250321T150000Z\r\nEND:VEVENT\r\n";
        let ics = EVENT.replace("END:VCALENDAR", &format!("{second}END:VCALENDAR"));
        let err = parse_object(&ics).unwrap().check(Some(CollectionTag::Calendar)).unwrap_err();
        assert!(err.to_string().contains("different UIDs"));
    }

    #[test]
    fn test_check_rejects_multiple_objects() {
        let two = format!("{CARD}{CARD}");
        let err = parse_object(&two).unwrap().check(Some(CollectionTag::AddressBook)).unwrap_err();
        assert!(err.to_string().contains("2 components"));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_object("not a calendar").is_err());
        assert!(parse_object("BEGIN:VCARD\r\nUID:x\r\n").is_err());
        assert!(parse_object("").is_err());
    }
}
