use std::collections::HashSet;

use icalendar::{Calendar, Property};

use super::{Collection, CollectionTag, Props};
use crate::error::StoreResult;

const END_VCALENDAR: &str = "END:VCALENDAR\r\n";

fn text_property(key: &str, value: &str) -> Property {
    Property::new(key, value).add_parameter("VALUE", "TEXT").done()
}

/// `BEGIN:VCALENDAR` and the calendar properties, without the closing line.
fn calendar_header(meta: &Props) -> String {
    let mut calendar = Calendar::new();
    if let Some(name) = meta.get("D:displayname").filter(|v| !v.is_empty()) {
        calendar.append_property(text_property("X-WR-CALNAME", name));
    }
    if let Some(desc) = meta.get("C:calendar-description").filter(|v| !v.is_empty()) {
        calendar.append_property(text_property("X-WR-CALDESC", desc));
    }

    let rendered = calendar.to_string();
    match rendered.strip_suffix(END_VCALENDAR) {
        Some(header) => header.to_string(),
        None => rendered,
    }
}

/// Collects the inner components of several `VCALENDAR` objects, keeping
/// only the first `VTIMEZONE` for each TZID.
#[derive(Default)]
struct CalendarMerger {
    vtimezones: String,
    components: String,
    included_tzids: HashSet<Option<String>>,
}

impl CalendarMerger {
    fn add(&mut self, text: &str) {
        let mut depth = 0usize;
        let mut in_vcalendar = false;
        let mut vtimezone: Vec<&str> = Vec::new();
        let mut tzid: Option<String> = None;

        for line in text.lines() {
            if line.starts_with("BEGIN:") {
                depth += 1;
            }
            if depth == 1 && line == "BEGIN:VCALENDAR" {
                in_vcalendar = true;
            } else if in_vcalendar {
                if depth == 1 && line.starts_with("END:") {
                    in_vcalendar = false;
                }
                if depth == 2 && line == "BEGIN:VTIMEZONE" {
                    vtimezone.push(line);
                } else if !vtimezone.is_empty() {
                    vtimezone.push(line);
                    if depth == 2 && line.starts_with("TZID:") {
                        tzid = Some(line["TZID:".len()..].to_string());
                    } else if depth == 2 && line.starts_with("END:") {
                        if tzid.is_none() || !self.included_tzids.contains(&tzid) {
                            for line in vtimezone.drain(..) {
                                self.vtimezones.push_str(line);
                                self.vtimezones.push_str("\r\n");
                            }
                        }
                        vtimezone.clear();
                        self.included_tzids.insert(tzid.take());
                    }
                } else if depth >= 2 {
                    self.components.push_str(line);
                    self.components.push_str("\r\n");
                }
            }
            if line.starts_with("END:") {
                depth = depth.saturating_sub(1);
            }
        }
    }
}

impl Collection {
    /// The whole collection as a single object: one merged `VCALENDAR`, or
    /// all vCards concatenated. Empty for untyped collections.
    pub fn serialize(&self) -> StoreResult<String> {
        match self.tag()? {
            None => Ok(String::new()),
            Some(CollectionTag::AddressBook) => {
                let mut out = String::new();
                for item in self.get_all() {
                    out.push_str(item?.serialize());
                }
                Ok(out)
            }
            Some(CollectionTag::Calendar) => {
                let mut merger = CalendarMerger::default();
                for item in self.get_all() {
                    merger.add(item?.serialize());
                }

                let mut out = calendar_header(&self.get_meta()?);
                out.push_str(&merger.vtimezones);
                out.push_str(&merger.components);
                out.push_str(END_VCALENDAR);
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(uid: &str, tzid: &str) -> String {
        format!(
            "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:test\r\n\
             BEGIN:VTIMEZONE\r\nTZID:{tzid}\r\nBEGIN:STANDARD\r\nDTSTART:19701025T030000\r\n\
             TZOFFSETFROM:+0200\r\nTZOFFSETTO:+0100\r\nEND:STANDARD\r\nEND:VTIMEZONE\r\n\
             BEGIN:VEVENT\r\nUID:{uid}\r\nDTSTART;TZID={tzid}:20250320T150000\r\nEND:VEVENT\r\n\
             END:VCALENDAR\r\n"
        )
    }

    #[test]
    fn test_merge_deduplicates_timezones() {
        let mut merger = CalendarMerger::default();
        merger.add(&event("e1", "Europe/Berlin"));
        merger.add(&event("e2", "Europe/Berlin"));
        merger.add(&event("e3", "Europe/Paris"));

        assert_eq!(merger.vtimezones.matches("BEGIN:VTIMEZONE").count(), 2);
        assert_eq!(merger.components.matches("BEGIN:VEVENT").count(), 3);
        assert!(!merger.components.contains("PRODID"));
        assert!(merger.components.contains("BEGIN:VEVENT\r\nUID:e2\r\n"));
    }

    #[test]
    fn test_calendar_header_escapes_metadata() {
        let meta = Props::from([
            ("D:displayname".to_string(), "Work, Team".to_string()),
            ("C:calendar-description".to_string(), String::new()),
        ]);
        let header = calendar_header(&meta);

        assert!(header.starts_with("BEGIN:VCALENDAR\r\n"));
        assert!(header.contains("VERSION:2.0\r\n"));
        assert!(header.contains("X-WR-CALNAME;VALUE=TEXT:Work\\, Team\r\n"));
        assert!(!header.contains("X-WR-CALDESC"));
        assert!(!header.contains("END:VCALENDAR"));
    }
}
