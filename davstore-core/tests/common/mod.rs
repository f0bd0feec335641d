#![allow(dead_code)]

use std::path::Path;

use davstore_core::{Collection, Item, MultiFilesystem, Props, Storage, StorageConfig};

/// Storage rooted at `dir`, without fsync to keep tests fast.
pub fn open_storage(dir: &Path) -> MultiFilesystem {
    let mut config = StorageConfig::with_folder(dir);
    config.filesystem_fsync = false;
    MultiFilesystem::new(&config).unwrap()
}

pub fn open_storage_with(config: StorageConfig) -> MultiFilesystem {
    MultiFilesystem::new(&config).unwrap()
}

pub fn event(uid: &str, summary: &str) -> String {
    format!(
        "BEGIN:VCALENDAR\r\n\
         VERSION:2.0\r\n\
         PRODID:-//davstore//test//EN\r\n\
         BEGIN:VEVENT\r\n\
         UID:{uid}\r\n\
         DTSTAMP:20250101T000000Z\r\n\
         DTSTART:20250320T150000Z\r\n\
         DTEND:20250320T160000Z\r\n\
         SUMMARY:{summary}\r\n\
         END:VEVENT\r\n\
         END:VCALENDAR\r\n"
    )
}

pub fn card(uid: &str, name: &str) -> String {
    format!("BEGIN:VCARD\r\nVERSION:3.0\r\nUID:{uid}\r\nFN:{name}\r\nEND:VCARD\r\n")
}

pub fn calendar_props(displayname: &str) -> Props {
    Props::from([
        ("tag".to_string(), "VCALENDAR".to_string()),
        ("D:displayname".to_string(), displayname.to_string()),
    ])
}

pub fn addressbook_props() -> Props {
    Props::from([("tag".to_string(), "VADDRESSBOOK".to_string())])
}

/// An empty calendar at `path`.
pub fn calendar(storage: &MultiFilesystem, path: &str) -> Collection {
    storage
        .create_collection(path, None, Some(calendar_props("Calendar")))
        .unwrap()
}

pub fn put_event(collection: &Collection, href: &str, uid: &str) -> Item {
    let item = Item::new(collection.path(), event(uid, "Meeting"));
    collection.upload(href, &item).unwrap()
}
