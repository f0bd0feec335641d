//! Terminal rendering for storage nodes.

use chrono::Local;
use davstore_core::{Collection, Item, Node};
use owo_colors::OwoColorize;
use serde_json::json;

pub trait Render {
    fn render(&self) -> String;
}

impl Render for Collection {
    fn render(&self) -> String {
        let tag = match self.tag() {
            Ok(Some(tag)) => tag.to_string(),
            Ok(None) => String::new(),
            Err(e) => e.to_string().red().to_string(),
        };
        let etag = self.etag().unwrap_or_else(|e| e.to_string());
        format!("📁 {} {} {}", self.bold(), tag.cyan(), etag.dimmed())
    }
}

impl Render for Item {
    fn render(&self) -> String {
        let href = self.href().unwrap_or_default();
        let uid = match self.uid() {
            Ok(uid) => uid.unwrap_or_default().to_string(),
            Err(e) => e.to_string().red().to_string(),
        };
        let modified = self
            .last_modified()
            .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        format!(
            "   {} {} {} {}",
            href.green(),
            uid,
            self.etag().dimmed(),
            modified.dimmed()
        )
    }
}

impl Render for Node {
    fn render(&self) -> String {
        match self {
            Node::Collection(collection) => collection.render(),
            Node::Item(item) => item.render(),
        }
    }
}

/// A node as a JSON object.
pub fn to_json(node: &Node) -> serde_json::Value {
    match node {
        Node::Collection(collection) => json!({
            "type": "collection",
            "path": collection.to_string(),
            "tag": collection.tag().ok().flatten().map(|tag| tag.to_string()),
            "etag": collection.etag().ok(),
            "last_modified": collection.last_modified().ok(),
        }),
        Node::Item(item) => json!({
            "type": "item",
            "collection": item.collection_path(),
            "href": item.href(),
            "uid": item.uid().ok().flatten(),
            "etag": item.etag(),
            "last_modified": item.last_modified().map(|t| t.to_rfc3339()),
        }),
    }
}
