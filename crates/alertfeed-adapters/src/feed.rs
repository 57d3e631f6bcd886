//! Tolerant RSS / Atom / CAP item extraction plus JSON item discovery.
//!
//! This is deliberately not a schema validator: anything that looks like an
//! `<item>`, `<entry>` or `<alert>` yields a record, and malformed input keeps
//! whatever was recovered before the parser gave up.

use std::collections::BTreeMap;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, warn};

use crate::normalize::extract_path;
use crate::text::{collapse_whitespace, strip_html};

const ITEM_ELEMENTS: [&str; 3] = ["item", "entry", "alert"];

const TITLE_KEYS: [&str; 2] = ["title", "headline"];
const DESCRIPTION_KEYS: [&str; 4] = ["description", "summary", "content", "encoded"];
const PUBLISHED_KEYS: [&str; 6] = ["pubDate", "published", "updated", "date", "sent", "effective"];
const GUID_KEYS: [&str; 3] = ["guid", "id", "identifier"];
const CATEGORY_KEYS: [&str; 2] = ["category", "event"];

/// One generic feed record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    pub published: Option<String>,
    pub guid: Option<String>,
    pub category: Option<String>,
    /// Every text-bearing element seen inside the item, first occurrence wins.
    pub fields: BTreeMap<String, String>,
}

impl FeedItem {
    fn first_field(&self, keys: &[&str]) -> Option<String> {
        keys.iter()
            .filter_map(|k| self.fields.get(*k))
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
            .map(ToString::to_string)
    }

    fn has_content(&self) -> bool {
        self.title.as_deref().is_some_and(|t| !t.is_empty())
            || self.description.as_deref().is_some_and(|d| !d.is_empty())
    }

    /// Flatten into a JSON object: named fields first, remaining leaves after.
    pub fn to_json(&self) -> JsonValue {
        let mut map = Map::new();
        for (key, value) in &self.fields {
            map.insert(key.clone(), JsonValue::String(value.clone()));
        }
        let named = [
            ("title", &self.title),
            ("description", &self.description),
            ("link", &self.link),
            ("published", &self.published),
            ("guid", &self.guid),
            ("category", &self.category),
        ];
        for (key, value) in named {
            if let Some(value) = value {
                map.insert(key.to_string(), JsonValue::String(value.clone()));
            }
        }
        JsonValue::Object(map)
    }
}

#[derive(Debug)]
struct ItemBuilder {
    container: String,
    stack: Vec<(String, String)>,
    fields: BTreeMap<String, String>,
    link_href: Option<String>,
    link_preferred: bool,
    category_term: Option<String>,
}

impl ItemBuilder {
    fn new(container: String) -> Self {
        Self {
            container,
            stack: Vec::new(),
            fields: BTreeMap::new(),
            link_href: None,
            link_preferred: false,
            category_term: None,
        }
    }

    fn attributes(&mut self, name: &str, element: &BytesStart<'_>) {
        match name {
            "link" => {
                let mut href = None;
                let mut rel = None;
                for attr in element.attributes().flatten() {
                    let value = attr
                        .unescape_value()
                        .map(|v| v.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
                    match attr.key.local_name().as_ref() {
                        b"href" => href = Some(value),
                        b"rel" => rel = Some(value),
                        _ => {}
                    }
                }
                let preferred = rel.as_deref().map_or(true, |r| r == "alternate");
                if let Some(href) = href.filter(|h| !h.trim().is_empty()) {
                    if self.link_href.is_none() || (preferred && !self.link_preferred) {
                        self.link_href = Some(href.trim().to_string());
                        self.link_preferred = preferred;
                    }
                }
            }
            "category" => {
                if self.category_term.is_none() {
                    self.category_term = element
                        .attributes()
                        .flatten()
                        .find(|a| a.key.local_name().as_ref() == b"term")
                        .and_then(|a| a.unescape_value().ok().map(|v| v.trim().to_string()))
                        .filter(|v| !v.is_empty());
                }
            }
            _ => {}
        }
    }

    fn open(&mut self, name: String, element: &BytesStart<'_>) {
        self.attributes(&name, element);
        self.stack.push((name, String::new()));
    }

    fn empty(&mut self, name: &str, element: &BytesStart<'_>) {
        self.attributes(name, element);
    }

    fn text(&mut self, text: &str) {
        for (_, buffer) in &mut self.stack {
            if !buffer.is_empty() {
                buffer.push(' ');
            }
            buffer.push_str(text);
        }
    }

    fn store(&mut self, name: String, text: String) {
        let text = text.trim();
        if !text.is_empty() {
            self.fields.entry(name).or_insert_with(|| text.to_string());
        }
    }

    /// Returns true once the item element itself has been closed.
    fn close(&mut self, name: &str) -> bool {
        match self.stack.iter().rposition(|(n, _)| n == name) {
            Some(pos) => {
                while self.stack.len() > pos {
                    if let Some((n, text)) = self.stack.pop() {
                        self.store(n, text);
                    }
                }
                false
            }
            None => name == self.container,
        }
    }

    fn finish(mut self) -> Option<FeedItem> {
        while let Some((n, text)) = self.stack.pop() {
            self.store(n, text);
        }
        let mut item = FeedItem {
            fields: self.fields,
            ..FeedItem::default()
        };
        item.title = item.first_field(&TITLE_KEYS).map(|t| strip_html(&t));
        item.description = item.first_field(&DESCRIPTION_KEYS).map(|d| strip_html(&d));
        item.link = self.link_href.or_else(|| item.first_field(&["link"]));
        item.published = item.first_field(&PUBLISHED_KEYS);
        item.guid = item.first_field(&GUID_KEYS);
        item.category = self
            .category_term
            .or_else(|| item.first_field(&CATEGORY_KEYS))
            .map(|c| collapse_whitespace(&c));
        item.has_content().then_some(item)
    }
}

fn local_name(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.local_name().as_ref()).into_owned()
}

/// Extract items from RSS 2.0, Atom, or CAP-shaped XML.
///
/// Never fails: unrecognized documents produce an empty list, and a parse
/// error mid-stream keeps the items completed before it.
pub fn parse_feed(xml: &str) -> Vec<FeedItem> {
    let mut reader = Reader::from_str(xml);
    let config = reader.config_mut();
    config.trim_text(true);
    config.check_end_names = false;

    let mut items = Vec::new();
    let mut current: Option<ItemBuilder> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => {
                let name = local_name(&element);
                match current.as_mut() {
                    Some(builder) => builder.open(name, &element),
                    None if ITEM_ELEMENTS.contains(&name.as_str()) => {
                        current = Some(ItemBuilder::new(name));
                    }
                    None => {}
                }
            }
            Ok(Event::Empty(element)) => {
                if let Some(builder) = current.as_mut() {
                    builder.empty(&local_name(&element), &element);
                }
            }
            Ok(Event::Text(text)) => {
                if let Some(builder) = current.as_mut() {
                    let value = text
                        .unescape()
                        .map(|v| v.into_owned())
                        .unwrap_or_else(|_| String::from_utf8_lossy(&text).into_owned());
                    builder.text(&value);
                }
            }
            Ok(Event::CData(data)) => {
                if let Some(builder) = current.as_mut() {
                    builder.text(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Ok(Event::End(element)) => {
                let name = String::from_utf8_lossy(element.local_name().as_ref()).into_owned();
                let closed = current.as_mut().is_some_and(|b| b.close(&name));
                if closed {
                    if let Some(item) = current.take().and_then(ItemBuilder::finish) {
                        items.push(item);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                warn!(
                    position = reader.buffer_position(),
                    error = %err,
                    recovered = items.len(),
                    "malformed feed xml; keeping items parsed so far"
                );
                break;
            }
            Ok(_) => {}
        }
    }

    debug!(items = items.len(), "parsed xml feed");
    items
}

/// Locate the item array of a JSON body.
///
/// Recognizes a bare array, `{items: [...]}`, `{entries: [...]}`, a GeoJSON
/// `FeatureCollection`, a single `Feature`, or an explicit `items_path`.
pub fn json_items(body: &JsonValue, items_path: Option<&str>) -> Vec<JsonValue> {
    if let Some(path) = items_path {
        return match extract_path(body, path) {
            Some(JsonValue::Array(items)) => items.clone(),
            Some(other @ JsonValue::Object(_)) => vec![other.clone()],
            _ => Vec::new(),
        };
    }

    match body {
        JsonValue::Array(items) => items.clone(),
        JsonValue::Object(map) => {
            for key in ["items", "entries", "features", "alerts", "data"] {
                if let Some(JsonValue::Array(items)) = map.get(key) {
                    return items.clone();
                }
            }
            if map.get("type").and_then(JsonValue::as_str) == Some("Feature") {
                return vec![body.clone()];
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}
