//! Core domain model for zsync: the Zotero wire records and the tabular rows they map onto.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as JsonValue};

pub const CRATE_NAME: &str = "zsync-core";

pub const DATA_SHEET: &str = "ZoteroData";
/// User-owned annotation sheet. Created once, never written by a sync.
pub const ANNOTATION_SHEET: &str = "Literature";

pub const COL_KEY: &str = "Zotero Key";
pub const COL_AUTHORS: &str = "Author(s)";
pub const COL_YEAR: &str = "Year";
pub const COL_TITLE: &str = "Title";
pub const COL_TYPE: &str = "Type";
pub const COL_THEME: &str = "Theme";
pub const COL_ABSTRACT: &str = "Abstract";
pub const COL_PUBLICATION: &str = "Publication/Publisher";
pub const COL_TAGS: &str = "Tags";
pub const COL_URL: &str = "URL";
pub const COL_NOTES: &str = "Notes";

pub const DATA_COLUMNS: [&str; 11] = [
    COL_KEY,
    COL_AUTHORS,
    COL_YEAR,
    COL_TITLE,
    COL_TYPE,
    COL_THEME,
    COL_ABSTRACT,
    COL_PUBLICATION,
    COL_TAGS,
    COL_URL,
    COL_NOTES,
];

pub const ANNOTATION_COLUMNS: [&str; 3] = [COL_KEY, COL_THEME, COL_NOTES];

pub const ITEM_TYPE_ATTACHMENT: &str = "attachment";
pub const ITEM_TYPE_NOTE: &str = "note";

/// Title of the child attachment Zotero's Google Books translator creates.
pub const GOOGLE_BOOKS_LINK_TITLE: &str = "Google Books Link";

/// One item as returned by the Zotero Web API (`format=json`).
///
/// Envelope fields other than `key` and `data` (`version`, `library`, `links`,
/// `meta`) are kept in `extra`, as are the unmodelled `data` fields, so a
/// dumped library round-trips without loss.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawItem {
    pub key: String,
    pub data: ItemData,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl RawItem {
    pub fn item_type(&self) -> &str {
        &self.data.item_type
    }

    pub fn is_attachment(&self) -> bool {
        self.data.item_type == ITEM_TYPE_ATTACHMENT
    }
}

/// The nested `data` mapping of a Zotero item. Only the fields the sync reads
/// are modelled.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemData {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub item_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_item: Option<String>,
    #[serde(default)]
    pub creators: Vec<Creator>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Free text. Non-string JSON values deserialize to `None`.
    #[serde(
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abstract_note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blog_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<JsonValue>::deserialize(deserializer)? {
        Some(JsonValue::String(text)) => Some(text),
        _ => None,
    })
}

pub fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Creator {
    #[serde(default)]
    pub creator_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// Single-field form Zotero uses for institutional creators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Creator {
    pub fn new(creator_type: &str, last_name: &str, first_name: &str) -> Self {
        Self {
            creator_type: creator_type.to_string(),
            last_name: Some(last_name.to_string()),
            first_name: Some(first_name.to_string()),
            name: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagOrigin {
    Automatic,
    Manual,
}

/// Zotero tag. `type` is `1` for automatic tags and `0` or absent for manual ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub tag: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<i64>,
}

impl Tag {
    pub fn automatic(text: &str) -> Self {
        Self {
            tag: text.to_string(),
            kind: Some(1),
        }
    }

    pub fn manual(text: &str) -> Self {
        Self {
            tag: text.to_string(),
            kind: Some(0),
        }
    }

    /// Anything other than an explicit `1` is a manual tag.
    pub fn origin(&self) -> TagOrigin {
        match self.kind {
            Some(1) => TagOrigin::Automatic,
            _ => TagOrigin::Manual,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NormalizedRow {
    pub key: String,
    pub authors: String,
    pub year: Option<i32>,
    pub title: String,
    pub item_type: String,
    pub abstract_note: String,
    pub publication: String,
    pub tags: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RowAnnotation {
    pub theme: String,
    pub notes: String,
}

impl RowAnnotation {
    pub fn is_blank(&self) -> bool {
        self.theme.trim().is_empty() && self.notes.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AnnotationRow {
    pub key: String,
    pub theme: String,
    pub notes: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_item_deserializes_with_optional_fields() {
        let raw = r#"{
            "key": "ABCD2345",
            "version": 12,
            "data": {
                "key": "ABCD2345",
                "itemType": "journalArticle",
                "title": "On Things",
                "creators": [{"creatorType": "author", "lastName": "Smith", "firstName": "Jane"}],
                "tags": [{"tag": "economics", "type": 1}, {"tag": "to-read"}],
                "date": "2001-04-05",
                "publicationTitle": "Journal of Things",
                "extra": "PMID: 1",
                "language": "en"
            }
        }"#;
        let item: RawItem = serde_json::from_str(raw).unwrap();
        assert_eq!(item.item_type(), "journalArticle");
        assert_eq!(item.data.creators[0].last_name.as_deref(), Some("Smith"));
        assert_eq!(item.data.tags[0].origin(), TagOrigin::Automatic);
        assert_eq!(item.data.tags[1].origin(), TagOrigin::Manual);
        assert_eq!(item.data.url, None);
        assert_eq!(
            item.data.extra.get("language").and_then(|v| v.as_str()),
            Some("en")
        );
    }

    #[test]
    fn non_string_date_is_treated_as_missing() {
        let raw = r#"{"key": "K1", "data": {"itemType": "book", "date": 1998}}"#;
        let item: RawItem = serde_json::from_str(raw).unwrap();
        assert_eq!(item.data.date, None);
    }

    #[test]
    fn non_empty_ignores_blank_values() {
        assert_eq!(non_empty(&Some("  ".to_string())), None);
        assert_eq!(non_empty(&None), None);
        assert_eq!(non_empty(&Some("x".to_string())), Some("x"));
    }

    #[test]
    fn dumped_item_keeps_unmodelled_fields() {
        let raw = r#"{"key": "K2", "data": {"key": "K2", "itemType": "book", "ISBN": "978-0"}}"#;
        let item: RawItem = serde_json::from_str(raw).unwrap();
        let dumped = serde_json::to_value(&item).unwrap();
        assert_eq!(dumped["data"]["ISBN"], "978-0");
        assert!(dumped["data"].get("url").is_none());
    }

    #[test]
    fn dumped_item_keeps_envelope_fields() {
        let raw = serde_json::json!({
            "key": "K3",
            "version": 41,
            "library": {"type": "group", "id": 4242, "name": "Reading group"},
            "links": {"self": {"href": "https://api.zotero.org/groups/4242/items/K3"}},
            "meta": {"creatorSummary": "Smith", "numChildren": 2},
            "data": {
                "key": "K3",
                "version": 41,
                "itemType": "book",
                "title": "T",
                "creators": [],
                "tags": []
            }
        });
        let item: RawItem = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(item.extra["version"], 41);
        assert_eq!(serde_json::to_value(&item).unwrap(), raw);
    }
}
