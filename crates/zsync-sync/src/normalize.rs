//! Field normalization: maps Zotero items onto the fixed data-sheet schema.
//!
//! Everything here is pure except `resolve_url`, which may ask the library
//! source for an item's child attachments.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use zsync_core::{
    non_empty, Creator, ItemData, NormalizedRow, RawItem, Tag, TagOrigin, GOOGLE_BOOKS_LINK_TITLE,
    ITEM_TYPE_ATTACHMENT, ITEM_TYPE_NOTE,
};
use zsync_zotero::{LibrarySource, SourceError};

pub fn is_bibliographic(item: &RawItem) -> bool {
    !matches!(item.item_type(), ITEM_TYPE_ATTACHMENT | ITEM_TYPE_NOTE)
}

pub fn item_key(item: &RawItem) -> &str {
    if item.data.key.is_empty() {
        &item.key
    } else {
        &item.data.key
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUrl {
    pub url: String,
    pub looked_up: bool,
}

pub async fn resolve_url(
    item: &RawItem,
    source: &dyn LibrarySource,
) -> Result<ResolvedUrl, SourceError> {
    if let Some(url) = non_empty(&item.data.url) {
        return Ok(ResolvedUrl {
            url: url.to_string(),
            looked_up: false,
        });
    }
    let children = source.child_attachments(item_key(item)).await?;
    Ok(ResolvedUrl {
        url: pick_fallback_url(&children),
        looked_up: true,
    })
}

pub fn pick_fallback_url(children: &[RawItem]) -> String {
    children
        .iter()
        .filter(|child| child.is_attachment())
        .find(|child| child.data.title.as_deref() == Some(GOOGLE_BOOKS_LINK_TITLE))
        .and_then(|child| child.data.url.clone())
        .unwrap_or_default()
}

pub fn is_author_like(creator: &Creator) -> bool {
    matches!(creator.creator_type.as_str(), "author" | "contributor")
}

pub fn format_authors(creators: &[Creator]) -> String {
    creators
        .iter()
        .filter(|c| is_author_like(c))
        .map(|c| {
            let last = c.last_name.as_deref().or(c.name.as_deref()).unwrap_or("");
            let first = c.first_name.as_deref().unwrap_or("");
            format!("{last}, {first}")
        })
        .collect::<Vec<_>>()
        .join("; ")
}

pub fn resolve_publication(data: &ItemData) -> String {
    [
        &data.publication_title,
        &data.blog_title,
        &data.website_title,
        &data.publisher,
        &data.institution,
    ]
    .into_iter()
    .find_map(non_empty)
    .unwrap_or_default()
    .to_string()
}

pub fn combine_tags(tags: &[Tag]) -> String {
    let (automatic, manual): (Vec<&Tag>, Vec<&Tag>) = tags
        .iter()
        .partition(|t| t.origin() == TagOrigin::Automatic);
    automatic
        .into_iter()
        .chain(manual)
        .map(|t| t.tag.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%d.%m.%Y",
    "%B %d, %Y",
    "%B %d %Y",
    "%d %B %Y",
    "%d %B, %Y",
    "%A, %B %d, %Y",
    "%Y %B %d",
];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

const MONTHS: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

/// Year of a free-text date, or `None` when the text cannot be read as a date.
///
/// Structured formats are tried first. The fuzzy pass drops words that are
/// neither numbers nor month names ("Published", "Spring") and retries.
pub fn extract_year(date: &str) -> Option<i32> {
    let text = date.trim();
    if text.is_empty() {
        return None;
    }
    parse_structured(text).or_else(|| parse_fuzzy(text))
}

fn parse_structured(text: &str) -> Option<i32> {
    if let Some(year) = bare_year(text) {
        return Some(year);
    }
    let full_date = DATE_FORMATS
        .iter()
        .filter_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .find_map(|date| plausible_year(date.year()));
    if full_date.is_some() {
        return full_date;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return plausible_year(ts.naive_local().year());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, fmt) {
            return plausible_year(ts.year());
        }
    }
    // Month precision: "March 1998", "1998-03", "03/1998".
    [
        (format!("1 {text}"), "%d %B %Y"),
        (format!("1 {text}"), "%d %B, %Y"),
        (format!("{text}-01"), "%Y-%m-%d"),
        (format!("1/{text}"), "%d/%m/%Y"),
    ]
    .iter()
    .filter_map(|(candidate, fmt)| NaiveDate::parse_from_str(candidate, fmt).ok())
    .find_map(|date| plausible_year(date.year()))
}

fn parse_fuzzy(text: &str) -> Option<i32> {
    let kept: Vec<String> = text
        .split(|c: char| c.is_whitespace() || c == ',')
        .map(|token| token.trim_matches(|c: char| matches!(c, '.' | '(' | ')' | '[' | ']' | '?')))
        .filter(|token| !token.is_empty())
        .filter_map(date_token)
        .collect();
    if kept.is_empty() {
        return None;
    }

    let reduced = kept.join(" ");
    if reduced != text {
        if let Some(year) = parse_structured(&reduced) {
            return Some(year);
        }
    }

    // One four-digit number among day numbers and month names reads as the year.
    let mut years = kept.iter().filter_map(|t| bare_year(t));
    let year = years.next()?;
    if years.next().is_some() {
        return None;
    }
    let rest_is_dateish = kept.iter().all(|t| {
        bare_year(t).is_some()
            || month_index(t).is_some()
            || t.parse::<u32>().is_ok_and(|d| (1..=31).contains(&d))
    });
    rest_is_dateish.then_some(year)
}

/// Keeps numbers (ordinal suffixes stripped), month names and numeric dates.
fn date_token(token: &str) -> Option<String> {
    if month_index(token).is_some() {
        return Some(token.to_string());
    }
    let lower = token.to_ascii_lowercase();
    let digits = ["st", "nd", "rd", "th"]
        .iter()
        .find_map(|suffix| lower.strip_suffix(suffix))
        .filter(|prefix| !prefix.is_empty() && prefix.len() <= 2)
        .unwrap_or(&lower);
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        return Some(digits.to_string());
    }
    let numeric_date = token.chars().any(|c| c.is_ascii_digit())
        && token.chars().all(|c| c.is_ascii_digit() || c == '-' || c == '/');
    numeric_date.then(|| token.to_string())
}

fn month_index(token: &str) -> Option<usize> {
    let lower = token.to_ascii_lowercase();
    if lower.len() < 3 {
        return None;
    }
    MONTHS
        .iter()
        .position(|m| *m == lower || (lower.len() <= 4 && m.starts_with(lower.as_str())))
}

fn bare_year(text: &str) -> Option<i32> {
    if text.len() == 4 && text.chars().all(|c| c.is_ascii_digit()) {
        text.parse().ok().and_then(plausible_year)
    } else {
        None
    }
}

// Format matching is lenient about digit counts ("March 2011" also reads as
// day 20 of year 11), so only four-digit years are accepted.
fn plausible_year(year: i32) -> Option<i32> {
    (1000..=9999).contains(&year).then_some(year)
}

pub fn sort_key(authors: &str) -> String {
    authors
        .split(';')
        .next()
        .unwrap_or("")
        .split(',')
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}

pub fn sort_rows(rows: &mut [NormalizedRow]) {
    rows.sort_by_cached_key(|row| sort_key(&row.authors));
}

pub fn build_row(item: &RawItem, url: String) -> NormalizedRow {
    let data = &item.data;
    NormalizedRow {
        key: item_key(item).to_string(),
        authors: format_authors(&data.creators),
        year: data.date.as_deref().and_then(extract_year),
        title: data.title.clone().unwrap_or_default(),
        item_type: data.item_type.clone(),
        abstract_note: data.abstract_note.clone().unwrap_or_default(),
        publication: resolve_publication(data),
        tags: combine_tags(&data.tags),
        url,
    }
}
