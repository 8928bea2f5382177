//! Listing page parsing and item normalization
//!
//! Listing endpoints answer with
//! `{"results": [...], "has_more": bool, "next_offset": int|null}`. Result
//! objects vary between endpoints, so a [`FieldMap`] says where each
//! normalized field lives.

use crate::config::FieldMap;
use crate::queue::ItemMetadata;
use crate::requester::RequestError;
use serde_json::Value;

/// The `next_offset` of a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextOffset {
    /// Missing or null
    Absent,
    Offset(u64),
    /// Present but not a non-negative integer
    Invalid(String),
}

/// One page of a listing
#[derive(Debug, Clone)]
pub struct FeedPage {
    pub results: Vec<Value>,
    pub has_more: bool,
    pub next_offset: NextOffset,
}

impl FeedPage {
    /// Parses a listing response body
    ///
    /// A missing `has_more` is read as `false` so a malformed response can
    /// only end pagination early, never loop it.
    pub fn from_json(body: &Value) -> Result<Self, RequestError> {
        let results = body
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| {
                RequestError::Decode("listing response has no results array".to_string())
            })?;

        let has_more = body
            .get("has_more")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let next_offset = match body.get("next_offset") {
            None | Some(Value::Null) => NextOffset::Absent,
            Some(value) => match as_u64(value) {
                Some(offset) => NextOffset::Offset(offset),
                None => NextOffset::Invalid(value.to_string()),
            },
        };

        Ok(Self {
            results,
            has_more,
            next_offset,
        })
    }
}

/// A listing result reduced to what the queue stores
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedItem {
    pub key: String,
    pub ts: i64,
    pub metadata: ItemMetadata,
}

/// Extracts `{key, title, author, url, ts}` from a result object
///
/// # Arguments
///
/// * `raw` - One element of the page's `results`
/// * `fields` - Where each field lives
/// * `fallback_ts` - Used when the result has no usable timestamp
///
/// # Returns
///
/// `None` when the result has no key; such results cannot be deduplicated
/// and are skipped
pub fn normalize_item(raw: &Value, fields: &FieldMap, fallback_ts: i64) -> Option<NormalizedItem> {
    let key = lookup(raw, &fields.key).and_then(scalar_string)?;
    if key.is_empty() {
        return None;
    }

    let ts = lookup(raw, &fields.ts)
        .and_then(|v| as_u64(v).and_then(|n| i64::try_from(n).ok()).or_else(|| v.as_i64()))
        .unwrap_or(fallback_ts);

    Some(NormalizedItem {
        key,
        ts,
        metadata: ItemMetadata {
            title: lookup(raw, &fields.title).and_then(scalar_string),
            author: lookup(raw, &fields.author).and_then(scalar_string),
            url: lookup(raw, &fields.url).and_then(scalar_string),
        },
    })
}

/// Follows a dotted path such as `author.username`
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    path.split('.').try_fold(value, |v, segment| v.get(segment))
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Reads integers that some endpoints send as strings
fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
