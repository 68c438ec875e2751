//! # Pagination
//!
//! Cursor pagination is the default for list endpoints: an opaque
//! base64url-encoded `(id, created_at)` tuple taken from the last item of
//! the previous page. Offset (page/limit) pagination survives only where a
//! cache key shape demands it (tasks) or a client passes the explicit
//! legacy flag.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Default page size for cursor-paginated lists.
pub const DEFAULT_LIMIT: u32 = 20;
/// Maximum page size.
pub const MAX_LIMIT: u32 = 100;

/// An opaque list position: the sort tuple of the last returned item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    /// Item id (tie-break)
    pub id: Uuid,
    /// Item creation time (primary sort key)
    pub created_at: DateTime<Utc>,
}

impl Cursor {
    /// Encode to the opaque wire form.
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}:{}", self.id, self.created_at.timestamp_micros()))
    }

    /// Decode the opaque wire form.
    pub fn decode(raw: &str) -> AppResult<Self> {
        let invalid = || AppError::validation("Malformed pagination cursor");
        let bytes = URL_SAFE_NO_PAD.decode(raw).map_err(|_| invalid())?;
        let text = String::from_utf8(bytes).map_err(|_| invalid())?;
        let (id, micros) = text.split_once(':').ok_or_else(invalid)?;

        let id = id.parse().map_err(|_| invalid())?;
        let micros: i64 = micros.parse().map_err(|_| invalid())?;
        let created_at = Utc
            .timestamp_micros(micros)
            .single()
            .ok_or_else(invalid)?;

        Ok(Self { id, created_at })
    }
}

/// Query parameters accepted by cursor-paginated list endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    /// Opaque cursor from the previous page
    pub cursor: Option<String>,
    /// Page size (clamped to [`MAX_LIMIT`])
    pub limit: Option<u32>,
    /// Explicit opt-in to offset pagination
    pub legacy_offset: Option<bool>,
    /// Offset page number; only honored with `legacy_offset=true`
    pub page: Option<u32>,
}

impl PageQuery {
    /// The effective page size.
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    /// Decoded cursor, if present.
    pub fn decoded_cursor(&self) -> AppResult<Option<Cursor>> {
        self.cursor.as_deref().map(Cursor::decode).transpose()
    }

    /// Whether the caller explicitly requested offset pagination.
    pub fn wants_legacy_offset(&self) -> bool {
        self.legacy_offset.unwrap_or(false)
    }
}

/// Slice a list (sorted descending by `(created_at, id)`) at a cursor.
///
/// Returns the page and the cursor for the next one, if more items remain.
pub fn paginate<T, K>(
    items: &[T],
    cursor: Option<Cursor>,
    limit: u32,
    sort_key: K,
) -> (Vec<T>, Option<Cursor>)
where
    T: Clone,
    K: Fn(&T) -> (DateTime<Utc>, Uuid),
{
    let start = match cursor {
        None => 0,
        Some(cursor) => items
            .iter()
            .position(|item| {
                let (created_at, id) = sort_key(item);
                (created_at, id) < (cursor.created_at, cursor.id)
            })
            .unwrap_or(items.len()),
    };

    let page: Vec<T> = items[start..].iter().take(limit as usize).cloned().collect();
    let next = if start + page.len() < items.len() {
        page.last().map(|item| {
            let (created_at, id) = sort_key(item);
            Cursor { id, created_at }
        })
    } else {
        None
    };

    (page, next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_cursor_round_trip() {
        let cursor = Cursor {
            id: Uuid::new_v4(),
            created_at: Utc.timestamp_micros(1_700_000_000_123_456).single().unwrap(),
        };
        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn test_malformed_cursor_rejected() {
        for raw in ["", "!!!", "bm90LWEtY3Vyc29y", "OnRydWU"] {
            let err = Cursor::decode(raw).unwrap_err();
            assert_eq!(err.kind.code(), "VALIDATION_ERROR");
        }
    }

    #[test]
    fn test_limit_clamped() {
        let query = PageQuery { limit: Some(10_000), ..Default::default() };
        assert_eq!(query.effective_limit(), MAX_LIMIT);
        assert_eq!(PageQuery::default().effective_limit(), DEFAULT_LIMIT);
    }

    #[test]
    fn test_paginate_walks_whole_list() {
        let base = Utc::now();
        // Descending by (created_at, id), like the list queries.
        let mut items: Vec<(DateTime<Utc>, Uuid)> = (0..7)
            .map(|i| (base - Duration::seconds(i), Uuid::new_v4()))
            .collect();
        items.sort_by(|a, b| b.cmp(a));

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let (page, next) = paginate(&items, cursor, 3, |item| (item.0, item.1));
            seen.extend(page);
            match next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        assert_eq!(seen, items);
    }

    #[test]
    fn test_paginate_empty() {
        let items: Vec<(DateTime<Utc>, Uuid)> = vec![];
        let (page, next) = paginate(&items, None, 10, |item| (item.0, item.1));
        assert!(page.is_empty());
        assert!(next.is_none());
    }
}
