//! Cursor-based pagination over ordered table iterators.
//!
//! Continuation tokens are opaque to callers: `<create-index>.<id>` in the
//! canonical (create index, id) order, or a bare `<id>` once a prefix has
//! narrowed the scan to id order. A cursor whose target was deleted resolves
//! by skipping forward to the next live entry.

use core::fmt;

use smol_str::SmolStr;

use crate::error::AclError;

/// Position of one entry in a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum SortKey {
    /// Canonical order: (create index, id).
    CreateIndex(u64, SmolStr),
    /// Prefix-narrowed order: id only.
    Id(SmolStr),
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortKey::CreateIndex(index, id) => write!(f, "{index}.{id}"),
            SortKey::Id(id) => write!(f, "{id}"),
        }
    }
}

impl SortKey {
    /// Parses a continuation token in the same shape this listing emits.
    pub fn parse(token: &str, canonical: bool) -> Result<SortKey, AclError> {
        if !canonical {
            return Ok(SortKey::Id(SmolStr::new(token)));
        }
        let (index, id) = token
            .split_once('.')
            .ok_or_else(|| AclError::validation(format!("invalid continuation token {token:?}")))?;
        let index: u64 = index
            .parse()
            .map_err(|_| AclError::validation(format!("invalid continuation token {token:?}")))?;
        Ok(SortKey::CreateIndex(index, SmolStr::new(id)))
    }
}

#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

/// Cuts one page out of an ordered iterator.
///
/// The cursor is an inclusive lower bound (upper bound when `reverse`), so a
/// reply's `next_token` is simply the key of the first element that did not
/// fit. `per_page` of `None` disables paging.
pub fn paginate<T>(
    iter: impl Iterator<Item = (SortKey, T)>,
    cursor: Option<&SortKey>,
    per_page: Option<u32>,
    reverse: bool,
) -> Page<T> {
    let mut items = Vec::new();
    let mut next_token = None;

    let in_range = |key: &SortKey| match cursor {
        None => true,
        Some(cursor) if reverse => key <= cursor,
        Some(cursor) => key >= cursor,
    };

    let limit = per_page.map(|count| count as usize);

    for (key, item) in iter {
        if !in_range(&key) {
            continue;
        }
        if let Some(limit) = limit {
            if items.len() == limit {
                next_token = Some(key.to_string());
                break;
            }
        }
        items.push(item);
    }

    Page { items, next_token }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical(entries: &[(u64, &str)]) -> Vec<(SortKey, String)> {
        entries
            .iter()
            .map(|&(index, id)| (SortKey::CreateIndex(index, SmolStr::new(id)), id.to_owned()))
            .collect()
    }

    #[test]
    fn pages_cover_everything_exactly_once() {
        let entries = canonical(&[(1, "a"), (5, "b"), (5, "c"), (9, "d")]);

        let mut seen = Vec::new();
        let mut cursor: Option<SortKey> = None;
        loop {
            let page = paginate(entries.iter().cloned(), cursor.as_ref(), Some(1), false);
            seen.extend(page.items);
            match page.next_token {
                Some(token) => cursor = Some(SortKey::parse(&token, true).expect("token is well-formed")),
                None => break,
            }
        }

        assert_eq!(seen, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn duplicate_create_index_is_disambiguated_by_id() {
        let entries = canonical(&[(1008, "id1"), (1008, "id2"), (1009, "id3")]);

        let cursor = SortKey::parse("1008.id2", true).expect("well-formed");
        let page = paginate(entries.into_iter(), Some(&cursor), Some(1), false);
        assert_eq!(page.items, vec!["id2"]);
        assert_eq!(page.next_token.as_deref(), Some("1009.id3"));
    }

    #[test]
    fn deleted_cursor_target_skips_forward() {
        let entries = canonical(&[(1, "a"), (9, "d")]);

        let cursor = SortKey::parse("5.b", true).expect("well-formed");
        let page = paginate(entries.into_iter(), Some(&cursor), Some(10), false);
        assert_eq!(page.items, vec!["d"]);
        assert!(page.next_token.is_none());
    }

    #[test]
    fn reverse_iterates_descending() {
        let mut entries = canonical(&[(1, "a"), (5, "b"), (9, "d")]);
        entries.reverse();

        let cursor = SortKey::parse("5.b", true).expect("well-formed");
        let page = paginate(entries.into_iter(), Some(&cursor), Some(2), true);
        assert_eq!(page.items, vec!["b", "a"]);
        assert!(page.next_token.is_none());
    }

    #[test]
    fn bad_tokens_are_rejected()  {
        assert!(SortKey::parse("no-dot", true).is_err());
        assert!(SortKey::parse("abc.def", true).is_err());
        assert!(SortKey::parse("plain-id", false).is_ok());
    }
}
