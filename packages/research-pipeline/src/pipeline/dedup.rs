//! Per-job draft de-duplication keys.

use std::collections::HashSet;

use crate::types::draft::Draft;

/// Lowercased title with non-word characters removed, capped at 100 chars.
pub fn title_key(title: &str) -> String {
    title
        .chars()
        .flat_map(|c| c.to_lowercase())
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .take(100)
        .collect()
}

/// Which key a duplicate collided on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateKey {
    Url,
    TitleDate,
    Content,
}

/// Keys of every draft inserted for a job.
#[derive(Debug, Default)]
pub struct DraftIndex {
    urls: HashSet<String>,
    title_dates: HashSet<(String, String)>,
    hashes: HashSet<String>,
}

impl DraftIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn duplicate_of(&self, draft: &Draft) -> Option<DuplicateKey> {
        if self.urls.contains(&draft.canonical_url) {
            return Some(DuplicateKey::Url);
        }
        if let Some(key) = title_date(draft) {
            if self.title_dates.contains(&key) {
                return Some(DuplicateKey::TitleDate);
            }
        }
        if !draft.content_hash.is_empty() && self.hashes.contains(&draft.content_hash) {
            return Some(DuplicateKey::Content);
        }
        None
    }

    pub fn insert(&mut self, draft: &Draft) {
        self.urls.insert(draft.canonical_url.clone());
        if let Some(key) = title_date(draft) {
            self.title_dates.insert(key);
        }
        if !draft.content_hash.is_empty() {
            self.hashes.insert(draft.content_hash.clone());
        }
    }
}

/// Drafts without a title key or date never collide on this key.
fn title_date(draft: &Draft) -> Option<(String, String)> {
    let date = draft.date.as_ref()?;
    if draft.title_key.is_empty() {
        return None;
    }
    Some((draft.title_key.clone(), date.clone()))
}
