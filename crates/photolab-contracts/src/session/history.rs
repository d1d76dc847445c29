use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::view::ActiveView;
use crate::images::{same_image, SharedImage};

pub const DEFAULT_HISTORY_CAPACITY: usize = 8;

/// One completed enhancement. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct EnhancementResult {
    id: String,
    original: SharedImage,
    enhanced: SharedImage,
    prompt_used: String,
    created_at: DateTime<Utc>,
}

impl EnhancementResult {
    /// Ids are UUID v7: time-ordered, and unique even within one millisecond.
    pub fn new(
        original: SharedImage,
        enhanced: SharedImage,
        prompt_used: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            original,
            enhanced,
            prompt_used: prompt_used.into(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn original(&self) -> &SharedImage {
        &self.original
    }

    pub fn enhanced(&self) -> &SharedImage {
        &self.enhanced
    }

    pub fn prompt_used(&self) -> &str {
        &self.prompt_used
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Most-recent-first list of results, bounded by `capacity`.
#[derive(Debug, Clone)]
pub struct SessionHistory {
    entries: Vec<EnhancementResult>,
    capacity: usize,
}

impl Default for SessionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl SessionHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[EnhancementResult] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&EnhancementResult> {
        self.entries.get(index)
    }

    pub fn find(&self, id: &str) -> Option<&EnhancementResult> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// Inserts at the head and drops whatever falls past the bound.
    pub fn push(&mut self, entry: EnhancementResult) {
        self.entries.insert(0, entry);
        self.entries.truncate(self.capacity);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Projects a stored entry into a view. Leaves the history untouched.
    pub fn select_for_viewing(entry: &EnhancementResult) -> ActiveView {
        ActiveView::pair(entry.original.clone(), entry.enhanced.clone())
    }

    /// True when `entry` is the result currently on screen.
    pub fn is_displayed(entry: &EnhancementResult, view: &ActiveView) -> bool {
        view.enhanced()
            .map(|shown| same_image(shown, &entry.enhanced))
            .unwrap_or(false)
    }
}
