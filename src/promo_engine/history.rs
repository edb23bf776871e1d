//! Bounded, persisted log of already-announced promotions

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::promo_engine::deduplicator::SimilarityMatcher;
use crate::promo_engine::store::{self, Persistence};

pub const DEFAULT_HISTORY_CAPACITY: usize = 200;

/// FIFO log of announced identifiers; insertion order is recency and the
/// length never exceeds `capacity`.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    capacity: usize,
    persistence: Persistence,
    entries: VecDeque<String>,
}

impl HistoryStore {
    /// Creates an empty store. Call [`HistoryStore::load`] to read prior state.
    pub fn new(path: impl Into<PathBuf>, capacity: usize, persistence: Persistence) -> Self {
        let capacity = capacity.max(1);
        Self {
            path: path.into(),
            capacity,
            persistence,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Creates the store and loads it from disk.
    pub fn open(path: impl Into<PathBuf>, capacity: usize, persistence: Persistence) -> Self {
        let mut store = Self::new(path, capacity, persistence);
        store.load();
        store
    }

    /// Replaces the in-memory entries with the persisted ones. A missing or
    /// unreadable file means "no history yet".
    pub fn load(&mut self) -> Vec<String> {
        let loaded = match store::read_string_array(&self.path) {
            Ok(Some((items, skipped))) => {
                if skipped > 0 {
                    warn!("Skipped {} non-string entries in {}", skipped, self.path.display());
                }
                items
            }
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Ignoring unreadable history: {}", e);
                Vec::new()
            }
        };

        // Oversized files keep only the newest entries.
        let skip = loaded.len().saturating_sub(self.capacity);
        self.entries = loaded.into_iter().skip(skip).collect();
        info!("Loaded {} history entries from {}", self.entries.len(), self.path.display());
        self.entries.iter().cloned().collect()
    }

    /// Appends at the back, evicting from the front past capacity.
    pub fn append(&mut self, name: impl Into<String>) {
        self.entries.push_back(name.into());
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Best-effort overwrite of the persisted log; a no-op when persistence is disabled.
    pub fn save(&self) {
        if self.persistence == Persistence::Disabled {
            return;
        }
        if let Err(e) = store::write_string_array(&self.path, &self.entries) {
            warn!("Failed to save history: {}", e);
        }
    }

    pub fn contains(&self, name: &str, matcher: &SimilarityMatcher) -> bool {
        matcher.is_duplicate(name, &self.entries)
    }

    pub fn entries(&self) -> impl Iterator<Item = &String> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
