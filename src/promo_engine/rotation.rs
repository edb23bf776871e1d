//! Source rotation: spreads scrape attempts over the configured categories
//! without repeating one until every source has had its turn.

use std::collections::BTreeSet;
use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::promo_engine::store::{self, Persistence};

pub struct RotationSelector<R: Rng = StdRng> {
    all_sources: Vec<String>,
    used: BTreeSet<String>,
    state_path: PathBuf,
    persistence: Persistence,
    rng: R,
}

impl RotationSelector<StdRng> {
    pub fn open(all_sources: Vec<String>, state_path: impl Into<PathBuf>, persistence: Persistence) -> Self {
        Self::with_rng(all_sources, state_path, persistence, StdRng::from_entropy())
    }
}

impl<R: Rng> RotationSelector<R> {
    /// Builds a selector around an explicit RNG and loads the persisted cycle.
    pub fn with_rng(
        all_sources: Vec<String>,
        state_path: impl Into<PathBuf>,
        persistence: Persistence,
        rng: R,
    ) -> Self {
        // Keep configuration order, drop repeated entries.
        let mut seen = BTreeSet::new();
        let all_sources: Vec<String> = all_sources
            .into_iter()
            .filter(|source| seen.insert(source.clone()))
            .collect();

        let mut selector = Self {
            all_sources,
            used: BTreeSet::new(),
            state_path: state_path.into(),
            persistence,
            rng,
        };
        selector.load();
        selector
    }

    fn load(&mut self) {
        let stored = match store::read_string_array(&self.state_path) {
            Ok(Some((items, _))) => items,
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Ignoring unreadable rotation state: {}", e);
                Vec::new()
            }
        };

        // Sources removed from configuration fall out of the cycle.
        self.used = stored
            .into_iter()
            .filter(|source| self.all_sources.contains(source))
            .collect();
    }

    fn save(&self) {
        if self.persistence == Persistence::Disabled {
            return;
        }
        if let Err(e) = store::write_string_array(&self.state_path, &self.used) {
            warn!("Failed to save rotation state: {}", e);
        }
    }

    /// Picks up to `k` not-yet-used sources at random, resetting the cycle
    /// first when every source has been used.
    pub fn select_next(&mut self, k: usize) -> Vec<String> {
        if self.all_sources.is_empty() {
            return Vec::new();
        }

        if self.used.len() >= self.all_sources.len() {
            info!("All {} sources used, starting a new rotation cycle", self.all_sources.len());
            self.used.clear();
        }

        let available: Vec<&String> = self
            .all_sources
            .iter()
            .filter(|source| !self.used.contains(*source))
            .collect();

        let count = k.min(available.len());
        let selected: Vec<String> = available
            .choose_multiple(&mut self.rng, count)
            .map(|source| (*source).clone())
            .collect();

        self.used.extend(selected.iter().cloned());
        self.save();

        info!("Selected {} of {} available sources", selected.len(), available.len());
        selected
    }

    pub fn used(&self) -> &BTreeSet<String> {
        &self.used
    }

    /// Sources still eligible before the next cycle reset.
    pub fn remaining_in_cycle(&self) -> usize {
        self.all_sources.len() - self.used.len()
    }

    pub fn all_sources(&self) -> &[String] {
        &self.all_sources
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn sources(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://shop.example/cat/{i}")).collect()
    }

    fn seeded(all: Vec<String>, path: PathBuf, seed: u64) -> RotationSelector<StdRng> {
        RotationSelector::with_rng(all, path, Persistence::Enabled, StdRng::seed_from_u64(seed))
    }

    #[test]
    fn test_full_coverage_before_reset() {
        let dir = tempfile::tempdir().unwrap();
        let mut selector = seeded(sources(5), dir.path().join("r.json"), 7);

        let mut seen = HashSet::new();
        let batches: Vec<Vec<String>> = (0..3).map(|_| selector.select_next(2)).collect();
        for batch in &batches {
            seen.extend(batch.iter().cloned());
        }

        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1].len(), 2);
        // Only one source left for the third call.
        assert_eq!(batches[2].len(), 1);
        assert_eq!(seen.len(), 5);
        assert_eq!(selector.remaining_in_cycle(), 0);

        // The fourth call starts a fresh cycle.
        let fourth = selector.select_next(2);
        assert_eq!(fourth.len(), 2);
        assert_eq!(selector.used().len(), 2);
    }

    #[test]
    fn test_no_repeats_within_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut selector = seeded(sources(6), dir.path().join("r.json"), 42);

        let mut picked = Vec::new();
        for _ in 0..3 {
            picked.extend(selector.select_next(2));
        }
        let unique: HashSet<_> = picked.iter().collect();
        assert_eq!(unique.len(), picked.len());
    }

    #[test]
    fn test_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.json");
        let first = seeded(sources(4), path.clone(), 1).select_next(3);

        let mut restarted = seeded(sources(4), path, 2);
        assert_eq!(restarted.used().len(), 3);
        let next = restarted.select_next(3);
        assert_eq!(next.len(), 1);
        assert!(!first.contains(&next[0]));
    }

    #[test]
    fn test_stale_sources_are_dropped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.json");
        std::fs::write(&path, r#"["https://gone.example", "https://shop.example/cat/0"]"#).unwrap();

        let selector = seeded(sources(3), path, 3);
        assert_eq!(selector.used().len(), 1);
        assert!(selector.used().is_subset(&selector.all_sources().iter().cloned().collect()));
    }

    #[test]
    fn test_disabled_persistence_keeps_state_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.json");
        let mut selector =
            RotationSelector::with_rng(sources(3), &path, Persistence::Disabled, StdRng::seed_from_u64(5));

        assert_eq!(selector.select_next(2).len(), 2);
        assert_eq!(selector.select_next(2).len(), 1);
        assert!(!path.exists());
    }

    #[test]
    fn test_empty_source_set() {
        let dir = tempfile::tempdir().unwrap();
        let mut selector = seeded(Vec::new(), dir.path().join("r.json"), 9);
        assert!(selector.select_next(2).is_empty());
    }
}
