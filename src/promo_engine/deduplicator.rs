//! Fuzzy duplicate detection between a candidate name and announced history

use crate::promo_engine::normalizer::Normalizer;

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.95;

/// Decides whether two names denote the same promotion using a gestalt
/// (Ratcliff/Obershelp) sequence-matching ratio over normalized names.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityMatcher {
    threshold: f64,
    normalizer: Normalizer,
}

impl Default for SimilarityMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl SimilarityMatcher {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            normalizer: Normalizer::default(),
        }
    }

    pub fn with_normalizer(threshold: f64, normalizer: Normalizer) -> Self {
        Self { threshold, normalizer }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Similarity ratio in `[0, 1]` between the normalized forms of `a` and `b`.
    pub fn ratio(&self, a: &str, b: &str) -> f64 {
        let a = self.normalizer.normalize(a);
        let b = self.normalizer.normalize(b);
        normalized_ratio(&a, &b)
    }

    pub fn is_similar(&self, a: &str, b: &str) -> bool {
        self.ratio(a, b) >= self.threshold
    }

    /// True iff the candidate is similar to any entry of `history`.
    pub fn is_duplicate<'a, I>(&self, candidate_name: &str, history: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        let candidate = self.normalizer.normalize(candidate_name);
        history.into_iter().any(|entry| {
            let entry = self.normalizer.normalize(entry);
            normalized_ratio(&candidate, &entry) >= self.threshold
        })
    }
}

/// Ratio over already-normalized names. Taking the larger of both argument
/// orders keeps the result symmetric regardless of longest-match tie-breaking.
fn normalized_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let total = (a.len() + b.len()) as f64;
    let forward = matching_characters(&a, &b);
    let backward = matching_characters(&b, &a);

    2.0 * forward.max(backward) as f64 / total
}

/// Number of characters covered by the recursive longest-common-block matching.
fn matching_characters(a: &[char], b: &[char]) -> usize {
    let mut matched = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];

    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, size) = longest_match(a, b, alo, ahi, blo, bhi);
        if size == 0 {
            continue;
        }
        matched += size;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + size < ahi && j + size < bhi {
            pending.push((i + size, ahi, j + size, bhi));
        }
    }

    matched
}

/// Longest common block of `a[alo..ahi]` and `b[blo..bhi]`, earliest in `a`
/// then earliest in `b` on ties.
fn longest_match(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_size) = (alo, blo, 0);
    let width = bhi - blo;
    let mut previous = vec![0usize; width + 1];
    let mut current = vec![0usize; width + 1];

    for i in alo..ahi {
        for j in blo..bhi {
            let col = j - blo + 1;
            current[col] = if a[i] == b[j] { previous[col - 1] + 1 } else { 0 };
            if current[col] > best_size {
                best_size = current[col];
                best_i = i + 1 - best_size;
                best_j = j + 1 - best_size;
            }
        }
        std::mem::swap(&mut previous, &mut current);
    }

    (best_i, best_j, best_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_punctuation_variants_are_similar() {
        let matcher = SimilarityMatcher::new(0.95);
        assert!(matcher.is_similar("Smart TV 55 4K", "Smart TV 55\" 4K"));
        assert!(matcher.is_similar("Fone Bluetooth XPTO", "fone bluetooth xpto"));
    }

    #[test]
    fn test_different_products_are_not_similar() {
        let matcher = SimilarityMatcher::new(0.95);
        assert!(!matcher.is_similar("Mouse Gamer X", "Teclado Mecânico Y"));
    }

    #[test]
    fn test_symmetric_and_reflexive() {
        let matcher = SimilarityMatcher::new(0.9);
        let pairs = [
            ("Notebook Gamer i7 16GB", "Notebook Gamer i5 16GB"),
            ("abcab", "bcaba"),
            ("Cadeira Gamer Azul", "Cadeira Gamer"),
            ("SSD 480GB", "HD 480GB Externo"),
        ];
        for (a, b) in pairs {
            assert_eq!(matcher.ratio(a, b), matcher.ratio(b, a), "{a} / {b}");
            assert_eq!(matcher.is_similar(a, b), matcher.is_similar(b, a));
            assert!(matcher.is_similar(a, a));
        }
    }

    #[test]
    fn test_ratio_matches_gestalt_definition() {
        // "abcd" vs "bcde": one common block "bcd" -> 2 * 3 / 8
        let ratio = normalized_ratio("abcd", "bcde");
        assert!((ratio - 0.75).abs() < 1e-9);
        assert_eq!(normalized_ratio("", ""), 1.0);
        assert_eq!(normalized_ratio("abc", ""), 0.0);
    }

    #[test]
    fn test_threshold_is_configurable() {
        let a = "Monitor Gamer 27 144Hz";
        let b = "Monitor Gamer 27 165Hz";
        assert!(!SimilarityMatcher::new(0.98).is_similar(a, b));
        assert!(SimilarityMatcher::new(0.90).is_similar(a, b));
    }

    #[test]
    fn test_is_duplicate_scans_history() {
        let matcher = SimilarityMatcher::default();
        let history = vec!["Mouse Gamer X".to_string(), "Smart TV 55 4K".to_string()];
        assert!(matcher.is_duplicate("SMART TV 55\" 4K", &history));
        assert!(!matcher.is_duplicate("Headset Sem Fio Z", &history));
        assert!(!matcher.is_duplicate("Headset Sem Fio Z", &Vec::<String>::new()));
    }
}
