//! Product name canonicalization used before any similarity comparison

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Canonicalizes product names. The default strips punctuation; some sources
/// carry meaningful symbols in names and keep them instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Normalizer {
    pub keep_punctuation: bool,
}

impl Normalizer {
    pub fn new(keep_punctuation: bool) -> Self {
        Self { keep_punctuation }
    }

    /// Lower-cases, strips diacritics, drops punctuation (unless kept) and
    /// collapses whitespace. Total and idempotent.
    pub fn normalize(&self, name: &str) -> String {
        let folded: String = name
            .nfkd()
            .flat_map(char::to_lowercase)
            .nfkd()
            .filter(|c| !is_combining_mark(*c))
            .filter(|c| self.keep_punctuation || c.is_alphanumeric() || c.is_whitespace())
            .collect();

        folded.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// Normalizes with the default (punctuation-stripping) policy.
pub fn normalize(name: &str) -> String {
    Normalizer::default().normalize(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_diacritics_and_punctuation() {
        assert_eq!(normalize("  Teclado  Mecânico, RGB!  "), "teclado mecanico rgb");
        assert_eq!(normalize("Smart TV 55\" 4K"), "smart tv 55 4k");
        assert_eq!(normalize("Ação\tPromoção\n"), "acao promocao");
    }

    #[test]
    fn test_total_on_degenerate_input() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("!!! ... ???"), "");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            "Fone Bluetooth XPTO",
            "SSD 1TB NVMe – Leitura 7000MB/s",
            "İstanbul Çay Bardağı",
            "ＦＵＬＬＷＩＤＴＨ ½ Preço",
            "",
            "#$%",
        ];
        for sample in samples {
            let once = normalize(sample);
            assert_eq!(normalize(&once), once, "not idempotent for {sample:?}");
        }
    }

    #[test]
    fn test_keep_punctuation_variant() {
        let normalizer = Normalizer::new(true);
        assert_eq!(normalizer.normalize("Wi-Fi  Router (AX3000)"), "wi-fi router (ax3000)");
        let once = normalizer.normalize("Cabo USB-C 2m, Nylon");
        assert_eq!(normalizer.normalize(&once), once);
    }
}
