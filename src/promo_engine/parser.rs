//! Listing page parser turning product cards into candidate records

use std::collections::HashSet;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::promo_engine::errors::ExtractionError;
use crate::promo_engine::message::{INSTALLMENTS, OLD_PRICE, PIX_PRICE, PRICE};
use crate::promo_engine::CandidateRecord;

/// CSS selectors for one shop's listing markup. Field selectors are
/// evaluated relative to each card.
#[derive(Debug, Clone)]
pub struct SelectorSet {
    pub card: String,
    pub name: String,
    pub link: String,
    pub price: String,
    pub old_price: String,
    pub pix_price: String,
    pub installments: String,
    pub image: String,
}

impl Default for SelectorSet {
    fn default() -> Self {
        Self {
            card: "[data-testid='product-card'], article.product-card, li.product".to_string(),
            name: "[data-testid='product-name'], .product-name, h2, h3".to_string(),
            link: "a[href]".to_string(),
            price: "[data-testid='price'], .price, .priceCard".to_string(),
            old_price: ".old-price, .oldPriceCard, .line-through, s, del".to_string(),
            pix_price: ".pix-price".to_string(),
            installments: ".installments".to_string(),
            image: "img".to_string(),
        }
    }
}

struct CompiledSelectors {
    card: Selector,
    name: Selector,
    link: Selector,
    price: Selector,
    old_price: Selector,
    pix_price: Selector,
    installments: Selector,
    image: Selector,
}

pub struct ListingParser {
    selectors: CompiledSelectors,
}

impl ListingParser {
    pub fn new(set: &SelectorSet) -> Result<Self, ExtractionError> {
        let compile = |css: &str| {
            Selector::parse(css).map_err(|e| ExtractionError::Other(format!("invalid selector {css:?}: {e}")))
        };

        Ok(Self {
            selectors: CompiledSelectors {
                card: compile(set.card.as_str())?,
                name: compile(set.name.as_str())?,
                link: compile(set.link.as_str())?,
                price: compile(set.price.as_str())?,
                old_price: compile(set.old_price.as_str())?,
                pix_price: compile(set.pix_price.as_str())?,
                installments: compile(set.installments.as_str())?,
                image: compile(set.image.as_str())?,
            },
        })
    }

    /// Extracts every card that carries at least a name and a link. Links and
    /// images are resolved against `source_url`; repeated links are dropped.
    pub fn parse(&self, html: &str, source_url: &str) -> Result<Vec<CandidateRecord>, ExtractionError> {
        let base = Url::parse(source_url).map_err(|e| ExtractionError::InvalidUrl {
            url: source_url.to_string(),
            reason: e.to_string(),
        })?;
        let document = Html::parse_document(html);
        let mut seen_links = HashSet::new();
        let mut records = Vec::new();

        for card in document.select(&self.selectors.card) {
            let Some(name) = first_text(&card, &self.selectors.name) else {
                continue;
            };
            let Some(link) = card
                .select(&self.selectors.link)
                .find_map(|a| a.value().attr("href"))
                .and_then(|href| base.join(href).ok())
            else {
                continue;
            };
            if !seen_links.insert(link.to_string()) {
                continue;
            }

            let mut record = CandidateRecord::new(name, link.as_str());
            for (field, selector) in [
                (PRICE, &self.selectors.price),
                (OLD_PRICE, &self.selectors.old_price),
                (PIX_PRICE, &self.selectors.pix_price),
                (INSTALLMENTS, &self.selectors.installments),
            ] {
                if let Some(value) = first_text(&card, selector) {
                    record = record.with_price(field, value);
                }
            }

            let image = card.select(&self.selectors.image).find_map(|img| {
                img.value()
                    .attr("src")
                    .or_else(|| img.value().attr("data-src"))
                    .and_then(|src| base.join(src).ok())
            });
            if let Some(image) = image {
                record = record.with_image_url(image.as_str());
            }

            records.push(record);
        }

        Ok(records)
    }
}

fn first_text(scope: &ElementRef, selector: &Selector) -> Option<String> {
    scope.select(selector).find_map(|element| {
        let text = element.text().collect::<Vec<_>>().join(" ");
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        (!text.is_empty()).then_some(text)
    })
}
