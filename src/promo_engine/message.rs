//! Announcement text for a validated candidate

use lazy_static::lazy_static;
use regex::Regex;

use crate::promo_engine::CandidateRecord;

/// Price field keys understood by the formatter.
pub const OLD_PRICE: &str = "old_price";
pub const PRICE: &str = "price";
pub const PIX_PRICE: &str = "pix_price";
pub const INSTALLMENTS: &str = "installments";

lazy_static! {
    static ref CARD_DISCOUNT: Regex = Regex::new(r"(\d+)% de desconto").unwrap();
}

const MARKDOWN_SPECIALS: &[char] = &['*', '_', '[', ']', '`', '>', '#', '+', '=', '|', '{', '}', '~'];

/// Text dialect understood by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Markup {
    /// Telegram legacy Markdown: specials are backslash-escaped.
    TelegramMarkdown,
    /// WhatsApp renders `*bold*` but shows backslashes literally.
    WhatsApp,
}

impl Markup {
    fn escape(self, text: &str) -> String {
        match self {
            Markup::TelegramMarkdown => escape_markdown(text),
            Markup::WhatsApp => text.to_string(),
        }
    }
}

/// One announcement rendered for every markup dialect.
#[derive(Debug, Clone, PartialEq)]
pub struct Announcement {
    pub markdown: String,
    pub whatsapp: String,
}

impl Announcement {
    /// Same text for every dialect.
    pub fn uniform(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            markdown: text.clone(),
            whatsapp: text,
        }
    }

    pub fn text(&self, markup: Markup) -> &str {
        match markup {
            Markup::TelegramMarkdown => &self.markdown,
            Markup::WhatsApp => &self.whatsapp,
        }
    }
}

pub struct MessageFormatter {
    store_label: String,
}

impl MessageFormatter {
    pub fn new(store_label: impl Into<String>) -> Self {
        Self {
            store_label: store_label.into(),
        }
    }

    pub fn announce(&self, record: &CandidateRecord) -> Announcement {
        Announcement {
            markdown: self.format(record, Markup::TelegramMarkdown),
            whatsapp: self.format(record, Markup::WhatsApp),
        }
    }

    pub fn format(&self, record: &CandidateRecord, markup: Markup) -> String {
        let mut message = format!("🥷 *{}*\n\n", markup.escape(&self.store_label));
        message.push_str(&format!("🏷️ {}\n\n", markup.escape(&record.display_name)));

        let old_price = record.price(OLD_PRICE).and_then(parse_price);
        let price = record.price(PRICE).and_then(parse_price);
        let pix_price = record.price(PIX_PRICE).and_then(parse_price);
        let installments = record
            .price(INSTALLMENTS)
            .map(str::trim)
            .filter(|s| !s.is_empty());

        if let Some(discount) = best_discount(old_price, price, pix_price, installments) {
            message.push_str(&format!("📉 Desconto de até {discount}% OFF\n\n"));
        }

        if let Some(old) = old_price {
            message.push_str(&format!("💸 De: {}\n\n", format_brl(old)));
        }
        match (price, pix_price) {
            (Some(card), Some(pix)) => {
                message.push_str(&format!("💥 Por apenas: {}\n", format_brl(card)));
                message.push_str(&format!("💥 Ou: {} (no PIX)\n", format_brl(pix)));
            }
            (Some(card), None) => message.push_str(&format!("💥 Por apenas: {}\n", format_brl(card))),
            (None, Some(pix)) => message.push_str(&format!("💥 Por apenas: {} (no PIX)\n", format_brl(pix))),
            (None, None) => {
                // Unparseable but valid-looking prices are shown verbatim.
                if let Some((_, raw)) = record.price_fields.iter().find(|(k, _)| k.as_str() != INSTALLMENTS) {
                    message.push_str(&format!("💥 Por apenas: {}\n", markup.escape(raw)));
                }
            }
        }

        if let Some(installments) = installments {
            message.push_str("\n💳 *Parcelamentos:*\n");
            for line in installments.lines().map(str::trim).filter(|l| !l.is_empty()) {
                let line = markup.escape(line);
                if line.starts_with('-') {
                    message.push_str(&format!("{line}\n"));
                } else {
                    message.push_str(&format!("- {line}\n"));
                }
            }
        }

        message.push_str("\n🛒 *Garanta agora:*\n");
        message.push_str(&format!("🔗 {}", record.link()));
        message
    }
}

/// Largest percentage saved against the old price, falling back to a
/// "N% de desconto" mention in the installment text.
fn best_discount(old: Option<f64>, card: Option<f64>, pix: Option<f64>, installments: Option<&str>) -> Option<u32> {
    let percent = |now: Option<f64>| -> Option<u32> {
        let (old, now) = (old?, now?);
        if old <= 0.0 || now >= old {
            return None;
        }
        Some(((old - now) / old * 100.0).round() as u32)
    };

    let computed = [percent(card), percent(pix)].into_iter().flatten().max();
    computed.or_else(|| {
        installments
            .and_then(|text| CARD_DISCOUNT.captures(text))
            .and_then(|cap| cap.get(1))
            .and_then(|m| m.as_str().parse().ok())
    })
}

/// Parses `R$ 1.299,90`, `1299.90`, `199,9` style amounts.
pub fn parse_price(text: &str) -> Option<f64> {
    let digits: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    if digits.is_empty() {
        return None;
    }

    let normalized = match (digits.rfind(','), digits.rfind('.')) {
        // Comma is the decimal separator: "1.299,90"
        (Some(comma), Some(dot)) if comma > dot => digits.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => digits.replace(',', ""),
        (Some(comma), None) if digits.len() - comma - 1 == 3 => digits.replace(',', ""),
        (Some(_), None) => digits.replace(',', "."),
        // "1.299" is a thousands group, "12.5" is a decimal
        (None, Some(dot)) if dot > 0 && digits.len() - dot - 1 == 3 => digits.replace('.', ""),
        _ => digits,
    };

    normalized.parse().ok()
}

fn format_brl(value: f64) -> String {
    let cents = (value * 100.0).round() as u64;
    let (units, cents) = (cents / 100, cents % 100);
    let digits = units.to_string();
    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    format!("R$ {grouped},{cents:02}")
}

pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if MARKDOWN_SPECIALS.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
