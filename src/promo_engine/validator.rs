//! Candidate validation: required fields, price and URL shape, image checks

use std::fmt;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use tokio::time::Duration;
use tracing::{debug, warn};

use crate::promo_engine::normalizer::normalize;
use crate::promo_engine::CandidateRecord;

pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

pub const DEFAULT_EXCLUDED_KEYWORDS: &[&str] = &[
    "gift card",
    "giftcard",
    "cartão presente",
    "vale presente",
    "presente digital",
    "steam card",
    "playstation card",
    "xbox card",
    "nintendo card",
    "google play card",
    "itunes card",
];

lazy_static! {
    static ref PRICE_PATTERN: Regex =
        Regex::new(r"^(?:[A-Za-z]{0,3}\$|€|£)?\s*\d{1,3}(?:[.,]?\d{3})*(?:[.,]\d{1,2})?$").unwrap();
}

/// Why a candidate was dropped. All failing checks are reported together.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    NameTooShort { len: usize },
    PriceMissing,
    PriceMalformed { field: String, value: String },
    SourceUrlInvalid { url: String },
    AffiliateUrlInvalid { url: String },
    ImageMissing,
    ImageUnreachable { url: String, reason: String },
    ImageNotAnImage { url: String, content_type: String },
    ImageTooLarge { url: String, bytes: u64, limit: u64 },
    ExcludedKeyword(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NameTooShort { len } => write!(f, "name too short ({len} chars)"),
            RejectReason::PriceMissing => write!(f, "no price"),
            RejectReason::PriceMalformed { field, value } => write!(f, "malformed price {field}={value:?}"),
            RejectReason::SourceUrlInvalid { url } => write!(f, "invalid source url {url:?}"),
            RejectReason::AffiliateUrlInvalid { url } => write!(f, "invalid affiliate url {url:?}"),
            RejectReason::ImageMissing => write!(f, "no image"),
            RejectReason::ImageUnreachable { url, reason } => write!(f, "image {url} unreachable: {reason}"),
            RejectReason::ImageNotAnImage { url, content_type } => {
                write!(f, "image {url} has content type {content_type:?}")
            }
            RejectReason::ImageTooLarge { url, bytes, limit } => {
                write!(f, "image {url} is {bytes} bytes (limit {limit})")
            }
            RejectReason::ExcludedKeyword(keyword) => write!(f, "excluded keyword {keyword:?}"),
        }
    }
}

/// A candidate that passed validation, plus the media URL delivery may use.
#[derive(Debug, Clone)]
pub struct ValidatedRecord {
    pub record: CandidateRecord,
    pub media_url: Option<String>,
}

/// Headers of a probed image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageInfo {
    pub content_type: String,
    pub content_length: Option<u64>,
}

#[async_trait]
pub trait ImageProbe: Send + Sync {
    async fn probe(&self, url: &str) -> Result<ImageInfo, String>;
}

/// Issues a `HEAD` request and reads the content headers.
pub struct HttpImageProbe {
    client: Client,
}

impl HttpImageProbe {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }
}

#[async_trait]
impl ImageProbe for HttpImageProbe {
    async fn probe(&self, url: &str) -> Result<ImageInfo, String> {
        let response = self.client.head(url).send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let content_length = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        Ok(ImageInfo {
            content_type,
            content_length,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ValidationPolicy {
    pub min_name_len: usize,
    pub require_image: bool,
    pub max_image_bytes: u64,
    pub excluded_keywords: Vec<String>,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            min_name_len: 3,
            require_image: false,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            excluded_keywords: DEFAULT_EXCLUDED_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

pub struct Validator {
    policy: ValidationPolicy,
    probe: Box<dyn ImageProbe>,
    excluded: Vec<(String, String)>,
}

impl Validator {
    pub fn new(policy: ValidationPolicy, probe: Box<dyn ImageProbe>) -> Self {
        let excluded = policy
            .excluded_keywords
            .iter()
            .map(|k| (k.clone(), normalize(k)))
            .filter(|(_, normalized)| !normalized.is_empty())
            .collect();
        Self {
            policy,
            probe,
            excluded,
        }
    }

    pub fn policy(&self) -> &ValidationPolicy {
        &self.policy
    }

    /// Runs every check and collects all failures.
    pub async fn validate(&self, record: CandidateRecord) -> Result<ValidatedRecord, Vec<RejectReason>> {
        let mut errors = Vec::new();

        self.check_name(&record, &mut errors);
        self.check_prices(&record, &mut errors);
        self.check_urls(&record, &mut errors);
        let media_url = self.check_image(&record, &mut errors).await;

        if errors.is_empty() {
            Ok(ValidatedRecord { record, media_url })
        } else {
            Err(errors)
        }
    }

    fn check_name(&self, record: &CandidateRecord, errors: &mut Vec<RejectReason>) {
        let len = record.display_name.trim().chars().count();
        if len < self.policy.min_name_len {
            errors.push(RejectReason::NameTooShort { len });
        }

        let name = normalize(&record.display_name);
        let padded = format!(" {name} ");
        for (keyword, normalized) in &self.excluded {
            if padded.contains(&format!(" {normalized} ")) {
                errors.push(RejectReason::ExcludedKeyword(keyword.clone()));
                break;
            }
        }
    }

    fn check_prices(&self, record: &CandidateRecord, errors: &mut Vec<RejectReason>) {
        if record.price_fields.is_empty() {
            errors.push(RejectReason::PriceMissing);
            return;
        }

        let malformed: Vec<RejectReason> = record
            .price_fields
            .iter()
            .filter(|(_, value)| !is_price(value))
            .map(|(field, value)| RejectReason::PriceMalformed {
                field: field.clone(),
                value: value.clone(),
            })
            .collect();

        // One well-formed price is enough; malformed extras are tolerated.
        if malformed.len() == record.price_fields.len() {
            errors.extend(malformed);
        }
    }

    fn check_urls(&self, record: &CandidateRecord, errors: &mut Vec<RejectReason>) {
        if !is_http_url(&record.source_url) {
            errors.push(RejectReason::SourceUrlInvalid {
                url: record.source_url.clone(),
            });
        }
        if let Some(affiliate) = &record.affiliate_url {
            if !is_http_url(affiliate) {
                errors.push(RejectReason::AffiliateUrlInvalid { url: affiliate.clone() });
            }
        }
    }

    async fn check_image(&self, record: &CandidateRecord, errors: &mut Vec<RejectReason>) -> Option<String> {
        let url = match record.image_url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => url,
            None => {
                if self.policy.require_image {
                    errors.push(RejectReason::ImageMissing);
                }
                return None;
            }
        };

        let problem = if !is_http_url(url) {
            Some(RejectReason::ImageUnreachable {
                url: url.to_string(),
                reason: "not an http(s) url".to_string(),
            })
        } else {
            match self.probe.probe(url).await {
                Err(reason) => Some(RejectReason::ImageUnreachable {
                    url: url.to_string(),
                    reason,
                }),
                Ok(info) if !info.content_type.trim().to_ascii_lowercase().starts_with("image/") => {
                    Some(RejectReason::ImageNotAnImage {
                        url: url.to_string(),
                        content_type: info.content_type,
                    })
                }
                Ok(ImageInfo {
                    content_length: Some(bytes),
                    ..
                }) if bytes > self.policy.max_image_bytes => Some(RejectReason::ImageTooLarge {
                    url: url.to_string(),
                    bytes,
                    limit: self.policy.max_image_bytes,
                }),
                Ok(_) => None,
            }
        };

        match problem {
            None => Some(url.to_string()),
            Some(reason) if self.policy.require_image => {
                errors.push(reason);
                None
            }
            Some(reason) => {
                // Text-only delivery is still acceptable.
                warn!("Dropping image for {}: {}", record.display_name, reason);
                None
            }
        }
    }
}

/// Currency-amount shape such as `R$ 1.299,90`, `$19.99` or `199`.
pub fn is_price(value: &str) -> bool {
    let matched = PRICE_PATTERN.is_match(value.trim());
    if !matched {
        debug!("Rejected price text {:?}", value);
    }
    matched
}

pub fn is_http_url(value: &str) -> bool {
    let value = value.trim();
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        return false;
    }
    url::Url::parse(value)
        .map(|u| u.host_str().is_some_and(|h| !h.is_empty()))
        .unwrap_or(false)
}
