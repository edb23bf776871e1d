//! Run configuration resolved once at startup

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use tokio::time::Duration;
use url::Url;

use crate::promo_engine::deduplicator::DEFAULT_SIMILARITY_THRESHOLD;
use crate::promo_engine::delivery::RecordPolicy;
use crate::promo_engine::errors::ConfigError;
use crate::promo_engine::history::DEFAULT_HISTORY_CAPACITY;
use crate::promo_engine::parser::SelectorSet;
use crate::promo_engine::rate_limiter::Pacer;
use crate::promo_engine::retry::DEFAULT_MAX_ATTEMPTS;
use crate::promo_engine::store::Persistence;
use crate::promo_engine::validator::{DEFAULT_EXCLUDED_KEYWORDS, DEFAULT_MAX_IMAGE_BYTES};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Test,
    Prod,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub destinations: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub instance_id: String,
    pub api_token: String,
    pub destinations: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AffiliateConfig {
    pub base_url: Url,
    pub params: Vec<(String, String)>,
    pub target_param: String,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub mode: RunMode,
    pub sources: Vec<String>,
    pub sources_per_rotation: usize,
    pub similarity_threshold: f64,
    pub keep_punctuation: bool,
    pub history_capacity: usize,
    pub history_path: PathBuf,
    pub rotation_path: PathBuf,
    pub record_policy: RecordPolicy,
    pub require_image: bool,
    pub max_image_bytes: u64,
    pub excluded_keywords: Vec<String>,
    pub max_candidates_per_run: usize,
    pub max_items_per_source: usize,
    pub retry_attempts: u32,
    pub retry_backoff: Pacer,
    pub send_pause: Pacer,
    pub candidate_pause: Pacer,
    pub source_pause: Pacer,
    pub http_timeout: Duration,
    pub run_interval: Duration,
    pub force_run_on_start: bool,
    pub store_label: String,
    pub telegram: Option<TelegramConfig>,
    pub whatsapp: Option<WhatsAppConfig>,
    pub admin_destinations: Vec<String>,
    pub affiliate: Option<AffiliateConfig>,
    pub selectors: SelectorSet,
    pub status_addr: Option<String>,
}

impl RunConfig {
    /// Loads `.env` when present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_map(values: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| values.get(key).cloned())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup: &lookup };

        let mode = if env.flag("TEST_MODE", false)? { RunMode::Test } else { RunMode::Prod };
        let test = mode == RunMode::Test;
        // Test runs read *_TEST variants for destinations and files.
        let by_mode = |prod: &'static str, test_key: &'static str| if test { test_key } else { prod };

        let sources = env.list("SOURCES");
        if sources.is_empty() {
            return Err(ConfigError::Missing("SOURCES"));
        }

        let similarity_threshold: f64 = env.parsed("SIMILARITY_THRESHOLD", DEFAULT_SIMILARITY_THRESHOLD)?;
        if !(similarity_threshold > 0.0 && similarity_threshold <= 1.0) {
            return Err(env.invalid("SIMILARITY_THRESHOLD", "must be in (0, 1]"));
        }

        let history_capacity: usize = env.parsed("HISTORY_CAPACITY", DEFAULT_HISTORY_CAPACITY)?;
        if history_capacity == 0 {
            return Err(env.invalid("HISTORY_CAPACITY", "must be at least 1"));
        }

        let sources_per_rotation: usize = env.parsed("SOURCES_PER_ROTATION", 2)?;
        if sources_per_rotation == 0 {
            return Err(env.invalid("SOURCES_PER_ROTATION", "must be at least 1"));
        }

        let max_candidates_per_run: usize = env.parsed("MAX_CANDIDATES_PER_RUN", 10)?;
        if max_candidates_per_run == 0 {
            return Err(env.invalid("MAX_CANDIDATES_PER_RUN", "must be at least 1"));
        }

        let max_items_per_source: usize = env.parsed("MAX_ITEMS_PER_SOURCE", 60)?;
        if max_items_per_source == 0 {
            return Err(env.invalid("MAX_ITEMS_PER_SOURCE", "must be at least 1"));
        }

        let telegram = match env.get("TELEGRAM_BOT_TOKEN") {
            Some(bot_token) => Some(TelegramConfig {
                bot_token,
                destinations: env.list(by_mode("TELEGRAM_DESTINATIONS", "TELEGRAM_DESTINATIONS_TEST")),
            }),
            None => None,
        };

        let whatsapp = if env.flag("WHATSAPP_ENABLED", false)? {
            Some(WhatsAppConfig {
                instance_id: env.get("GREEN_API_INSTANCE_ID").ok_or(ConfigError::Missing("GREEN_API_INSTANCE_ID"))?,
                api_token: env.get("GREEN_API_TOKEN").ok_or(ConfigError::Missing("GREEN_API_TOKEN"))?,
                destinations: env.list(by_mode("WHATSAPP_DESTINATIONS", "WHATSAPP_DESTINATIONS_TEST")),
            })
        } else {
            None
        };

        if telegram.is_none() && whatsapp.is_none() {
            return Err(ConfigError::Missing("TELEGRAM_BOT_TOKEN or WHATSAPP_ENABLED"));
        }

        let affiliate = match env.get("AFFILIATE_BASE_URL") {
            Some(raw) => Some(AffiliateConfig {
                base_url: Url::parse(&raw).map_err(|e| ConfigError::Invalid {
                    key: "AFFILIATE_BASE_URL",
                    value: raw.clone(),
                    reason: e.to_string(),
                })?,
                params: crate::promo_engine::affiliate::QueryAffiliate::parse_params(
                    &env.get("AFFILIATE_PARAMS").unwrap_or_default(),
                ),
                target_param: env.get("AFFILIATE_TARGET_PARAM").unwrap_or_else(|| "url".to_string()),
            }),
            None => None,
        };

        let excluded_keywords = match env.get("EXCLUDED_KEYWORDS") {
            Some(_) => env.list("EXCLUDED_KEYWORDS"),
            None => DEFAULT_EXCLUDED_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        };

        let defaults = SelectorSet::default();
        let selectors = SelectorSet {
            card: env.get("LISTING_CARD_SELECTOR").unwrap_or(defaults.card),
            name: env.get("LISTING_NAME_SELECTOR").unwrap_or(defaults.name),
            link: env.get("LISTING_LINK_SELECTOR").unwrap_or(defaults.link),
            price: env.get("LISTING_PRICE_SELECTOR").unwrap_or(defaults.price),
            old_price: env.get("LISTING_OLD_PRICE_SELECTOR").unwrap_or(defaults.old_price),
            pix_price: env.get("LISTING_PIX_PRICE_SELECTOR").unwrap_or(defaults.pix_price),
            installments: env.get("LISTING_INSTALLMENTS_SELECTOR").unwrap_or(defaults.installments),
            image: env.get("LISTING_IMAGE_SELECTOR").unwrap_or(defaults.image),
        };

        Ok(Self {
            mode,
            sources,
            sources_per_rotation,
            similarity_threshold,
            keep_punctuation: env.flag("KEEP_PUNCTUATION", false)?,
            history_capacity,
            history_path: env.path(by_mode("HISTORY_FILE", "HISTORY_FILE_TEST"), if test {
                "promo_history_test.json"
            } else {
                "promo_history.json"
            }),
            rotation_path: env.path(by_mode("ROTATION_FILE", "ROTATION_FILE_TEST"), if test {
                "used_sources_test.json"
            } else {
                "used_sources.json"
            }),
            record_policy: env.parsed("RECORD_POLICY", RecordPolicy::AnySuccess)?,
            require_image: env.flag("REQUIRE_IMAGE", false)?,
            max_image_bytes: env.parsed("MAX_IMAGE_BYTES", DEFAULT_MAX_IMAGE_BYTES)?,
            excluded_keywords,
            max_candidates_per_run,
            max_items_per_source,
            retry_attempts: env.parsed("RETRY_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
            retry_backoff: env.range("RETRY_BACKOFF_SECS", (2.0, 5.0))?,
            send_pause: env.range("SEND_PAUSE_SECS", (2.0, 7.0))?,
            candidate_pause: env.range("CANDIDATE_PAUSE_SECS", (3.0, 7.0))?,
            source_pause: env.range("SOURCE_PAUSE_SECS", (5.0, 10.0))?,
            http_timeout: Duration::from_secs(env.parsed("HTTP_TIMEOUT_SECS", 20)?),
            run_interval: Duration::from_secs(env.parsed("RUN_INTERVAL_SECS", 3600)?),
            force_run_on_start: env.flag("FORCE_RUN_ON_START", true)?,
            store_label: env.get("STORE_LABEL").unwrap_or_else(|| "Promo".to_string()),
            telegram,
            whatsapp,
            admin_destinations: env.list(by_mode("ADMIN_DESTINATIONS", "ADMIN_DESTINATIONS_TEST")),
            affiliate,
            selectors,
            status_addr: env.get("STATUS_ADDR"),
        })
    }

    pub fn persistence(&self) -> Persistence {
        match self.mode {
            RunMode::Test => Persistence::Disabled,
            RunMode::Prod => Persistence::Enabled,
        }
    }
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn invalid(&self, key: &'static str, reason: &str) -> ConfigError {
        ConfigError::Invalid {
            key,
            value: self.get(key).unwrap_or_default(),
            reason: reason.to_string(),
        }
    }

    fn parsed<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key).map(|v| v.to_ascii_lowercase()) {
            None => Ok(default),
            Some(v) if matches!(v.as_str(), "true" | "1" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "false" | "0" | "no" | "off") => Ok(false),
            Some(_) => Err(self.invalid(key, "expected a boolean")),
        }
    }

    /// Comma-separated list, trimmed, empty items dropped.
    fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn path(&self, key: &str, default: &str) -> PathBuf {
        PathBuf::from(self.get(key).unwrap_or_else(|| default.to_string()))
    }

    /// `min-max` seconds, or a single value for a fixed pause.
    fn range(&self, key: &'static str, default: (f64, f64)) -> Result<Pacer, ConfigError> {
        let Some(raw) = self.get(key) else {
            return Ok(Pacer::from_secs(default.0, default.1));
        };
        let (min, max) = raw.split_once('-').unwrap_or((raw.as_str(), raw.as_str()));
        let seconds = |text: &str| {
            text.trim()
                .parse::<f64>()
                .ok()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        };
        match (seconds(min), seconds(max)) {
            (Some(min), Some(max)) => Ok(Pacer::new(min, max)),
            _ => Err(self.invalid(key, "expected non-negative seconds as `min-max`")),
        }
    }
}
