//! Source page fetching with User-Agent rotation

use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::Client;
use tokio::time::Duration;
use tracing::debug;

use crate::promo_engine::errors::ExtractionError;
use crate::promo_engine::parser::ListingParser;
use crate::promo_engine::CandidateRecord;

/// Turns one source (category page) into candidate records.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn fetch(&self, source: &str) -> Result<Vec<CandidateRecord>, ExtractionError>;
}

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
];

/// Fetches listing pages over HTTP and parses them with CSS selectors.
/// Retries are left to the caller's retry policy.
pub struct HttpExtractor {
    client: Client,
    parser: ListingParser,
    max_items: usize,
}

impl HttpExtractor {
    pub fn new(parser: ListingParser, timeout: Duration, max_items: usize) -> Self {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            reqwest::header::HeaderValue::from_static("pt-BR,pt;q=0.9,en-US;q=0.8"),
        );

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            parser,
            max_items,
        }
    }

    async fn fetch_page(&self, url: &str) -> Result<String, ExtractionError> {
        let user_agent = USER_AGENTS.choose(&mut rand::thread_rng()).copied().unwrap_or(USER_AGENTS[0]);

        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, user_agent)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ExtractionError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let content = response.text().await?;
        if content.trim().is_empty() {
            return Err(ExtractionError::EmptyPage(url.to_string()));
        }

        Ok(content)
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn fetch(&self, source: &str) -> Result<Vec<CandidateRecord>, ExtractionError> {
        let html = self.fetch_page(source).await?;
        let mut records = self.parser.parse(&html, source)?;
        records.truncate(self.max_items);
        debug!("Parsed {} candidates from {}", records.len(), source);
        Ok(records)
    }
}
