//! Telegram Bot API transport

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tokio::time::Duration;
use tracing::warn;

use crate::promo_engine::delivery::{Channel, ChannelKind};

const API_BASE: &str = "https://api.telegram.org";

/// Photo captions above this length are refused by the Bot API.
pub const CAPTION_LIMIT: usize = 1024;

pub struct TelegramChannel {
    client: Client,
    api_base: String,
    token: String,
}

impl TelegramChannel {
    pub fn new(token: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_base: API_BASE.to_string(),
            token: token.into(),
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    async fn call(&self, method: &str, payload: serde_json::Value) -> bool {
        match self.client.post(self.endpoint(method)).json(&payload).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                warn!("Telegram {} answered {}: {}", method, status, body);
                false
            }
            Err(e) => {
                warn!("Telegram {} request failed: {}", method, e);
                false
            }
        }
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    fn caption_limit(&self) -> Option<usize> {
        Some(CAPTION_LIMIT)
    }

    async fn send_text(&self, destination: &str, text: &str) -> bool {
        self.call(
            "sendMessage",
            json!({
                "chat_id": destination,
                "text": text,
                "parse_mode": "Markdown",
            }),
        )
        .await
    }

    async fn send_media(&self, destination: &str, text: &str, media_url: &str) -> bool {
        if text.chars().count() > CAPTION_LIMIT {
            return false;
        }
        self.call(
            "sendPhoto",
            json!({
                "chat_id": destination,
                "photo": media_url,
                "caption": text,
                "parse_mode": "Markdown",
            }),
        )
        .await
    }
}
