//! WhatsApp transport over a Green-API instance

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::promo_engine::delivery::{Channel, ChannelKind};
use crate::promo_engine::message::Markup;

const API_BASE: &str = "https://api.green-api.com";

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(rename = "idMessage")]
    id_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StateResponse {
    #[serde(rename = "stateInstance")]
    state_instance: Option<String>,
}

pub struct GreenApiChannel {
    client: Client,
    api_base: String,
    instance_id: String,
    token: String,
}

impl GreenApiChannel {
    pub fn new(instance_id: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_base: API_BASE.to_string(),
            instance_id: instance_id.into(),
            token: token.into(),
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/waInstance{}/{}/{}", self.api_base, self.instance_id, method, self.token)
    }

    /// Accepted only when the API hands back a message id.
    async fn post(&self, method: &str, payload: serde_json::Value) -> bool {
        let response = match self.client.post(self.endpoint(method)).json(&payload).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Green-API {} request failed: {}", method, e);
                return false;
            }
        };

        if !response.status().is_success() {
            warn!("Green-API {} answered {}", method, response.status());
            return false;
        }

        match response.json::<SendResponse>().await {
            Ok(SendResponse { id_message: Some(_) }) => true,
            Ok(_) => {
                warn!("Green-API {} returned no message id", method);
                false
            }
            Err(e) => {
                warn!("Green-API {} returned an unreadable body: {}", method, e);
                false
            }
        }
    }
}

/// File name Green-API shows for a media URL, keeping a known extension.
fn media_file_name(media_url: &str) -> String {
    let extension = url::Url::parse(media_url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .and_then(|last| last.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()))
        .filter(|ext| matches!(ext.as_str(), "jpg" | "jpeg" | "png" | "gif" | "webp" | "mp4"))
        .unwrap_or_else(|| "jpg".to_string());
    format!("image.{extension}")
}

#[async_trait]
impl Channel for GreenApiChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::WhatsApp
    }

    fn markup(&self) -> Markup {
        Markup::WhatsApp
    }

    async fn is_ready(&self) -> bool {
        let response = match self.client.get(self.endpoint("getStateInstance")).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("Green-API state check failed: {}", e);
                return false;
            }
        };

        match response.json::<StateResponse>().await {
            Ok(StateResponse {
                state_instance: Some(state),
            }) => {
                info!("Green-API instance state: {}", state);
                state == "authorized"
            }
            _ => false,
        }
    }

    async fn send_text(&self, destination: &str, text: &str) -> bool {
        self.post(
            "sendMessage",
            json!({
                "chatId": destination,
                "message": text,
            }),
        )
        .await
    }

    async fn send_media(&self, destination: &str, text: &str, media_url: &str) -> bool {
        self.post(
            "sendFileByUrl",
            json!({
                "chatId": destination,
                "urlFile": media_url,
                "fileName": media_file_name(media_url),
                "caption": text,
            }),
        )
        .await
    }
}
