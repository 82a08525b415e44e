use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use watch_core::{AlertDispatcher, ChatId, DispatchError};

use crate::NotificationError;

const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Telegram Bot API client: delivers alerts and long-polls for commands.
pub struct TelegramClient {
    client: Client,
    api_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

impl TelegramClient {
    pub fn new(token: String, timeout: Duration) -> Result<Self, NotificationError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotificationError::Http(e.to_string()))?;

        Ok(Self {
            client,
            api_url: DEFAULT_API_URL.to_string(),
            token,
        })
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.token, method)
    }

    /// Send a Markdown message to `chat`.
    pub async fn send_message(&self, chat: ChatId, text: &str) -> Result<(), NotificationError> {
        let payload = json!({
            "chat_id": chat.0,
            "text": text,
            "parse_mode": "Markdown",
            "disable_web_page_preview": false,
        });

        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotificationError::Http(e.to_string()))?;

        let body = response
            .text()
            .await
            .map_err(|e| NotificationError::Http(e.to_string()))?;

        decode::<serde_json::Value>(&body)?;
        tracing::debug!(chat_id = chat.0, "Telegram message sent");
        Ok(())
    }

    /// Long-poll for updates after `offset`. The request outlives the poll window.
    pub async fn get_updates(&self, offset: Option<i64>, poll_secs: u64) -> Result<Vec<Update>, NotificationError> {
        let mut payload = json!({
            "timeout": poll_secs,
            "allowed_updates": ["message"],
        });
        if let Some(offset) = offset {
            payload["offset"] = json!(offset);
        }

        let response = self
            .client
            .post(self.method_url("getUpdates"))
            .timeout(Duration::from_secs(poll_secs + 10))
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotificationError::Http(e.to_string()))?;

        let body = response
            .text()
            .await
            .map_err(|e| NotificationError::Http(e.to_string()))?;

        decode(&body)
    }
}

#[async_trait]
impl AlertDispatcher for TelegramClient {
    async fn send(&self, destination: ChatId, text: &str) -> Result<(), DispatchError> {
        Ok(self.send_message(destination, text).await?)
    }

    fn name(&self) -> &str {
        "telegram"
    }
}

/// Unwrap the Bot API envelope. `ok: false` becomes an API error carrying the description.
fn decode<T: DeserializeOwned>(body: &str) -> Result<T, NotificationError> {
    let envelope: ApiResponse<T> =
        serde_json::from_str(body).map_err(|e| NotificationError::Decode(e.to_string()))?;

    if !envelope.ok {
        return Err(NotificationError::Api(
            envelope.description.unwrap_or_else(|| "unknown error".to_string()),
        ));
    }
    envelope
        .result
        .ok_or_else(|| NotificationError::Decode("missing result".to_string()))
}
