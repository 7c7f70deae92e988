use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::notifier::{Notifier, NotifierError, SendOptions};

const API_BASE: &str = "https://api.telegram.org";

/// Attempts per message; only 429 responses are retried.
const MAX_ATTEMPTS: u32 = 3;

const DEFAULT_RETRY_AFTER_SEC: u64 = 1;

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    error_code: Option<i64>,
    description: Option<String>,
    parameters: Option<ApiParameters>,
}

#[derive(Debug, Deserialize)]
struct ApiParameters {
    retry_after: Option<u64>,
}

pub struct TelegramNotifier {
    client: reqwest::Client,
    token: String,
}

impl TelegramNotifier {
    pub fn new(token: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            token: token.to_string(),
        }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", API_BASE, self.token, method)
    }

    async fn call(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> std::result::Result<(), NotifierError> {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let response = self
                .client
                .post(self.url(method))
                .json(body)
                .send()
                .await?;
            let parsed: ApiResponse = response.json().await?;

            if parsed.ok {
                return Ok(());
            }

            let code = parsed.error_code.unwrap_or(0);
            if code == 429 && attempt < MAX_ATTEMPTS {
                let wait = parsed
                    .parameters
                    .and_then(|p| p.retry_after)
                    .unwrap_or(DEFAULT_RETRY_AFTER_SEC);
                tracing::warn!("rate limited, retrying in {}s (attempt {})", wait, attempt);
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }

            return Err(NotifierError::Api {
                code,
                description: parsed.description.unwrap_or_else(|| "unknown error".into()),
            });
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        opts: SendOptions,
    ) -> std::result::Result<(), NotifierError> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
            "link_preview_options": { "is_disabled": opts.disable_preview },
        });
        if opts.parse_html {
            body["parse_mode"] = json!("HTML");
        }

        self.call("sendMessage", &body).await
    }
}
