use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error};
use serde_derive::{Deserialize, Serialize};

use crate::config::TelegramConfig;
use crate::messages::Notification;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("failed to send Telegram message: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Telegram API error: {0}")]
    Telegram(String),

    #[error("MQTT publish failed: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("no notification backend configured")]
    NoBackend,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;

    /// False when sending would deliver nowhere.
    fn has_destination(&self) -> bool {
        true
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    description: Option<String>,
}

impl TelegramResponse {
    fn into_result(self) -> Result<(), NotifyError> {
        if self.ok {
            Ok(())
        } else {
            Err(NotifyError::Telegram(
                self.description
                    .unwrap_or_else(|| "Unknown error".to_string()),
            ))
        }
    }
}

pub struct TelegramNotifier {
    client: reqwest::Client,
    url: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let base = config
            .api_base
            .as_deref()
            .unwrap_or(TELEGRAM_API_BASE)
            .trim_end_matches('/');

        Ok(TelegramNotifier {
            client,
            url: format!("{}/bot{}/sendMessage", base, config.bot_token),
            chat_id: config.chat_id.clone(),
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let text = notification.text();
        let payload = SendMessage {
            chat_id: &self.chat_id,
            text: &text,
            parse_mode: "HTML",
        };
        let response: TelegramResponse = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        response.into_result()?;
        debug!("Telegram message delivered to chat {}", self.chat_id);
        Ok(())
    }
}

/// Delivers to every backend; the first failure is reported after all were tried.
#[derive(Default)]
pub struct Notifiers {
    backends: Vec<Box<dyn Notifier>>,
}

impl Notifiers {
    pub fn push(&mut self, backend: impl Notifier + 'static) {
        self.backends.push(Box::new(backend));
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

#[async_trait]
impl Notifier for Notifiers {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut first_error = None;
        for backend in &self.backends {
            if let Err(err) = backend.send(notification).await {
                error!("Notification backend failed: {err}");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn has_destination(&self) -> bool {
        !self.is_empty()
    }
}
