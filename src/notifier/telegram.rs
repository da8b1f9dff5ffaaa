use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::config::TelegramConfig;
use crate::error::NotifyError;
use crate::model::{Alert, NotificationEvent};
use crate::notifier::NotificationChannel;

const CHANNEL: &str = "telegram";

/// Telegram Bot API `sendMessage`.
pub struct TelegramChannel {
    config: Option<TelegramConfig>,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(config: Option<TelegramConfig>, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: String,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
}

fn build_payload<'a>(chat_id: &'a str, event: &NotificationEvent) -> SendMessage<'a> {
    SendMessage {
        chat_id,
        text: format!("{}\n\n{}", event.title, event.message),
        disable_web_page_preview: true,
    }
}

fn send_error() -> NotifyError {
    NotifyError::Send {
        channel: CHANNEL.into(),
    }
}

impl NotificationChannel for TelegramChannel {
    fn name(&self) -> &str {
        CHANNEL
    }

    fn is_enabled_for(&self, alert: &Alert) -> bool {
        self.config.as_ref().is_some_and(|c| c.enabled)
            && alert.channels.telegram_enabled
            && alert
                .channels
                .telegram_chat_id
                .as_deref()
                .is_some_and(|id| !id.trim().is_empty())
    }

    fn send<'a>(
        &'a self,
        event: &'a NotificationEvent,
    ) -> BoxFuture<'a, Result<(), Report<NotifyError>>> {
        Box::pin(async move {
            let config = self.config.as_ref().ok_or_else(|| {
                Report::new(NotifyError::Misconfigured {
                    channel: CHANNEL.into(),
                    field: "[channels.telegram]".into(),
                })
            })?;
            let token = config.bot_token.as_deref().ok_or_else(|| {
                Report::new(NotifyError::Misconfigured {
                    channel: CHANNEL.into(),
                    field: "bot_token".into(),
                })
            })?;
            let chat_id = event
                .alert
                .channels
                .telegram_chat_id
                .as_deref()
                .ok_or_else(|| Report::new(send_error()).attach("alert has no chat id"))?;

            let url = format!("{}/bot{}/sendMessage", config.api_base_url, token);
            let response = self
                .client
                .post(&url)
                .json(&build_payload(chat_id, event))
                .send()
                .await
                .change_context(send_error())?;

            let status = response.status();
            let body: ApiResponse = response
                .json()
                .await
                .change_context(send_error())
                .attach_with(|| format!("HTTP status: {status}"))?;

            if !status.is_success() || !body.ok {
                return Err(Report::new(send_error()).attach(format!(
                    "HTTP status: {status}, description: {}",
                    body.description.unwrap_or_default()
                )));
            }
            Ok(())
        })
    }
}
