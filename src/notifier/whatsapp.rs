use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use serde_json::{Value, json};

use crate::config::WhatsAppConfig;
use crate::error::NotifyError;
use crate::model::{Alert, NotificationEvent};
use crate::notifier::NotificationChannel;

const CHANNEL: &str = "whatsapp";

/// WhatsApp Business Cloud API template message.
///
/// Business-initiated messages must use a pre-approved template; the alert
/// name and the formatted price fill its two body parameters.
pub struct WhatsAppChannel {
    config: Option<WhatsAppConfig>,
    client: reqwest::Client,
}

impl WhatsAppChannel {
    pub fn new(config: Option<WhatsAppConfig>, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

/// Digits only, as the Cloud API expects.
fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}

/// Map an alert locale to a template language code.
fn template_language(locale: &str) -> String {
    match locale.to_lowercase().as_str() {
        "" | "en" => "en_US".to_owned(),
        "es" => "es".to_owned(),
        other => other.replace('-', "_"),
    }
}

fn build_payload(template_name: &str, event: &NotificationEvent) -> Value {
    let phone = event.alert.channels.phone_number.as_deref().unwrap_or_default();
    json!({
        "messaging_product": "whatsapp",
        "to": normalize_phone(phone),
        "type": "template",
        "template": {
            "name": template_name,
            "language": { "code": template_language(&event.alert.channels.locale) },
            "components": [{
                "type": "body",
                "parameters": [
                    { "type": "text", "text": event.alert.name },
                    { "type": "text", "text": format!("{:.2} {}", event.reading.price, event.reading.currency) },
                ]
            }]
        }
    })
}

impl NotificationChannel for WhatsAppChannel {
    fn name(&self) -> &str {
        CHANNEL
    }

    fn is_enabled_for(&self, alert: &Alert) -> bool {
        self.config.as_ref().is_some_and(|c| c.enabled)
            && alert.channels.whatsapp_enabled
            && alert
                .channels
                .phone_number
                .as_deref()
                .is_some_and(|p| !normalize_phone(p).is_empty())
    }

    fn send<'a>(
        &'a self,
        event: &'a NotificationEvent,
    ) -> BoxFuture<'a, Result<(), Report<NotifyError>>> {
        Box::pin(async move {
            let misconfigured = |field: &str| {
                Report::new(NotifyError::Misconfigured {
                    channel: CHANNEL.into(),
                    field: field.into(),
                })
            };
            let config = self
                .config
                .as_ref()
                .ok_or_else(|| misconfigured("[channels.whatsapp]"))?;
            let phone_number_id = config
                .phone_number_id
                .as_deref()
                .ok_or_else(|| misconfigured("phone_number_id"))?;
            let token = config
                .access_token
                .as_deref()
                .ok_or_else(|| misconfigured("access_token"))?;

            let url = format!(
                "{}/{}/messages",
                config.api_base_url.trim_end_matches('/'),
                phone_number_id
            );
            let response = self
                .client
                .post(&url)
                .bearer_auth(token)
                .json(&build_payload(&config.template_name, event))
                .send()
                .await
                .change_context(NotifyError::Send {
                    channel: CHANNEL.into(),
                })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(Report::new(NotifyError::Send {
                    channel: CHANNEL.into(),
                })
                .attach(format!("HTTP status: {status}"))
                .attach(body));
            }
            Ok(())
        })
    }
}
