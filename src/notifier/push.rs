use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use serde::Serialize;

use crate::config::PushConfig;
use crate::error::NotifyError;
use crate::model::{Alert, AlertCondition, NotificationEvent};
use crate::notifier::NotificationChannel;

const CHANNEL: &str = "push";

/// ntfy-style push, published as JSON to the server root so non-ASCII titles
/// survive.
pub struct PushChannel {
    config: Option<PushConfig>,
    client: reqwest::Client,
}

impl PushChannel {
    pub fn new(config: Option<PushConfig>, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

#[derive(Debug, Serialize)]
struct Publish<'a> {
    topic: &'a str,
    title: &'a str,
    message: &'a str,
    priority: u8,
    tags: [&'static str; 1],
}

fn build_payload<'a>(topic: &'a str, event: &'a NotificationEvent) -> Publish<'a> {
    Publish {
        topic,
        title: &event.title,
        message: &event.message,
        priority: 4,
        tags: [tags(event)],
    }
}

fn tags(event: &NotificationEvent) -> &'static str {
    let rising = match &event.alert.condition {
        AlertCondition::Above(_) => true,
        AlertCondition::Below(_) => false,
        AlertCondition::Change(threshold) => *threshold > 0.0,
        AlertCondition::Unsupported { .. } => return "bell",
    };
    if rising {
        "chart_with_upwards_trend"
    } else {
        "chart_with_downwards_trend"
    }
}

fn publish_url(server_url: &str) -> String {
    format!("{}/", server_url.trim_end_matches('/'))
}

impl NotificationChannel for PushChannel {
    fn name(&self) -> &str {
        CHANNEL
    }

    fn is_enabled_for(&self, alert: &Alert) -> bool {
        self.config.as_ref().is_some_and(|c| c.enabled) && alert.channels.push_enabled
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
                .ok_or_else(|| misconfigured("[channels.push]"))?;
            let topic = config
                .topic
                .as_deref()
                .filter(|t| !t.trim().is_empty())
                .ok_or_else(|| misconfigured("topic"))?;

            let mut request = self
                .client
                .post(publish_url(&config.server_url))
                .json(&build_payload(topic, event));
            if let Some(token) = config.access_token.as_deref() {
                request = request.bearer_auth(token);
            }

            let response = request.send().await.change_context(NotifyError::Send {
                channel: CHANNEL.into(),
            })?;

            if !response.status().is_success() {
                return Err(Report::new(NotifyError::Send {
                    channel: CHANNEL.into(),
                })
                .attach(format!("HTTP status: {}", response.status())));
            }
            Ok(())
        })
    }
}
