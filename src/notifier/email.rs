use std::time::Duration;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::EmailConfig;
use crate::error::NotifyError;
use crate::model::{Alert, NotificationEvent};
use crate::notifier::NotificationChannel;

const CHANNEL: &str = "email";

/// SMTP delivery over a STARTTLS relay.
pub struct EmailChannel {
    config: Option<EmailConfig>,
    timeout: Duration,
}

impl EmailChannel {
    pub fn new(config: Option<EmailConfig>, timeout: Duration) -> Self {
        Self { config, timeout }
    }
}

fn send_error() -> NotifyError {
    NotifyError::Send {
        channel: CHANNEL.into(),
    }
}

fn build_message(
    from: &str,
    to: &str,
    event: &NotificationEvent,
) -> Result<Message, Report<NotifyError>> {
    let from: Mailbox = from
        .parse()
        .change_context(NotifyError::Misconfigured {
            channel: CHANNEL.into(),
            field: "from_address".into(),
        })
        .attach_with(|| format!("from_address: {from}"))?;
    let to: Mailbox = to
        .parse()
        .change_context(send_error())
        .attach_with(|| format!("recipient: {to}"))?;

    Message::builder()
        .from(from)
        .to(to)
        .subject(event.title.as_str())
        .header(ContentType::TEXT_PLAIN)
        .body(event.message.clone())
        .change_context(send_error())
}

impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        CHANNEL
    }

    fn is_enabled_for(&self, alert: &Alert) -> bool {
        self.config.as_ref().is_some_and(|c| c.enabled)
            && alert.channels.email_enabled
            && alert
                .channels
                .email
                .as_deref()
                .is_some_and(|e| !e.trim().is_empty())
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
                .ok_or_else(|| misconfigured("[channels.email]"))?;
            let host = config
                .smtp_host
                .as_deref()
                .ok_or_else(|| misconfigured("smtp_host"))?;
            let from = config
                .from_address
                .as_deref()
                .ok_or_else(|| misconfigured("from_address"))?;
            let to = event
                .alert
                .channels
                .email
                .as_deref()
                .ok_or_else(|| Report::new(send_error()).attach("alert has no email address"))?;

            let message = build_message(from, to, event)?;

            let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .change_context(send_error())
                .attach_with(|| format!("smtp host: {host}"))?
                .port(config.smtp_port)
                .timeout(Some(self.timeout));
            if let (Some(username), Some(password)) = (&config.username, &config.password) {
                builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
            }

            builder
                .build()
                .send(message)
                .await
                .change_context(send_error())
                .attach_with(|| format!("smtp host: {host}:{}", config.smtp_port))?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::model::{AlertCondition, ChannelSettings, PriceReading, PriceSource, TriggerState};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn alert(email: Option<&str>) -> Alert {
        Alert {
            id: 2,
            name: "btc".into(),
            condition: AlertCondition::Above(70_000.0),
            is_active: true,
            channels: ChannelSettings {
                email_enabled: true,
                email: email.map(str::to_owned),
                locale: "en".into(),
                ..ChannelSettings::default()
            },
            state: TriggerState::Armed,
            trigger_count: 0,
            created_at: Utc::now(),
        }
    }

    fn config(host: Option<&str>) -> EmailConfig {
        EmailConfig {
            enabled: true,
            smtp_host: host.map(str::to_owned),
            smtp_port: 587,
            username: None,
            password: None,
            from_address: Some("Alerts <alerts@example.com>".into()),
        }
    }

    fn event(email: Option<&str>) -> NotificationEvent {
        let reading = PriceReading::new(70_100.0, Some(4.0), "USD", PriceSource::Binance);
        NotificationEvent::triggered(&alert(email), &reading)
    }

    #[test]
    fn enabled_requires_address() {
        let channel = EmailChannel::new(Some(config(Some("smtp.example.com"))), TIMEOUT);
        assert!(channel.is_enabled_for(&alert(Some("me@example.com"))));
        assert!(!channel.is_enabled_for(&alert(None)));
        let unconfigured = EmailChannel::new(None, TIMEOUT);
        assert!(!unconfigured.is_enabled_for(&alert(Some("me@example.com"))));
    }

    #[test]
    fn builds_message_with_subject() {
        let message = build_message("alerts@example.com", "me@example.com", &event(None)).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("Subject: Price alert: btc"));
        assert!(raw.contains("To: me@example.com"));
    }

    #[test]
    fn invalid_recipient_is_rejected() {
        let err = build_message("alerts@example.com", "not-an-address", &event(None)).unwrap_err();
        assert!(matches!(err.current_context(), NotifyError::Send { .. }));
    }

    #[tokio::test]
    async fn missing_host_is_a_send_failure() {
        let channel = EmailChannel::new(Some(config(None)), TIMEOUT);
        let err = channel
            .send(&event(Some("me@example.com")))
            .await
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            NotifyError::Misconfigured { .. }
        ));
    }
}
