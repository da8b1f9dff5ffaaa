pub mod email;
pub mod message;
pub mod push;
pub mod telegram;
pub mod terminal;
pub mod whatsapp;

use std::sync::Arc;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use futures::future::{BoxFuture, join_all};
use parking_lot::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ChannelsConfig;
use crate::error::NotifyError;
use crate::model::{Alert, NotificationEvent};
use crate::storage::{AttemptStatus, NotificationAttempt, NotificationLog};

use email::EmailChannel;
use push::PushChannel;
use telegram::TelegramChannel;
use terminal::TerminalChannel;
use whatsapp::WhatsAppChannel;

/// One notification transport.
///
/// `is_enabled_for` must not fail: a channel that is switched off, or an
/// alert without the destination it needs, simply reports `false`. A channel
/// that is switched on but lacks credentials fails in `send` instead.
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    fn is_enabled_for(&self, alert: &Alert) -> bool;

    fn send<'a>(
        &'a self,
        event: &'a NotificationEvent,
    ) -> BoxFuture<'a, Result<(), Report<NotifyError>>>;
}

/// Shared client for the HTTP channels. Every request is bounded by
/// `timeout`, so one stalled endpoint cannot hold up a dispatch forever.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, Report<NotifyError>> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .user_agent(concat!("price-alert/", env!("CARGO_PKG_VERSION")))
        .build()
        .change_context(NotifyError::Client)
}

/// Channel names that succeeded and failed in one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: Vec<String>,
    pub failed: Vec<String>,
}

/// Fans an event out to every enabled channel.
pub struct Dispatcher {
    channels: RwLock<Vec<Arc<dyn NotificationChannel>>>,
    log: Arc<dyn NotificationLog>,
}

impl Dispatcher {
    pub fn new(log: Arc<dyn NotificationLog>) -> Self {
        Self {
            channels: RwLock::new(Vec::new()),
            log,
        }
    }

    /// Register every channel known to the config, in a fixed order.
    pub fn from_config(
        config: &ChannelsConfig,
        log: Arc<dyn NotificationLog>,
    ) -> Result<Self, Report<NotifyError>> {
        let timeout = config.send_timeout();
        let client = build_client(timeout)?;

        let dispatcher = Self::new(log);
        dispatcher.add_channel(Arc::new(EmailChannel::new(config.email.clone(), timeout)));
        dispatcher.add_channel(Arc::new(TelegramChannel::new(
            config.telegram.clone(),
            client.clone(),
        )));
        dispatcher.add_channel(Arc::new(PushChannel::new(config.push.clone(), client.clone())));
        dispatcher.add_channel(Arc::new(WhatsAppChannel::new(config.whatsapp.clone(), client)));
        dispatcher.add_channel(Arc::new(TerminalChannel::new(
            config.terminal.as_ref().is_some_and(|t| t.enabled),
        )));
        Ok(dispatcher)
    }

    /// Add a channel, replacing any channel with the same name in place.
    pub fn add_channel(&self, channel: Arc<dyn NotificationChannel>) {
        let mut channels = self.channels.write();
        match channels.iter().position(|c| c.name() == channel.name()) {
            Some(index) => channels[index] = channel,
            None => channels.push(channel),
        }
    }

    pub fn remove_channel(&self, name: &str) -> bool {
        let mut channels = self.channels.write();
        let before = channels.len();
        channels.retain(|c| c.name() != name);
        channels.len() != before
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels
            .read()
            .iter()
            .map(|c| c.name().to_owned())
            .collect()
    }

    /// Send `event` through every channel enabled for its alert.
    ///
    /// Succeeds when at least one channel delivered. Each attempt is written
    /// to the notification log; a log failure does not fail the dispatch.
    pub async fn dispatch(
        &self,
        event: &NotificationEvent,
    ) -> Result<DispatchReport, Report<NotifyError>> {
        let dispatch_id = Uuid::new_v4();
        // snapshot so add/remove during a dispatch does not affect it
        let channels: Vec<Arc<dyn NotificationChannel>> = self.channels.read().clone();

        let enabled: Vec<Arc<dyn NotificationChannel>> = channels
            .into_iter()
            .filter(|c| c.is_enabled_for(&event.alert))
            .collect();

        if enabled.is_empty() {
            warn!(%dispatch_id, alert_id = event.alert.id, "no notification channel enabled");
            return Err(Report::new(NotifyError::NoChannelEnabled)
                .attach(format!("alert id: {}", event.alert.id)));
        }

        let outcomes = join_all(enabled.iter().map(|channel| async move {
            (channel.name().to_owned(), channel.send(event).await)
        }))
        .await;

        let mut report = DispatchReport::default();
        for (channel, outcome) in outcomes {
            let attempt = match outcome {
                Ok(()) => {
                    info!(%dispatch_id, alert_id = event.alert.id, channel = %channel, "notification sent");
                    report.sent.push(channel.clone());
                    NotificationAttempt {
                        alert_id: event.alert.id,
                        channel,
                        status: AttemptStatus::Sent,
                        message: event.message.clone(),
                        error: None,
                    }
                }
                Err(e) => {
                    warn!(%dispatch_id, alert_id = event.alert.id, channel = %channel, error = ?e, "notification failed");
                    report.failed.push(channel.clone());
                    NotificationAttempt {
                        alert_id: event.alert.id,
                        channel,
                        status: AttemptStatus::Failed,
                        message: event.message.clone(),
                        error: Some(format!("{e:?}")),
                    }
                }
            };

            if let Err(e) = self.log.log_attempt(&attempt).await {
                warn!(%dispatch_id, error = ?e, "failed to record notification attempt");
            }
        }

        if report.sent.is_empty() {
            let attempted = report.failed.len();
            return Err(Report::new(NotifyError::AllChannelsFailed { attempted })
                .attach(format!("failed channels: {}", report.failed.join(", "))));
        }

        Ok(report)
    }
}
