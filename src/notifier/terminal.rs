use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::NotifyError;
use crate::model::{Alert, NotificationEvent};
use crate::notifier::NotificationChannel;

/// Writes events to the log. Useful for dry runs; never fails.
pub struct TerminalChannel {
    enabled: bool,
}

impl TerminalChannel {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl NotificationChannel for TerminalChannel {
    fn name(&self) -> &str {
        "terminal"
    }

    fn is_enabled_for(&self, _alert: &Alert) -> bool {
        self.enabled
    }

    fn send<'a>(
        &'a self,
        event: &'a NotificationEvent,
    ) -> BoxFuture<'a, Result<(), Report<NotifyError>>> {
        Box::pin(async move {
            tracing::warn!(
                alert_id = event.alert.id,
                alert = %event.alert.name,
                kind = event.alert.condition.kind(),
                price = event.reading.price,
                source = %event.reading.source,
                "ALERT: {}: {}",
                event.title,
                event.message,
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::model::{AlertCondition, ChannelSettings, PriceReading, PriceSource, TriggerState};

    fn alert() -> Alert {
        Alert {
            id: 1,
            name: "test".into(),
            condition: AlertCondition::Below(30_000.0),
            is_active: true,
            channels: ChannelSettings::default(),
            state: TriggerState::Armed,
            trigger_count: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn enabled_flag_is_global() {
        assert!(TerminalChannel::new(true).is_enabled_for(&alert()));
        assert!(!TerminalChannel::new(false).is_enabled_for(&alert()));
    }

    #[tokio::test]
    async fn terminal_channel_always_succeeds() {
        let channel = TerminalChannel::new(true);
        let reading = PriceReading::new(29_500.0, None, "USD", PriceSource::Coinbase);
        let event = NotificationEvent::triggered(&alert(), &reading);
        assert!(channel.send(&event).await.is_ok());
    }
}
