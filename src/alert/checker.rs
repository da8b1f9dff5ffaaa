use std::sync::Arc;

use chrono::Utc;
use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::alert::condition::should_trigger;
use crate::error::AlertError;
use crate::model::{Alert, AlertCondition, NotificationEvent, PriceReading};
use crate::monitor::PriceSubscriber;
use crate::notifier::{DispatchReport, Dispatcher};
use crate::storage::AlertRepository;

/// Evaluates every active alert against each new reading.
#[derive(Clone)]
pub struct AlertChecker {
    repository: Arc<dyn AlertRepository>,
    dispatcher: Arc<Dispatcher>,
}

impl AlertChecker {
    pub fn new(repository: Arc<dyn AlertRepository>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            repository,
            dispatcher,
        }
    }

    /// Check one alert and, if it fires, claim the trigger and notify.
    ///
    /// The trigger is persisted before any channel is contacted, so a slow
    /// or failing channel cannot make the alert fire again on the next tick.
    /// Returns whether this call fired the alert.
    pub async fn check_alert(
        &self,
        mut alert: Alert,
        reading: &PriceReading,
    ) -> Result<bool, Report<AlertError>> {
        if !should_trigger(&alert, reading) {
            if matches!(alert.condition, AlertCondition::Change(_))
                && !reading.source.supplies_percentage_change()
            {
                debug!(
                    alert_id = alert.id,
                    source = %reading.source,
                    "source reports no 24h change, change alert not evaluated"
                );
            }
            return Ok(false);
        }

        let at = Utc::now();
        let claimed = self
            .repository
            .claim_trigger(alert.id, at)
            .await
            .change_context(AlertError::Storage)
            .attach_with(|| format!("alert id: {}", alert.id))?;
        if !claimed {
            debug!(alert_id = alert.id, "alert already triggered or paused, skipping");
            return Ok(false);
        }

        alert.mark_triggered(at);
        info!(
            alert_id = alert.id,
            alert = %alert.name,
            kind = alert.condition.kind(),
            price = reading.price,
            "alert triggered"
        );

        let event = NotificationEvent::triggered(&alert, reading);
        if let Err(e) = self.dispatcher.dispatch(&event).await {
            warn!(alert_id = alert.id, error = ?e, "alert notification failed");
        }
        Ok(true)
    }

    /// Send a test notification for `alert` without touching its state.
    pub async fn test_alert(
        &self,
        alert: &Alert,
        reading: &PriceReading,
    ) -> Result<DispatchReport, Report<AlertError>> {
        let event = NotificationEvent::test(alert, reading);
        self.dispatcher
            .dispatch(&event)
            .await
            .change_context(AlertError::Notify)
            .attach_with(|| format!("alert id: {}", alert.id))
    }

    async fn check_all(&self, reading: PriceReading) {
        let alerts = match self.repository.get_active_alerts().await {
            Ok(alerts) => alerts,
            Err(e) => {
                error!(error = ?e, "failed to load active alerts");
                return;
            }
        };
        debug!(count = alerts.len(), price = reading.price, "checking alerts");

        let mut tasks = JoinSet::new();
        for alert in alerts {
            let checker = self.clone();
            let reading = reading.clone();
            tasks.spawn(async move {
                let id = alert.id;
                (id, checker.check_alert(alert, &reading).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(_))) => {}
                Ok((alert_id, Err(e))) => {
                    error!(alert_id, error = ?e, "failed to process alert");
                }
                Err(e) => error!(error = %e, "alert check task panicked"),
            }
        }
    }
}

impl PriceSubscriber for AlertChecker {
    fn name(&self) -> &str {
        "alert-checker"
    }

    fn on_price_update(&self, reading: PriceReading) -> BoxFuture<'_, ()> {
        Box::pin(self.check_all(reading))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use chrono::DateTime;
    use parking_lot::Mutex;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::alert::AlertDraft;
    use crate::cache::PriceCache;
    use crate::error::{NotifyError, ProviderError, StorageError};
    use crate::model::{ChannelSettings, PriceSource, TriggerState};
    use crate::monitor::PriceMonitor;
    use crate::notifier::NotificationChannel;
    use crate::provider::PriceProvider;
    use crate::resolver::PriceResolver;
    use crate::storage::{NotificationAttempt, NotificationLog};

    #[derive(Default)]
    struct MemoryRepo {
        alerts: Mutex<HashMap<i64, Alert>>,
        fail_writes: bool,
    }

    impl MemoryRepo {
        fn with(alerts: Vec<Alert>) -> Arc<Self> {
            Arc::new(Self {
                alerts: Mutex::new(alerts.into_iter().map(|a| (a.id, a)).collect()),
                fail_writes: false,
            })
        }

        fn get(&self, id: i64) -> Alert {
            self.alerts.lock()[&id].clone()
        }
    }

    impl AlertRepository for MemoryRepo {
        fn get_active_alerts(&self) -> BoxFuture<'_, Result<Vec<Alert>, Report<StorageError>>> {
            Box::pin(async move {
                Ok(self
                    .alerts
                    .lock()
                    .values()
                    .filter(|a| a.is_active)
                    .cloned()
                    .collect())
            })
        }

        fn get_alert(&self, id: i64) -> BoxFuture<'_, Result<Alert, Report<StorageError>>> {
            Box::pin(async move {
                self.alerts
                    .lock()
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| Report::new(StorageError::NotFound { id }))
            })
        }

        fn update_alert(&self, alert: &Alert) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
            let alert = alert.clone();
            Box::pin(async move {
                if self.fail_writes {
                    return Err(Report::new(StorageError::Update));
                }
                self.alerts.lock().insert(alert.id, alert);
                Ok(())
            })
        }

        fn claim_trigger(
            &self,
            id: i64,
            at: DateTime<Utc>,
        ) -> BoxFuture<'_, Result<bool, Report<StorageError>>> {
            Box::pin(async move {
                if self.fail_writes {
                    return Err(Report::new(StorageError::Update));
                }
                let mut alerts = self.alerts.lock();
                match alerts.get_mut(&id) {
                    Some(alert) if alert.is_active && alert.last_triggered_at().is_none() => {
                        alert.mark_triggered(at);
                        Ok(true)
                    }
                    _ => Ok(false),
                }
            })
        }

        fn insert_alert(
            &self,
            _draft: &AlertDraft,
        ) -> BoxFuture<'_, Result<Alert, Report<StorageError>>> {
            Box::pin(async move { Err(Report::new(StorageError::Insert)) })
        }

        fn list_alerts(&self) -> BoxFuture<'_, Result<Vec<Alert>, Report<StorageError>>> {
            Box::pin(async move { Ok(self.alerts.lock().values().cloned().collect()) })
        }

        fn delete_alert(&self, id: i64) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
            Box::pin(async move {
                self.alerts.lock().remove(&id);
                Ok(())
            })
        }
    }

    struct NullLog;

    impl NotificationLog for NullLog {
        fn log_attempt(
            &self,
            _attempt: &NotificationAttempt,
        ) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
            Box::pin(async { Ok(()) })
        }
    }

    struct RecordingChannel {
        name: &'static str,
        succeed: bool,
        delay: Duration,
        titles: Mutex<Vec<String>>,
    }

    impl RecordingChannel {
        fn new(name: &'static str, succeed: bool, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name,
                succeed,
                delay,
                titles: Mutex::new(Vec::new()),
            })
        }

        fn sends(&self) -> usize {
            self.titles.lock().len()
        }
    }

    impl NotificationChannel for RecordingChannel {
        fn name(&self) -> &str {
            self.name
        }

        fn is_enabled_for(&self, _alert: &Alert) -> bool {
            true
        }

        fn send<'a>(
            &'a self,
            event: &'a NotificationEvent,
        ) -> BoxFuture<'a, Result<(), Report<NotifyError>>> {
            Box::pin(async move {
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                self.titles.lock().push(event.title.clone());
                if self.succeed {
                    Ok(())
                } else {
                    Err(Report::new(NotifyError::Send {
                        channel: self.name.to_owned(),
                    }))
                }
            })
        }
    }

    struct FixedProvider(f64);

    impl PriceProvider for FixedProvider {
        fn source(&self) -> PriceSource {
            PriceSource::Coinbase
        }

        fn fetch_price(&self) -> BoxFuture<'_, Result<PriceReading, Report<ProviderError>>> {
            Box::pin(async move {
                Ok(PriceReading::new(self.0, None, "USD", PriceSource::Coinbase))
            })
        }
    }

    fn make_alert(id: i64, condition: AlertCondition) -> Alert {
        Alert {
            id,
            name: format!("alert-{id}"),
            condition,
            is_active: true,
            channels: ChannelSettings {
                locale: "en".into(),
                ..ChannelSettings::default()
            },
            state: TriggerState::Armed,
            trigger_count: 0,
            created_at: Utc::now(),
        }
    }

    fn checker_with(repo: Arc<MemoryRepo>, channels: &[Arc<RecordingChannel>]) -> AlertChecker {
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(NullLog)));
        for channel in channels {
            dispatcher.add_channel(channel.clone());
        }
        AlertChecker::new(repo, dispatcher)
    }

    fn checker(repo: Arc<MemoryRepo>, succeed: bool) -> (AlertChecker, Arc<RecordingChannel>) {
        let channel = RecordingChannel::new("recording", succeed, Duration::ZERO);
        (checker_with(repo, &[channel.clone()]), channel)
    }

    fn reading(price: f64) -> PriceReading {
        PriceReading::new(price, Some(1.0), "USD", PriceSource::Binance)
    }

    #[tokio::test]
    async fn trigger_notifies_and_persists() {
        let repo = MemoryRepo::with(vec![make_alert(1, AlertCondition::Above(100.0))]);
        let (checker, channel) = checker(repo.clone(), true);

        let fired = checker.check_alert(repo.get(1), &reading(150.0)).await.unwrap();
        assert!(fired);
        assert_eq!(channel.sends(), 1);

        let stored = repo.get(1);
        assert!(stored.last_triggered_at().is_some());
        assert_eq!(stored.trigger_count, 1);
    }

    #[tokio::test]
    async fn no_trigger_leaves_alert_untouched() {
        let repo = MemoryRepo::with(vec![make_alert(1, AlertCondition::Above(100.0))]);
        let (checker, channel) = checker(repo.clone(), true);

        let fired = checker.check_alert(repo.get(1), &reading(50.0)).await.unwrap();
        assert!(!fired);
        assert_eq!(channel.sends(), 0);
        assert_eq!(repo.get(1).state, TriggerState::Armed);
    }

    #[tokio::test]
    async fn failed_notification_still_records_trigger() {
        let repo = MemoryRepo::with(vec![make_alert(1, AlertCondition::Below(100.0))]);
        let (checker, _channel) = checker(repo.clone(), false);

        assert!(checker.check_alert(repo.get(1), &reading(50.0)).await.unwrap());
        assert!(repo.get(1).last_triggered_at().is_some());

        // already triggered: a second reading does nothing
        assert!(!checker.check_alert(repo.get(1), &reading(10.0)).await.unwrap());
        assert_eq!(repo.get(1).trigger_count, 1);
    }

    #[tokio::test]
    async fn stale_snapshot_does_not_fire_twice() {
        let repo = MemoryRepo::with(vec![make_alert(1, AlertCondition::Above(100.0))]);
        let (checker, channel) = checker(repo.clone(), true);
        let snapshot = repo.get(1);

        assert!(checker.check_alert(snapshot.clone(), &reading(150.0)).await.unwrap());
        // the same armed copy read before the trigger was recorded
        assert!(!checker.check_alert(snapshot, &reading(150.0)).await.unwrap());
        assert_eq!(channel.sends(), 1);
        assert_eq!(repo.get(1).trigger_count, 1);
    }

    #[tokio::test]
    async fn persistence_failure_is_reported_before_sending() {
        let repo = Arc::new(MemoryRepo {
            alerts: Mutex::new(HashMap::from([(
                1,
                make_alert(1, AlertCondition::Above(1.0)),
            )])),
            fail_writes: true,
        });
        let (checker, channel) = checker(repo.clone(), true);

        let err = checker
            .check_alert(repo.get(1), &reading(2.0))
            .await
            .unwrap_err();
        assert!(matches!(err.current_context(), AlertError::Storage));
        assert_eq!(channel.sends(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_during_slow_dispatch_is_kept() {
        let repo = MemoryRepo::with(vec![make_alert(1, AlertCondition::Above(100.0))]);
        let slow = RecordingChannel::new("slow", true, Duration::from_secs(45));
        let checker = checker_with(repo.clone(), &[slow.clone()]);

        let alert = repo.get(1);
        let task = tokio::spawn({
            let checker = checker.clone();
            async move { checker.check_alert(alert, &reading(150.0)).await }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        repo.alerts.lock().get_mut(&1).unwrap().toggle();

        assert!(task.await.unwrap().unwrap());
        let stored = repo.get(1);
        assert!(!stored.is_active);
        assert_eq!(stored.trigger_count, 1);
        assert_eq!(slow.sends(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_channel_does_not_refire_on_next_tick() {
        let repo = MemoryRepo::with(vec![make_alert(1, AlertCondition::Above(100.0))]);
        let fast = RecordingChannel::new("fast", true, Duration::ZERO);
        let slow = RecordingChannel::new("slow", true, Duration::from_secs(45));
        let checker = checker_with(repo.clone(), &[fast.clone(), slow.clone()]);

        let resolver = Arc::new(PriceResolver::new(
            vec![Arc::new(FixedProvider(150.0)) as Arc<dyn PriceProvider>],
            Duration::from_secs(5),
        ));
        let monitor = PriceMonitor::new(
            resolver,
            Arc::new(PriceCache::new(5)),
            Duration::from_secs(30),
        );
        monitor.subscribe(Arc::new(checker));

        let token = CancellationToken::new();
        monitor.start(&token).await.unwrap();
        tokio::time::sleep(Duration::from_secs(100)).await;
        monitor.stop().await;

        assert_eq!(fast.sends(), 1);
        assert_eq!(slow.sends(), 1);
        assert_eq!(repo.get(1).trigger_count, 1);
    }

    #[tokio::test]
    async fn price_update_checks_every_active_alert() {
        let mut inactive = make_alert(3, AlertCondition::Above(1.0));
        inactive.is_active = false;
        let repo = MemoryRepo::with(vec![
            make_alert(1, AlertCondition::Above(100.0)),
            make_alert(2, AlertCondition::Below(100.0)),
            inactive,
        ]);
        let (checker, channel) = checker(repo.clone(), true);

        checker.on_price_update(reading(150.0)).await;

        assert!(repo.get(1).last_triggered_at().is_some());
        assert!(repo.get(2).last_triggered_at().is_none());
        assert!(repo.get(3).last_triggered_at().is_none());
        assert_eq!(channel.sends(), 1);
    }

    #[tokio::test]
    async fn test_notification_does_not_change_state() {
        let repo = MemoryRepo::with(vec![make_alert(1, AlertCondition::Above(1e9))]);
        let (checker, channel) = checker(repo.clone(), true);

        let report = checker.test_alert(&repo.get(1), &reading(10.0)).await.unwrap();
        assert_eq!(report.sent, vec!["recording".to_owned()]);
        assert!(channel.titles.lock()[0].starts_with("Test notification"));
        assert_eq!(repo.get(1).state, TriggerState::Armed);
        assert_eq!(repo.get(1).trigger_count, 0);
    }
}
