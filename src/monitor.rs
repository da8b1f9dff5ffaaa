use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::cache::PriceCache;
use crate::error::MonitorError;
use crate::model::PriceReading;
use crate::resolver::PriceResolver;

/// Hook invoked with every successfully fetched reading.
///
/// Each call runs in its own task; a slow or panicking subscriber does not
/// hold up the loop or the other subscribers. `PriceMonitor::stop` waits for
/// calls still in flight.
pub trait PriceSubscriber: Send + Sync {
    fn name(&self) -> &str {
        "subscriber"
    }

    fn on_price_update(&self, reading: PriceReading) -> BoxFuture<'_, ()>;
}

struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct MonitorInner {
    resolver: Arc<PriceResolver>,
    cache: Arc<PriceCache>,
    subscribers: RwLock<Vec<Arc<dyn PriceSubscriber>>>,
    tracker: TaskTracker,
    interval: Duration,
}

/// Interval-driven price poller. Stopped until `start`, back to stopped on
/// `stop` or when the governing token is cancelled.
pub struct PriceMonitor {
    inner: Arc<MonitorInner>,
    run: Mutex<Option<RunHandle>>,
}

impl PriceMonitor {
    pub fn new(resolver: Arc<PriceResolver>, cache: Arc<PriceCache>, interval: Duration) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                resolver,
                cache,
                subscribers: RwLock::new(Vec::new()),
                tracker: TaskTracker::new(),
                interval,
            }),
            run: Mutex::new(None),
        }
    }

    pub fn cache(&self) -> Arc<PriceCache> {
        Arc::clone(&self.inner.cache)
    }

    /// Register a subscriber. Safe before or after `start`; takes effect from
    /// the next broadcast.
    pub fn subscribe(&self, subscriber: Arc<dyn PriceSubscriber>) {
        info!(subscriber = subscriber.name(), "price subscriber registered");
        self.inner.subscribers.write().push(subscriber);
    }

    /// Fetch once right away, then keep fetching every interval until `stop`
    /// or until `parent` is cancelled.
    pub async fn start(&self, parent: &CancellationToken) -> Result<(), Report<MonitorError>> {
        let mut run = self.run.lock().await;
        if run.as_ref().is_some_and(|r| !r.task.is_finished()) {
            warn!("price monitor start requested while already running");
            return Err(Report::new(MonitorError::AlreadyRunning));
        }

        let cancel = parent.child_token();
        info!(interval_secs = self.inner.interval.as_secs(), "price monitor starting");

        self.inner.fetch_and_broadcast().await;

        let inner = Arc::clone(&self.inner);
        let token = cancel.clone();
        let task = tokio::spawn(async move { inner.run_loop(token).await });

        *run = Some(RunHandle { cancel, task });
        Ok(())
    }

    /// Stop the loop and wait for it to exit, then wait for subscriber calls
    /// still in flight. A fetch already in flight is allowed to finish.
    /// Safe to call when already stopped.
    pub async fn stop(&self) {
        let handle = self.run.lock().await.take();
        match handle {
            Some(RunHandle { cancel, task }) => {
                cancel.cancel();
                if let Err(e) = task.await {
                    error!(error = %e, "price monitor task ended abnormally");
                }
            }
            None => debug!("price monitor loop not running"),
        }

        // also drains work left over after the parent token was cancelled
        let tracker = &self.inner.tracker;
        tracker.close();
        if !tracker.is_empty() {
            debug!(pending = tracker.len(), "waiting for price subscribers");
        }
        tracker.wait().await;
        tracker.reopen();
        info!("price monitor stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.run
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }
}

impl MonitorInner {
    async fn run_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately; start() already fetched
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("price monitor cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    self.fetch_and_broadcast().await;
                }
            }
        }
    }

    async fn fetch_and_broadcast(&self) {
        match self.resolver.get_current_price().await {
            Ok(reading) => {
                info!(
                    price = reading.price,
                    change = ?reading.percentage_change,
                    currency = %reading.currency,
                    source = %reading.source,
                    "price fetched"
                );
                // cache first, so subscribers see at least this reading
                self.cache.add(&reading);
                self.broadcast(reading);
            }
            Err(e) => {
                warn!(error = ?e, "price fetch failed, retrying next interval");
            }
        }
    }

    fn broadcast(&self, reading: PriceReading) {
        let subscribers: Vec<Arc<dyn PriceSubscriber>> = self.subscribers.read().clone();

        for subscriber in subscribers {
            let reading = reading.clone();
            self.tracker.spawn(async move {
                let update = AssertUnwindSafe(subscriber.on_price_update(reading));
                if let Err(panic) = update.catch_unwind().await {
                    error!(
                        subscriber = subscriber.name(),
                        panic = panic_message(panic.as_ref()),
                        "price subscriber panicked"
                    );
                }
            });
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
