use std::sync::Arc;

use error_stack::{Report, ResultExt};
use tracing::info;

use crate::alert::NewAlert;
use crate::alert::checker::AlertChecker;
use crate::cache::PriceCache;
use crate::error::AlertError;
use crate::model::{Alert, PriceReading};
use crate::notifier::DispatchReport;
use crate::resolver::PriceResolver;
use crate::storage::AlertRepository;

/// Alert management on top of the repository.
pub struct AlertService {
    repository: Arc<dyn AlertRepository>,
    checker: AlertChecker,
    cache: Arc<PriceCache>,
    resolver: Arc<PriceResolver>,
}

impl AlertService {
    pub fn new(
        repository: Arc<dyn AlertRepository>,
        checker: AlertChecker,
        cache: Arc<PriceCache>,
        resolver: Arc<PriceResolver>,
    ) -> Self {
        Self {
            repository,
            checker,
            cache,
            resolver,
        }
    }

    pub async fn create_alert(&self, input: NewAlert) -> Result<Alert, Report<AlertError>> {
        let draft = input.validate()?;
        let alert = self
            .repository
            .insert_alert(&draft)
            .await
            .change_context(AlertError::Storage)?;
        info!(alert_id = alert.id, kind = alert.condition.kind(), "alert created");
        Ok(alert)
    }

    /// Replace name, condition and channels. Trigger state is left alone.
    pub async fn update_alert(
        &self,
        id: i64,
        input: NewAlert,
    ) -> Result<Alert, Report<AlertError>> {
        let draft = input.validate()?;
        self.modify(id, |alert| alert.apply(draft)).await
    }

    pub async fn toggle_alert(&self, id: i64) -> Result<Alert, Report<AlertError>> {
        self.modify(id, Alert::toggle).await
    }

    pub async fn reset_alert(&self, id: i64) -> Result<Alert, Report<AlertError>> {
        self.modify(id, Alert::reset).await
    }

    pub async fn delete_alert(&self, id: i64) -> Result<(), Report<AlertError>> {
        self.repository
            .delete_alert(id)
            .await
            .change_context(AlertError::Storage)?;
        info!(alert_id = id, "alert deleted");
        Ok(())
    }

    pub async fn list_alerts(&self) -> Result<Vec<Alert>, Report<AlertError>> {
        self.repository
            .list_alerts()
            .await
            .change_context(AlertError::Storage)
    }

    /// Send a test notification for a stored alert using the freshest price
    /// available. The alert itself is not modified.
    pub async fn test_alert_by_id(&self, id: i64) -> Result<DispatchReport, Report<AlertError>> {
        let alert = self
            .repository
            .get_alert(id)
            .await
            .change_context(AlertError::Storage)?;
        let reading = self.current_reading().await?;
        self.checker.test_alert(&alert, &reading).await
    }

    async fn current_reading(&self) -> Result<PriceReading, Report<AlertError>> {
        if let Some(entry) = self.cache.latest() {
            return Ok(entry.into());
        }
        self.resolver
            .get_current_price()
            .await
            .change_context(AlertError::Price)
    }

    async fn modify(
        &self,
        id: i64,
        change: impl FnOnce(&mut Alert),
    ) -> Result<Alert, Report<AlertError>> {
        let mut alert = self
            .repository
            .get_alert(id)
            .await
            .change_context(AlertError::Storage)?;
        change(&mut alert);
        self.repository
            .update_alert(&alert)
            .await
            .change_context(AlertError::Storage)
            .attach_with(|| format!("alert id: {id}"))?;
        Ok(alert)
    }
}
