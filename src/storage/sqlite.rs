use chrono::{DateTime, Utc};
use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use sqlx::{
    FromRow, SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
};
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

use crate::alert::AlertDraft;
use crate::error::StorageError;
use crate::model::{Alert, AlertCondition, ChannelSettings, TriggerState};
use crate::storage::{AlertRepository, NotificationAttempt, NotificationLog};

const ALERT_COLUMNS: &str = "id, name, kind, target_price, percentage_threshold, is_active, \
     email_enabled, email, telegram_enabled, telegram_chat_id, push_enabled, \
     whatsapp_enabled, phone_number, locale, last_triggered_at, trigger_count, created_at";

#[derive(FromRow)]
struct AlertRow {
    id: i64,
    name: String,
    kind: String,
    target_price: Option<f64>,
    percentage_threshold: Option<f64>,
    is_active: bool,
    email_enabled: bool,
    email: Option<String>,
    telegram_enabled: bool,
    telegram_chat_id: Option<String>,
    push_enabled: bool,
    whatsapp_enabled: bool,
    phone_number: Option<String>,
    locale: String,
    last_triggered_at: Option<String>,
    trigger_count: i64,
    created_at: String,
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

impl From<AlertRow> for Alert {
    fn from(row: AlertRow) -> Self {
        let state = match row.last_triggered_at.as_deref() {
            None => TriggerState::Armed,
            Some(raw) => match parse_time(raw) {
                Some(at) => TriggerState::Triggered { at },
                // a set but unreadable timestamp still means the alert fired
                None => {
                    warn!(alert_id = row.id, value = raw, "unparsable last_triggered_at");
                    TriggerState::Triggered {
                        at: DateTime::<Utc>::UNIX_EPOCH,
                    }
                }
            },
        };
        Alert {
            id: row.id,
            name: row.name,
            condition: AlertCondition::from_parts(
                &row.kind,
                row.target_price,
                row.percentage_threshold,
            ),
            is_active: row.is_active,
            channels: ChannelSettings {
                email_enabled: row.email_enabled,
                email: row.email,
                telegram_enabled: row.telegram_enabled,
                telegram_chat_id: row.telegram_chat_id,
                push_enabled: row.push_enabled,
                whatsapp_enabled: row.whatsapp_enabled,
                phone_number: row.phone_number,
                locale: row.locale,
            },
            state,
            trigger_count: u32::try_from(row.trigger_count).unwrap_or(0),
            created_at: parse_time(&row.created_at).unwrap_or_else(Utc::now),
        }
    }
}

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self, Report<StorageError>> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .change_context(StorageError::Migration)
                .attach_with(|| format!("cannot create data directory: {}", parent.display()))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .change_context(StorageError::Migration)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(opts)
            .await
            .change_context(StorageError::Migration)
            .attach_with(|| format!("database path: {}", path.display()))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .change_context(StorageError::Migration)?;

        Ok(Self { pool })
    }

    async fn fetch_alert(&self, id: i64) -> Result<Alert, Report<StorageError>> {
        let row: Option<AlertRow> =
            sqlx::query_as(&format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .change_context(StorageError::Query)?;
        row.map(Alert::from)
            .ok_or_else(|| Report::new(StorageError::NotFound { id }))
    }
}

impl AlertRepository for SqliteStorage {
    fn get_active_alerts(&self) -> BoxFuture<'_, Result<Vec<Alert>, Report<StorageError>>> {
        Box::pin(async move {
            let rows: Vec<AlertRow> = sqlx::query_as(&format!(
                "SELECT {ALERT_COLUMNS} FROM alerts WHERE is_active = 1 ORDER BY id ASC"
            ))
            .fetch_all(&self.pool)
            .await
            .change_context(StorageError::Query)?;
            Ok(rows.into_iter().map(Alert::from).collect())
        })
    }

    fn get_alert(&self, id: i64) -> BoxFuture<'_, Result<Alert, Report<StorageError>>> {
        Box::pin(self.fetch_alert(id))
    }

    fn update_alert(&self, alert: &Alert) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let alert = alert.clone();
        Box::pin(async move {
            let channels = &alert.channels;
            let result = sqlx::query(
                "UPDATE alerts SET \
                 name = ?, kind = ?, target_price = ?, percentage_threshold = ?, is_active = ?, \
                 email_enabled = ?, email = ?, telegram_enabled = ?, telegram_chat_id = ?, \
                 push_enabled = ?, whatsapp_enabled = ?, phone_number = ?, locale = ?, \
                 last_triggered_at = ?, trigger_count = ? \
                 WHERE id = ?",
            )
            .bind(&alert.name)
            .bind(alert.condition.kind())
            .bind(alert.condition.target_price())
            .bind(alert.condition.percentage_threshold())
            .bind(alert.is_active)
            .bind(channels.email_enabled)
            .bind(&channels.email)
            .bind(channels.telegram_enabled)
            .bind(&channels.telegram_chat_id)
            .bind(channels.push_enabled)
            .bind(channels.whatsapp_enabled)
            .bind(&channels.phone_number)
            .bind(&channels.locale)
            .bind(alert.last_triggered_at().map(|at| at.to_rfc3339()))
            .bind(i64::from(alert.trigger_count))
            .bind(alert.id)
            .execute(&self.pool)
            .await
            .change_context(StorageError::Update)
            .attach_with(|| format!("alert id: {}", alert.id))?;

            if result.rows_affected() == 0 {
                return Err(Report::new(StorageError::NotFound { id: alert.id }));
            }
            Ok(())
        })
    }

    fn claim_trigger(
        &self,
        id: i64,
        at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<bool, Report<StorageError>>> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE alerts SET last_triggered_at = ?, trigger_count = trigger_count + 1 \
                 WHERE id = ? AND is_active = 1 AND last_triggered_at IS NULL",
            )
            .bind(at.to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await
            .change_context(StorageError::Update)
            .attach_with(|| format!("alert id: {id}"))?;
            Ok(result.rows_affected() == 1)
        })
    }

    fn insert_alert(
        &self,
        draft: &AlertDraft,
    ) -> BoxFuture<'_, Result<Alert, Report<StorageError>>> {
        let draft = draft.clone();
        Box::pin(async move {
            let channels = &draft.channels;
            let result = sqlx::query(
                "INSERT INTO alerts \
                 (name, kind, target_price, percentage_threshold, is_active, \
                  email_enabled, email, telegram_enabled, telegram_chat_id, push_enabled, \
                  whatsapp_enabled, phone_number, locale, trigger_count, created_at) \
                 VALUES (?, ?, ?, ?, 1, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)",
            )
            .bind(&draft.name)
            .bind(draft.condition.kind())
            .bind(draft.condition.target_price())
            .bind(draft.condition.percentage_threshold())
            .bind(channels.email_enabled)
            .bind(&channels.email)
            .bind(channels.telegram_enabled)
            .bind(&channels.telegram_chat_id)
            .bind(channels.push_enabled)
            .bind(channels.whatsapp_enabled)
            .bind(&channels.phone_number)
            .bind(&channels.locale)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .change_context(StorageError::Insert)?;

            self.fetch_alert(result.last_insert_rowid()).await
        })
    }

    fn list_alerts(&self) -> BoxFuture<'_, Result<Vec<Alert>, Report<StorageError>>> {
        Box::pin(async move {
            let rows: Vec<AlertRow> =
                sqlx::query_as(&format!("SELECT {ALERT_COLUMNS} FROM alerts ORDER BY id ASC"))
                    .fetch_all(&self.pool)
                    .await
                    .change_context(StorageError::Query)?;
            Ok(rows.into_iter().map(Alert::from).collect())
        })
    }

    fn delete_alert(&self, id: i64) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        Box::pin(async move {
            let result = sqlx::query("DELETE FROM alerts WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await
                .change_context(StorageError::Update)?;
            if result.rows_affected() == 0 {
                return Err(Report::new(StorageError::NotFound { id }));
            }
            Ok(())
        })
    }
}

impl NotificationLog for SqliteStorage {
    fn log_attempt(
        &self,
        attempt: &NotificationAttempt,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let attempt = attempt.clone();
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO notification_log (alert_id, channel, status, message, error, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(attempt.alert_id)
            .bind(&attempt.channel)
            .bind(attempt.status.as_str())
            .bind(&attempt.message)
            .bind(&attempt.error)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .change_context(StorageError::Insert)?;
            Ok(())
        })
    }
}
