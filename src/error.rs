use derive_more::{Display, Error};

#[derive(Debug, Display, Error)]
pub enum ConfigError {
    #[display("failed to read config file")]
    ReadFile,
    #[display("failed to parse config: {reason}")]
    Parse { reason: String },
    #[display("invalid config: {field}")]
    Validation { field: String },
}

/// Failure of a single price provider. The resolver recovers from these by
/// falling through to the next provider.
#[derive(Debug, Display, Error)]
pub enum ProviderError {
    #[display("request to {provider} failed")]
    Request { provider: String },
    #[display("{provider} answered with HTTP {status}")]
    Status { provider: String, status: u16 },
    #[display("failed to parse response from {provider}")]
    ResponseParse { provider: String },
    #[display("request to {provider} timed out")]
    Timeout { provider: String },
}

#[derive(Debug, Display, Error)]
pub enum PriceError {
    #[display("all price providers failed")]
    AllProvidersFailed,
}

#[derive(Debug, Display, Error)]
pub enum MonitorError {
    #[display("MONITOR_ALREADY_RUNNING: price monitor is already running")]
    AlreadyRunning,
}

#[derive(Debug, Display, Error)]
pub enum NotifyError {
    #[display("{channel} channel is enabled but {field} is not configured")]
    Misconfigured { channel: String, field: String },
    #[display("{channel} channel failed to send")]
    Send { channel: String },
    #[display("all {attempted} notification channels failed")]
    AllChannelsFailed { attempted: usize },
    #[display("no notification channel is enabled for this alert")]
    NoChannelEnabled,
    #[display("failed to build notification HTTP client")]
    Client,
}

#[derive(Debug, Display, Error)]
pub enum StorageError {
    #[display("database migration failed")]
    Migration,
    #[display("failed to insert data")]
    Insert,
    #[display("failed to query data")]
    Query,
    #[display("failed to update data")]
    Update,
    #[display("alert {id} not found")]
    NotFound { id: i64 },
}

/// Structured error surfaced to the CLI layer for alert operations.
#[derive(Debug, Display, Error)]
pub enum AlertError {
    #[display("invalid alert: {field}")]
    Validation { field: String },
    #[display("alert storage failed")]
    Storage,
    #[display("alert notification failed")]
    Notify,
    #[display("no price available")]
    Price,
}
