use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Price provider that produced a reading, in resolver priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriceSource {
    Binance,
    Coinbase,
    CoinGecko,
}

impl PriceSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::Coinbase => "coinbase",
            Self::CoinGecko => "coingecko",
        }
    }

    /// Only the exchange ticker reports a 24h percentage change.
    pub fn supplies_percentage_change(self) -> bool {
        matches!(self, Self::Binance)
    }
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single timestamped observation of the monitored price.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceReading {
    pub price: f64,
    /// 24h change in percent; `None` when the source does not report it.
    pub percentage_change: Option<f64>,
    pub currency: String,
    pub source: PriceSource,
    pub timestamp: DateTime<Utc>,
}

impl PriceReading {
    pub fn new(
        price: f64,
        percentage_change: Option<f64>,
        currency: impl Into<String>,
        source: PriceSource,
    ) -> Self {
        Self {
            price,
            percentage_change,
            currency: currency.into(),
            source,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlertCondition {
    /// Fires when the price is at or above the target.
    Above(f64),
    /// Fires when the price is at or below the target.
    Below(f64),
    /// Signed 24h percentage threshold: positive watches rises, negative watches drops.
    Change(f64),
    /// Row read from storage that this build cannot evaluate. The raw
    /// columns are kept so writing the alert back does not lose them.
    Unsupported {
        kind: String,
        target_price: Option<f64>,
        percentage_threshold: Option<f64>,
    },
}

impl AlertCondition {
    pub fn kind(&self) -> &str {
        match self {
            Self::Above(_) => "above",
            Self::Below(_) => "below",
            Self::Change(_) => "change",
            Self::Unsupported { kind, .. } => kind,
        }
    }

    pub fn target_price(&self) -> Option<f64> {
        match self {
            Self::Above(target) | Self::Below(target) => Some(*target),
            Self::Unsupported { target_price, .. } => *target_price,
            Self::Change(_) => None,
        }
    }

    pub fn percentage_threshold(&self) -> Option<f64> {
        match self {
            Self::Change(threshold) => Some(*threshold),
            Self::Unsupported {
                percentage_threshold,
                ..
            } => *percentage_threshold,
            Self::Above(_) | Self::Below(_) => None,
        }
    }

    /// Rebuild a condition from its persisted columns.
    pub fn from_parts(
        kind: &str,
        target_price: Option<f64>,
        percentage_threshold: Option<f64>,
    ) -> Self {
        match (kind, target_price, percentage_threshold) {
            ("above", Some(target), _) => Self::Above(target),
            ("below", Some(target), _) => Self::Below(target),
            ("change", _, Some(threshold)) => Self::Change(threshold),
            (other, target_price, percentage_threshold) => Self::Unsupported {
                kind: other.to_owned(),
                target_price,
                percentage_threshold,
            },
        }
    }
}

/// One-shot state of an alert. A triggered alert stays silent until reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Armed,
    Triggered { at: DateTime<Utc> },
}

impl TriggerState {
    pub fn last_triggered_at(self) -> Option<DateTime<Utc>> {
        match self {
            Self::Armed => None,
            Self::Triggered { at } => Some(at),
        }
    }
}

/// Per-alert channel switches and destinations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelSettings {
    pub email_enabled: bool,
    pub email: Option<String>,
    pub telegram_enabled: bool,
    pub telegram_chat_id: Option<String>,
    pub push_enabled: bool,
    pub whatsapp_enabled: bool,
    pub phone_number: Option<String>,
    pub locale: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub id: i64,
    pub name: String,
    pub condition: AlertCondition,
    pub is_active: bool,
    pub channels: ChannelSettings,
    pub state: TriggerState,
    /// Number of times the alert has fired. Never reset.
    pub trigger_count: u32,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn last_triggered_at(&self) -> Option<DateTime<Utc>> {
        self.state.last_triggered_at()
    }

    pub fn mark_triggered(&mut self, at: DateTime<Utc>) {
        self.state = TriggerState::Triggered { at };
        self.trigger_count = self.trigger_count.saturating_add(1);
    }

    /// Re-arm the alert. The trigger count is kept as history.
    pub fn reset(&mut self) {
        self.state = TriggerState::Armed;
    }

    pub fn toggle(&mut self) {
        self.is_active = !self.is_active;
    }
}

/// Ephemeral payload handed to every notification channel.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub title: String,
    pub message: String,
    pub reading: PriceReading,
    pub alert: Alert,
}
