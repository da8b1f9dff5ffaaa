pub mod checker;
pub mod condition;
pub mod service;

use error_stack::Report;

use crate::error::AlertError;
use crate::model::{Alert, AlertCondition, ChannelSettings};

const DEFAULT_LOCALE: &str = "en";
const VALID_KINDS: &[&str] = &["above", "below", "change"];

/// Unvalidated alert input as it arrives from the outer layer.
#[derive(Debug, Clone, Default)]
pub struct NewAlert {
    pub name: String,
    pub kind: String,
    pub target_price: Option<f64>,
    pub percentage_threshold: Option<f64>,
    pub channels: ChannelSettings,
}

/// Validated alert content, ready to be stored or applied.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertDraft {
    pub name: String,
    pub condition: AlertCondition,
    pub channels: ChannelSettings,
}

fn invalid(field: impl Into<String>) -> Report<AlertError> {
    Report::new(AlertError::Validation {
        field: field.into(),
    })
}

impl NewAlert {
    pub fn validate(self) -> Result<AlertDraft, Report<AlertError>> {
        let name = self.name.trim().to_owned();
        if name.is_empty() {
            return Err(invalid("name is required"));
        }

        let condition = validate_condition(&self.kind, self.target_price, self.percentage_threshold)?;
        let channels = validate_channels(self.channels)?;

        Ok(AlertDraft {
            name,
            condition,
            channels,
        })
    }
}

fn validate_condition(
    kind: &str,
    target_price: Option<f64>,
    percentage_threshold: Option<f64>,
) -> Result<AlertCondition, Report<AlertError>> {
    match kind {
        "above" | "below" => {
            let target = target_price
                .ok_or_else(|| invalid(format!("target_price is required for \"{kind}\" alerts")))?;
            if !target.is_finite() || target <= 0.0 {
                return Err(invalid("target_price must be a positive number"));
            }
            Ok(if kind == "above" {
                AlertCondition::Above(target)
            } else {
                AlertCondition::Below(target)
            })
        }
        "change" => {
            let threshold = percentage_threshold
                .ok_or_else(|| invalid("percentage_threshold is required for \"change\" alerts"))?;
            if !threshold.is_finite() || threshold == 0.0 {
                return Err(invalid("percentage_threshold must be a non-zero number"));
            }
            Ok(AlertCondition::Change(threshold))
        }
        other => Err(invalid(format!(
            "kind \"{other}\" is not one of {VALID_KINDS:?}"
        ))),
    }
}

fn normalize(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn is_valid_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

fn is_valid_phone(phone: &str) -> bool {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    let digits: String = digits.chars().filter(|c| !matches!(c, ' ' | '-')).collect();
    (8..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

fn validate_channels(channels: ChannelSettings) -> Result<ChannelSettings, Report<AlertError>> {
    let channels = ChannelSettings {
        email: normalize(channels.email),
        telegram_chat_id: normalize(channels.telegram_chat_id),
        phone_number: normalize(channels.phone_number),
        locale: normalize(Some(channels.locale)).unwrap_or_else(|| DEFAULT_LOCALE.to_owned()),
        ..channels
    };

    if channels.email_enabled {
        match channels.email.as_deref() {
            None => return Err(invalid("email is required when email notifications are enabled")),
            Some(email) if !is_valid_email(email) => {
                return Err(invalid(format!("email \"{email}\" is not a valid address")));
            }
            Some(_) => {}
        }
    }

    if channels.telegram_enabled && channels.telegram_chat_id.is_none() {
        return Err(invalid(
            "telegram_chat_id is required when telegram notifications are enabled",
        ));
    }

    if channels.whatsapp_enabled {
        match channels.phone_number.as_deref() {
            None => {
                return Err(invalid(
                    "phone_number is required when whatsapp notifications are enabled",
                ));
            }
            Some(phone) if !is_valid_phone(phone) => {
                return Err(invalid(format!("phone_number \"{phone}\" is not valid")));
            }
            Some(_) => {}
        }
    }

    Ok(channels)
}

impl Alert {
    /// Replace the user-editable parts. The trigger state and count are kept.
    pub fn apply(&mut self, draft: AlertDraft) {
        self.name = draft.name;
        self.condition = draft.condition;
        self.channels = draft.channels;
    }
}
