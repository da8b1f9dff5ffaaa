use crate::model::{Alert, AlertCondition, PriceReading};

/// Decide whether `alert` fires for `reading`.
///
/// Pure: marking the alert as triggered is the caller's job. Inactive and
/// already-triggered alerts never fire.
pub fn should_trigger(alert: &Alert, reading: &PriceReading) -> bool {
    if !alert.is_active || alert.last_triggered_at().is_some() {
        return false;
    }
    is_triggered(&alert.condition, reading)
}

fn is_triggered(condition: &AlertCondition, reading: &PriceReading) -> bool {
    match condition {
        AlertCondition::Above(target) => reading.price >= *target,
        AlertCondition::Below(target) => reading.price <= *target,
        AlertCondition::Change(threshold) => {
            // without an authoritative 24h change there is nothing to compare
            let Some(change) = reading.percentage_change else {
                return false;
            };
            if *threshold > 0.0 {
                change >= *threshold
            } else if *threshold < 0.0 {
                change <= *threshold
            } else {
                false
            }
        }
        AlertCondition::Unsupported { .. } => false,
    }
}
