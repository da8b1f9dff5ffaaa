use crate::model::{Alert, AlertCondition, NotificationEvent, PriceReading};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Language {
    English,
    Spanish,
}

impl Language {
    fn from_locale(locale: &str) -> Self {
        let lang = locale
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_lowercase();
        match lang.as_str() {
            "es" => Self::Spanish,
            _ => Self::English,
        }
    }
}

impl NotificationEvent {
    /// Event for an alert whose condition was met by `reading`.
    pub fn triggered(alert: &Alert, reading: &PriceReading) -> Self {
        let lang = Language::from_locale(&alert.channels.locale);
        let title = match lang {
            Language::English => format!("Price alert: {}", alert.name),
            Language::Spanish => format!("Alerta de precio: {}", alert.name),
        };
        Self {
            title,
            message: trigger_message(lang, alert, reading),
            reading: reading.clone(),
            alert: alert.clone(),
        }
    }

    /// Sample event for a user-requested test send.
    pub fn test(alert: &Alert, reading: &PriceReading) -> Self {
        let lang = Language::from_locale(&alert.channels.locale);
        let price = format_price(reading);
        let (title, message) = match lang {
            Language::English => (
                format!("Test notification: {}", alert.name),
                format!(
                    "This is a sample notification for alert \"{}\". Current price: {price}.",
                    alert.name
                ),
            ),
            Language::Spanish => (
                format!("Notificación de prueba: {}", alert.name),
                format!(
                    "Esta es una notificación de ejemplo para la alerta \"{}\". Precio actual: {price}.",
                    alert.name
                ),
            ),
        };
        Self {
            title,
            message,
            reading: reading.clone(),
            alert: alert.clone(),
        }
    }
}

fn format_price(reading: &PriceReading) -> String {
    format!("{:.2} {}", reading.price, reading.currency)
}

fn trigger_message(lang: Language, alert: &Alert, reading: &PriceReading) -> String {
    let price = format_price(reading);
    let currency = &reading.currency;
    let change = reading.percentage_change.unwrap_or_default();

    match (&alert.condition, lang) {
        (AlertCondition::Above(target), Language::English) => format!(
            "Price {price} is at or above your target of {target:.2} {currency} (source: {}).",
            reading.source
        ),
        (AlertCondition::Above(target), Language::Spanish) => format!(
            "El precio {price} está igual o por encima de tu objetivo de {target:.2} {currency} (fuente: {}).",
            reading.source
        ),
        (AlertCondition::Below(target), Language::English) => format!(
            "Price {price} is at or below your target of {target:.2} {currency} (source: {}).",
            reading.source
        ),
        (AlertCondition::Below(target), Language::Spanish) => format!(
            "El precio {price} está igual o por debajo de tu objetivo de {target:.2} {currency} (fuente: {}).",
            reading.source
        ),
        (AlertCondition::Change(threshold), Language::English) => format!(
            "24h change of {change:+.2}% reached your threshold of {threshold:+.2}%. Price: {price}."
        ),
        (AlertCondition::Change(threshold), Language::Spanish) => format!(
            "La variación de 24h de {change:+.2}% alcanzó tu umbral de {threshold:+.2}%. Precio: {price}."
        ),
        (AlertCondition::Unsupported { .. }, Language::English) => format!("Current price: {price}."),
        (AlertCondition::Unsupported { .. }, Language::Spanish) => format!("Precio actual: {price}."),
    }
}
