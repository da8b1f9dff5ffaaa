use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use serde::Deserialize;

use crate::error::ProviderError;
use crate::model::{PriceReading, PriceSource};
use crate::provider::{HttpFetcher, PriceProvider, checked_price, parse_decimal};

const COINBASE_BASE_URL: &str = "https://api.coinbase.com";

/// First fallback: spot price only, no 24h change.
pub struct CoinbaseProvider {
    http: HttpFetcher,
    base_url: String,
    pair: String,
}

impl CoinbaseProvider {
    pub fn new(http: HttpFetcher, base_url: Option<String>, symbol: &str, quote: &str) -> Self {
        Self {
            http,
            base_url: base_url.unwrap_or_else(|| COINBASE_BASE_URL.to_owned()),
            pair: format!("{}-{}", symbol.to_uppercase(), quote.to_uppercase()),
        }
    }
}

impl PriceProvider for CoinbaseProvider {
    fn source(&self) -> PriceSource {
        PriceSource::Coinbase
    }

    fn fetch_price(&self) -> BoxFuture<'_, Result<PriceReading, Report<ProviderError>>> {
        Box::pin(async move {
            let url = format!("{}/v2/prices/{}/spot", self.base_url, self.pair);
            let body = self.http.get_text(&url, &[] as &[(&str, &str)]).await?;
            parse_spot(&body)
        })
    }
}

#[derive(Debug, Deserialize)]
struct SpotResponse {
    data: SpotData,
}

#[derive(Debug, Deserialize)]
struct SpotData {
    amount: String,
    currency: String,
}

fn parse_spot(body: &str) -> Result<PriceReading, Report<ProviderError>> {
    let source = PriceSource::Coinbase;
    let raw: SpotResponse =
        serde_json::from_str(body).change_context(ProviderError::ResponseParse {
            provider: source.to_string(),
        })?;

    let price = checked_price(parse_decimal(&raw.data.amount, "amount", source)?, source)?;
    Ok(PriceReading::new(price, None, raw.data.currency, source))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_spot_without_percentage() {
        let body = r#"{"data":{"base":"BTC","currency":"USD","amount":"65000.0"}}"#;
        let reading = parse_spot(body).unwrap();
        assert_eq!(reading.price, 65000.0);
        assert_eq!(reading.percentage_change, None);
        assert_eq!(reading.currency, "USD");
        assert_eq!(reading.source, PriceSource::Coinbase);
    }

    #[test]
    fn rejects_malformed_amount() {
        let body = r#"{"data":{"base":"BTC","currency":"USD","amount":"n/a"}}"#;
        assert!(parse_spot(body).is_err());
    }

    #[test]
    fn rejects_missing_data() {
        assert!(parse_spot(r#"{"errors":[{"id":"not_found"}]}"#).is_err());
        assert!(parse_spot("<html>").is_err());
    }
}
