use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use crate::error::ProviderError;
use crate::model::{PriceReading, PriceSource};
use crate::provider::{HttpFetcher, PriceProvider, checked_price, parse_decimal};

const BINANCE_BASE_URL: &str = "https://api.binance.com";

/// Primary source: the exchange 24h ticker. The only provider that reports
/// the 24h percentage change.
pub struct BinanceProvider {
    http: HttpFetcher,
    base_url: String,
    market: String,
    currency: String,
}

impl BinanceProvider {
    pub fn new(http: HttpFetcher, base_url: Option<String>, symbol: &str, quote: &str) -> Self {
        Self {
            http,
            base_url: base_url.unwrap_or_else(|| BINANCE_BASE_URL.to_owned()),
            market: market_symbol(symbol, quote),
            currency: quote_asset(quote),
        }
    }
}

impl PriceProvider for BinanceProvider {
    fn source(&self) -> PriceSource {
        PriceSource::Binance
    }

    fn fetch_price(&self) -> BoxFuture<'_, Result<PriceReading, Report<ProviderError>>> {
        Box::pin(async move {
            let url = format!("{}/api/v3/ticker/24hr", self.base_url);
            let body = self
                .http
                .get_text(&url, &[("symbol", self.market.as_str())])
                .await?;
            let reading = parse_ticker(&body, &self.currency)?;
            debug!(market = %self.market, price = reading.price, "binance ticker parsed");
            Ok(reading)
        })
    }
}

/// Binance quotes dollars in USDT, and readings say so.
fn quote_asset(quote: &str) -> String {
    match quote.to_uppercase().as_str() {
        "USD" => "USDT".to_owned(),
        other => other.to_owned(),
    }
}

fn market_symbol(symbol: &str, quote: &str) -> String {
    format!("{}{}", symbol.to_uppercase(), quote_asset(quote))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceTicker {
    last_price: String,
    price_change_percent: String,
}

fn parse_ticker(body: &str, currency: &str) -> Result<PriceReading, Report<ProviderError>> {
    let source = PriceSource::Binance;
    let raw: BinanceTicker =
        serde_json::from_str(body).change_context(ProviderError::ResponseParse {
            provider: source.to_string(),
        })?;

    let price = checked_price(parse_decimal(&raw.last_price, "lastPrice", source)?, source)?;
    let change = parse_decimal(&raw.price_change_percent, "priceChangePercent", source)?;

    Ok(PriceReading::new(price, Some(change), currency, source))
}
