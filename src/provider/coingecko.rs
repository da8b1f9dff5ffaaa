use std::collections::HashMap;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;

use crate::error::ProviderError;
use crate::model::{PriceReading, PriceSource};
use crate::provider::{HttpFetcher, PriceProvider, checked_price};

const COINGECKO_BASE_URL: &str = "https://api.coingecko.com";

/// Second fallback: simple price endpoint, no 24h change.
pub struct CoinGeckoProvider {
    http: HttpFetcher,
    base_url: String,
    coin_id: String,
    vs_currency: String,
}

impl CoinGeckoProvider {
    pub fn new(http: HttpFetcher, base_url: Option<String>, symbol: &str, quote: &str) -> Self {
        Self {
            http,
            base_url: base_url.unwrap_or_else(|| COINGECKO_BASE_URL.to_owned()),
            coin_id: coin_id(symbol),
            vs_currency: quote.to_lowercase(),
        }
    }
}

impl PriceProvider for CoinGeckoProvider {
    fn source(&self) -> PriceSource {
        PriceSource::CoinGecko
    }

    fn fetch_price(&self) -> BoxFuture<'_, Result<PriceReading, Report<ProviderError>>> {
        Box::pin(async move {
            let url = format!("{}/api/v3/simple/price", self.base_url);
            let params = [
                ("ids", self.coin_id.as_str()),
                ("vs_currencies", self.vs_currency.as_str()),
            ];
            let body = self.http.get_text(&url, &params).await?;
            parse_simple_price(&body, &self.coin_id, &self.vs_currency)
        })
    }
}

/// CoinGecko keys coins by id, not ticker.
fn coin_id(symbol: &str) -> String {
    match symbol.to_uppercase().as_str() {
        "BTC" => "bitcoin".to_owned(),
        "ETH" => "ethereum".to_owned(),
        "SOL" => "solana".to_owned(),
        "LTC" => "litecoin".to_owned(),
        "DOGE" => "dogecoin".to_owned(),
        other => other.to_lowercase(),
    }
}

fn parse_simple_price(
    body: &str,
    coin_id: &str,
    vs_currency: &str,
) -> Result<PriceReading, Report<ProviderError>> {
    let source = PriceSource::CoinGecko;
    let parse_error = || ProviderError::ResponseParse {
        provider: source.to_string(),
    };

    let raw: HashMap<String, HashMap<String, f64>> =
        serde_json::from_str(body).change_context(parse_error())?;

    let price = raw
        .get(coin_id)
        .and_then(|quotes| quotes.get(vs_currency))
        .copied()
        .ok_or_else(|| Report::new(parse_error()))
        .attach_with(|| format!("missing {coin_id}.{vs_currency}"))?;

    let price = checked_price(price, source)?;
    Ok(PriceReading::new(
        price,
        None,
        vs_currency.to_uppercase(),
        source,
    ))
}
