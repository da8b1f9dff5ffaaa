pub mod binance;
pub mod coinbase;
pub mod coingecko;

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use serde::Serialize;

use crate::config::ProvidersConfig;
use crate::error::ProviderError;
use crate::model::{PriceReading, PriceSource};

use binance::BinanceProvider;
use coinbase::CoinbaseProvider;
use coingecko::CoinGeckoProvider;

/// Abstraction over an external quote service.
///
/// Uses `BoxFuture` instead of `async fn` in trait to keep the trait
/// object-safe (`dyn PriceProvider`).
pub trait PriceProvider: Send + Sync {
    fn source(&self) -> PriceSource;

    /// Fetch the current price with a single request. No retries.
    fn fetch_price(&self) -> BoxFuture<'_, Result<PriceReading, Report<ProviderError>>>;
}

/// HTTP plumbing shared by the REST providers: one client with the request
/// timeout baked in, and a per-provider rate limiter.
pub struct HttpFetcher {
    client: reqwest::Client,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    source: PriceSource,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client, requests_per_minute: u32, source: PriceSource) -> Self {
        let per_minute = NonZeroU32::new(requests_per_minute).unwrap_or(nonzero!(30u32));
        Self {
            client,
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))),
            source,
        }
    }

    /// GET `url` and return the body of a 2xx response.
    pub async fn get_text<Q: Serialize + ?Sized>(
        &self,
        url: &str,
        query: &Q,
    ) -> Result<String, Report<ProviderError>> {
        self.rate_limiter.until_ready().await;

        let provider = self.source.to_string();
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| {
                let context = if e.is_timeout() {
                    ProviderError::Timeout {
                        provider: provider.clone(),
                    }
                } else {
                    ProviderError::Request {
                        provider: provider.clone(),
                    }
                };
                Report::new(e).change_context(context)
            })
            .attach_with(|| format!("url: {url}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Report::new(ProviderError::Status {
                provider,
                status: status.as_u16(),
            })
            .attach(format!("url: {url}")));
        }

        response
            .text()
            .await
            .change_context(ProviderError::ResponseParse { provider })
    }
}

/// Build a shared HTTP client with the configured per-request timeout.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, Report<ProviderError>> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("price-alert/", env!("CARGO_PKG_VERSION")))
        .build()
        .change_context(ProviderError::Request {
            provider: "http client".into(),
        })
}

/// Build the ranked provider list: exchange ticker first, then the two quote
/// services.
pub fn build_providers(
    config: &ProvidersConfig,
) -> Result<Vec<Arc<dyn PriceProvider>>, Report<ProviderError>> {
    let client = build_client(config.request_timeout())?;
    let rpm = config.requests_per_minute;

    let binance: Arc<dyn PriceProvider> = Arc::new(BinanceProvider::new(
        HttpFetcher::new(client.clone(), rpm, PriceSource::Binance),
        config.binance_base_url.clone(),
        &config.symbol,
        &config.quote_currency,
    ));
    let coinbase: Arc<dyn PriceProvider> = Arc::new(CoinbaseProvider::new(
        HttpFetcher::new(client.clone(), rpm, PriceSource::Coinbase),
        config.coinbase_base_url.clone(),
        &config.symbol,
        &config.quote_currency,
    ));
    let coingecko: Arc<dyn PriceProvider> = Arc::new(CoinGeckoProvider::new(
        HttpFetcher::new(client, rpm, PriceSource::CoinGecko),
        config.coingecko_base_url.clone(),
        &config.symbol,
        &config.quote_currency,
    ));

    Ok(vec![binance, coinbase, coingecko])
}

/// Reject prices that are not usable as a reading.
pub fn checked_price(price: f64, source: PriceSource) -> Result<f64, Report<ProviderError>> {
    if price.is_finite() && price > 0.0 {
        Ok(price)
    } else {
        Err(Report::new(ProviderError::ResponseParse {
            provider: source.to_string(),
        })
        .attach(format!("implausible price: {price}")))
    }
}

/// Parse a decimal string field as sent by the exchanges.
pub fn parse_decimal(
    value: &str,
    field: &'static str,
    source: PriceSource,
) -> Result<f64, Report<ProviderError>> {
    value
        .trim()
        .parse::<f64>()
        .change_context(ProviderError::ResponseParse {
            provider: source.to_string(),
        })
        .attach_with(|| format!("{field}: {value:?}"))
}
