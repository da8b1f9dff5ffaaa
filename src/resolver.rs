use std::sync::Arc;
use std::time::Duration;

use error_stack::Report;
use tracing::{debug, warn};

use crate::error::{PriceError, ProviderError};
use crate::model::PriceReading;
use crate::provider::PriceProvider;

/// Tries ranked providers in order and returns the first good reading.
pub struct PriceResolver {
    providers: Vec<Arc<dyn PriceProvider>>,
    request_timeout: Duration,
}

impl PriceResolver {
    pub fn new(providers: Vec<Arc<dyn PriceProvider>>, request_timeout: Duration) -> Self {
        Self {
            providers,
            request_timeout,
        }
    }

    /// One pass over the providers. Provider failures fall through to the
    /// next provider; only exhausting all of them is an error.
    pub async fn get_current_price(&self) -> Result<PriceReading, Report<PriceError>> {
        let mut failures: Vec<String> = Vec::with_capacity(self.providers.len());

        for provider in &self.providers {
            let source = provider.source();
            let result = match tokio::time::timeout(self.request_timeout, provider.fetch_price())
                .await
            {
                Ok(result) => result,
                Err(_) => Err(Report::new(ProviderError::Timeout {
                    provider: source.to_string(),
                })),
            };

            match result {
                Ok(reading) => {
                    debug!(provider = %source, price = reading.price, "price resolved");
                    return Ok(reading);
                }
                Err(e) => {
                    warn!(provider = %source, error = ?e, "price provider failed, falling through");
                    failures.push(format!("{source}: {e}"));
                }
            }
        }

        let mut report = Report::new(PriceError::AllProvidersFailed);
        for failure in failures {
            report = report.attach(failure);
        }
        Err(report)
    }
}
