use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::archiver::PriceHistory;
use crate::config::{ConfigStore, RefreshConfig, SharedConfig};
use crate::error::{ConfigError, StoreError};
use crate::extractor::PriceSource;
use crate::forecast;
use crate::logging::{self, LogLine};
use crate::models::{Observation, Product, SelectorDescriptor};
use crate::scheduler::{Scheduler, SchedulerHandle};

/// Everything the presentation layer needs: product entry, manual and
/// on-demand prices, history, forecast, logs and the refresh frequency.
pub struct Tracker {
    history: Arc<PriceHistory>,
    source: Arc<dyn PriceSource>,
    config: SharedConfig,
    config_store: ConfigStore,
    log_file: PathBuf,
}

impl Tracker {
    pub fn new(
        history: PriceHistory,
        source: Arc<dyn PriceSource>,
        config_store: ConfigStore,
        log_file: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let config = SharedConfig::new(config_store.load()?);
        Ok(Self {
            history: Arc::new(history),
            source,
            config,
            config_store,
            log_file: log_file.into(),
        })
    }

    /// Returns `false` when a product with this name already exists; the
    /// existing one is left as it was.
    pub fn add_product(
        &self,
        name: &str,
        url: &str,
        price: f64,
        selector: SelectorDescriptor,
    ) -> Result<bool, StoreError> {
        let name = name.trim();
        let url = url.trim();
        if name.is_empty() {
            return Err(StoreError::EmptyField("name"));
        }
        if url.is_empty() {
            return Err(StoreError::EmptyField("url"));
        }

        let added = self
            .history
            .add_product(Product::new(name, url, selector, Observation::now(price)))?;
        if added {
            tracing::info!("Product '{}' added at R$ {:.2}", name, price);
        }
        Ok(added)
    }

    pub fn record_price(&self, name: &str, price: f64) -> Result<Observation, StoreError> {
        let observation = Observation::now(price);
        self.history.append_observation(name, observation.clone())?;
        tracing::info!("Manual price for {}: R$ {:.2}", name, price);
        Ok(observation)
    }

    /// Extracts now, outside the scheduler's timing. `Ok(None)` means the page
    /// gave no price and nothing was recorded.
    pub fn refresh_now(&self, name: &str) -> Result<Option<f64>, StoreError> {
        let product = self
            .history
            .get(name)
            .ok_or_else(|| StoreError::UnknownProduct(name.to_string()))?;

        match self.source.extract_price(&product.url, &product.selector) {
            Some(price) => {
                self.history.append_observation(name, Observation::now(price))?;
                tracing::info!("{}: R$ {:.2}", name, price);
                Ok(Some(price))
            }
            None => {
                tracing::warn!("Could not update {}: no price found", name);
                Ok(None)
            }
        }
    }

    pub fn product(&self, name: &str) -> Option<Product> {
        self.history.get(name)
    }

    pub fn products(&self) -> Vec<Product> {
        self.history.all()
    }

    /// Newest observations first, by timestamp.
    pub fn history(&self, name: &str, limit: usize) -> Result<Vec<Observation>, StoreError> {
        let product = self
            .history
            .get(name)
            .ok_or_else(|| StoreError::UnknownProduct(name.to_string()))?;
        let mut observations = product.price_history;
        // Equal timestamps keep later insertions first.
        observations.reverse();
        observations.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        observations.truncate(limit);
        Ok(observations)
    }

    pub fn forecast(&self, name: &str) -> Result<Option<f64>, StoreError> {
        let product = self
            .history
            .get(name)
            .ok_or_else(|| StoreError::UnknownProduct(name.to_string()))?;
        Ok(forecast::forecast(&product.prices()))
    }

    pub fn recent_logs(&self, limit: usize) -> std::io::Result<Vec<LogLine>> {
        logging::recent_lines(&self.log_file, limit)
    }

    /// Current frequency as persisted, which another process may have changed.
    pub fn refresh_config(&self) -> RefreshConfig {
        self.config.refresh_from(&self.config_store)
    }

    /// Persists the new frequency; a running scheduler uses it from its next check.
    pub fn set_frequency_hours(&self, hours: u32) -> Result<RefreshConfig, ConfigError> {
        let config = RefreshConfig::new(hours)?;
        self.config_store.save(&config)?;
        self.config.set_frequency_hours(hours)?;
        tracing::info!("Automatic update will run every {} hour(s).", hours);
        Ok(config)
    }

    pub fn start_scheduler(&self, poll: Duration) -> std::io::Result<SchedulerHandle> {
        Scheduler::new(Arc::clone(&self.history), Arc::clone(&self.source), self.config.clone())
            .with_config_store(self.config_store.clone())
            .with_poll_period(poll)
            .spawn()
    }
}
