use std::sync::Arc;

use crate::core::{config::Settings, redis::RedisHandle};
use crate::repositories::GradingStore;
use crate::tasks::{PollConfig, PollingController};

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    store: Arc<dyn GradingStore>,
    crawl_store: Arc<dyn GradingStore>,
    redis: RedisHandle,
    polling: PollingController,
}

impl AppState {
    /// `crawl_store` serves the statistics crawl and must not sit behind the read cache.
    pub(crate) fn new(
        settings: Settings,
        store: Arc<dyn GradingStore>,
        crawl_store: Arc<dyn GradingStore>,
        redis: RedisHandle,
    ) -> Self {
        let polling =
            PollingController::new(Arc::clone(&store), PollConfig::from_settings(&settings));
        Self { inner: Arc::new(InnerState { settings, store, crawl_store, redis, polling }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn store(&self) -> &dyn GradingStore {
        self.inner.store.as_ref()
    }

    pub(crate) fn crawl_store(&self) -> &dyn GradingStore {
        self.inner.crawl_store.as_ref()
    }

    pub(crate) fn redis(&self) -> &RedisHandle {
        &self.inner.redis
    }

    pub(crate) fn polling(&self) -> &PollingController {
        &self.inner.polling
    }
}
