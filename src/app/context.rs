use std::sync::Arc;

use crate::app::error::Result;
use crate::config::Config;
use crate::fetcher::http_fetcher::HttpFetcher;
use crate::navigation::NavigationController;
use crate::prefetch::{MemoryPressure, PrefetchCache, SystemMemory};

pub struct AppContext {
    pub config: Config,
    pub fetcher: Arc<HttpFetcher>,
    pub cache: Arc<PrefetchCache>,
    pub controller: NavigationController,
}

impl AppContext {
    pub fn new(config: Config) -> Result<Self> {
        Self::with_memory(config, Arc::new(SystemMemory))
    }

    /// Build the context with a custom memory signal, e.g. a simulated one.
    pub fn with_memory(
        config: Config,
        memory: Arc<dyn MemoryPressure + Send + Sync>,
    ) -> Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new(&config.server)?);
        let cache = Arc::new(PrefetchCache::with_threshold(
            fetcher.clone(),
            memory,
            config.reader.memory_threshold,
        ));
        let controller = NavigationController::new(
            config.server.url.clone(),
            fetcher.clone(),
            cache.clone(),
            config.reader.clone(),
        );

        Ok(Self {
            config,
            fetcher,
            cache,
            controller,
        })
    }
}
