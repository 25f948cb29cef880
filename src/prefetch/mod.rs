//! Background page prefetching.
//!
//! The cache owns one entry per absolute page URL. Each entry is either waiting
//! on a fetch job, ready with the image bytes and aspect ratio, or failed. A
//! failed entry is fetched again on the next explicit request.
//!
//! Every job is tagged with a generation number. A finished job only writes back
//! when its entry still exists with the same generation, and eviction removes the
//! entry under the same lock, so a cancelled job can never resurrect it.

mod memory;

pub use memory::{FixedPressure, MemoryPressure, SystemMemory};

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::{OpdsError, Result};
use crate::config::DEFAULT_MEMORY_THRESHOLD;
use crate::fetcher::{decode_dimensions, ImageFetcher, NetworkError, NetworkErrorKind};
use crate::navigation::url::page_url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Pending,
    Ready,
    Failed,
}

/// A fetched page image.
#[derive(Debug, Clone)]
pub struct PageImage {
    pub bytes: Arc<[u8]>,
    pub aspect_ratio: Option<f32>,
}

struct CacheEntry {
    status: CacheStatus,
    generation: u64,
    image: Option<PageImage>,
    failure: Option<NetworkError>,
    job: Option<JoinHandle<()>>,
}

impl CacheEntry {
    fn cancel(&mut self) {
        if let Some(job) = self.job.take() {
            job.abort();
        }
    }
}

#[derive(Default)]
struct Table {
    entries: HashMap<String, CacheEntry>,
    next_generation: u64,
    jobs_started: u64,
}

#[derive(Default)]
struct Shared {
    table: Mutex<Table>,
    changed: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, url: &str, generation: u64, outcome: Result<PageImage>) {
        {
            let mut table = self.lock();
            let Some(entry) = table.entries.get_mut(url) else {
                debug!("Dropping result for evicted page {}", url);
                return;
            };
            if entry.generation != generation || entry.status != CacheStatus::Pending {
                debug!("Dropping stale result for {}", url);
                return;
            }

            entry.job = None;
            match outcome {
                Ok(image) => {
                    debug!("Cached {} (aspect ratio {:?})", url, image.aspect_ratio);
                    entry.status = CacheStatus::Ready;
                    entry.image = Some(image);
                }
                Err(e) => {
                    warn!("Failed to preload {}: {}", url, e);
                    entry.status = CacheStatus::Failed;
                    entry.failure = Some(e.into_network_error());
                }
            }
        }
        self.changed.notify_waiters();
    }
}

pub struct PrefetchCache {
    shared: Arc<Shared>,
    fetcher: Arc<dyn ImageFetcher + Send + Sync>,
    memory: Arc<dyn MemoryPressure + Send + Sync>,
    threshold: f32,
}

impl PrefetchCache {
    pub fn new(
        fetcher: Arc<dyn ImageFetcher + Send + Sync>,
        memory: Arc<dyn MemoryPressure + Send + Sync>,
    ) -> Self {
        Self::with_threshold(fetcher, memory, DEFAULT_MEMORY_THRESHOLD)
    }

    pub fn with_threshold(
        fetcher: Arc<dyn ImageFetcher + Send + Sync>,
        memory: Arc<dyn MemoryPressure + Send + Sync>,
        threshold: f32,
    ) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            fetcher,
            memory,
            threshold,
        }
    }

    /// Start fetching `url` unless it is already pending or ready.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn request_preload(&self, url: &str) -> CacheStatus {
        let mut table = self.shared.lock();

        if let Some(entry) = table.entries.get_mut(url) {
            match entry.status {
                CacheStatus::Pending | CacheStatus::Ready => return entry.status,
                CacheStatus::Failed => entry.cancel(),
            }
        }

        table.next_generation += 1;
        table.jobs_started += 1;
        let generation = table.next_generation;

        // Spawned while the table is locked: the job cannot report back before
        // its entry is in place.
        let job = tokio::spawn(fetch_page(
            self.fetcher.clone(),
            self.shared.clone(),
            url.to_string(),
            generation,
        ));

        table.entries.insert(
            url.to_string(),
            CacheEntry {
                status: CacheStatus::Pending,
                generation,
                image: None,
                failure: None,
                job: Some(job),
            },
        );
        debug!("Preloading {}", url);
        CacheStatus::Pending
    }

    /// Preload the pages within `radius` of `current_page`, shedding everything but
    /// the current page and its neighbours first when memory is tight.
    ///
    /// Returns the page URLs requested, current page first.
    pub fn preload_around(
        &self,
        base_url: &str,
        stream_template: &str,
        current_page: u32,
        page_count: u32,
        radius: u32,
    ) -> Vec<String> {
        let last = page_count.max(1);
        let current_page = current_page.clamp(1, last);

        let used = self.memory.used_fraction();
        if used > self.threshold {
            let essential: HashSet<String> = (current_page.saturating_sub(1).max(1)
                ..=(current_page + 1).min(last))
                .map(|page| page_url(base_url, stream_template, page))
                .collect();
            let evicted = self.evict_except(&essential);
            info!(
                "Memory {:.0}% used, evicted {} cached pages around page {}",
                used * 100.0,
                evicted,
                current_page
            );
        }

        let forward = (current_page + 1)..=current_page.saturating_add(radius).min(last);
        let backward = current_page.saturating_sub(radius).max(1)..current_page;

        let urls: Vec<String> = std::iter::once(current_page)
            .chain(forward)
            .chain(backward)
            .map(|page| page_url(base_url, stream_template, page))
            .collect();

        for url in &urls {
            self.request_preload(url);
        }
        urls
    }

    /// Drop every entry not in `keep`, cancelling in-flight jobs. Returns how many
    /// entries were removed.
    pub fn evict_except(&self, keep: &HashSet<String>) -> usize {
        let evicted = {
            let mut table = self.shared.lock();
            let before = table.entries.len();
            table.entries.retain(|url, entry| {
                let keep_it = keep.contains(url);
                if !keep_it {
                    entry.cancel();
                }
                keep_it
            });
            before - table.entries.len()
        };
        if evicted > 0 {
            self.shared.changed.notify_waiters();
        }
        evicted
    }

    /// Cancel all jobs and forget every page.
    pub fn clear(&self) {
        {
            let mut table = self.shared.lock();
            for entry in table.entries.values_mut() {
                entry.cancel();
            }
            table.entries.clear();
        }
        self.shared.changed.notify_waiters();
    }

    /// Aspect ratio of a ready page. Pending, failed and unknown pages all report `None`.
    pub fn aspect_ratio(&self, url: &str) -> Option<f32> {
        self.image(url).and_then(|image| image.aspect_ratio)
    }

    pub fn image(&self, url: &str) -> Option<PageImage> {
        let table = self.shared.lock();
        table
            .entries
            .get(url)
            .filter(|entry| entry.status == CacheStatus::Ready)
            .and_then(|entry| entry.image.clone())
    }

    pub fn status(&self, url: &str) -> Option<CacheStatus> {
        self.shared.lock().entries.get(url).map(|entry| entry.status)
    }

    pub fn len(&self) -> usize {
        self.shared.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of fetch jobs launched since creation.
    pub fn jobs_started(&self) -> u64 {
        self.shared.lock().jobs_started
    }

    /// Wait until `url` settles. Fails if the page fails to load or is evicted
    /// while waiting.
    pub async fn wait_for(&self, url: &str) -> Result<PageImage> {
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let table = self.shared.lock();
                let Some(entry) = table.entries.get(url) else {
                    return Err(OpdsError::Cancelled(format!("{} is not cached", url)));
                };
                match entry.status {
                    CacheStatus::Ready => {
                        if let Some(image) = entry.image.clone() {
                            return Ok(image);
                        }
                    }
                    CacheStatus::Failed => {
                        let failure = entry.failure.clone().unwrap_or_else(|| {
                            NetworkError::new(NetworkErrorKind::Unknown, "page load failed")
                        });
                        return Err(failure.into());
                    }
                    CacheStatus::Pending => {}
                }
            }

            notified.await;
        }
    }

    /// Fetch `url` through the cache and wait for it.
    pub async fn load(&self, url: &str) -> Result<PageImage> {
        self.request_preload(url);
        self.wait_for(url).await
    }
}

impl Drop for PrefetchCache {
    fn drop(&mut self) {
        let mut table = self.shared.lock();
        for entry in table.entries.values_mut() {
            entry.cancel();
        }
    }
}

async fn fetch_page(
    fetcher: Arc<dyn ImageFetcher + Send + Sync>,
    shared: Arc<Shared>,
    url: String,
    generation: u64,
) {
    let outcome = match fetcher.fetch_image(&url).await {
        Ok(bytes) => decode_dimensions(&bytes).map(|dims| PageImage {
            bytes: Arc::from(bytes),
            aspect_ratio: dims.aspect_ratio(),
        }),
        Err(e) => Err(e),
    };
    shared.complete(&url, generation, outcome);
}
