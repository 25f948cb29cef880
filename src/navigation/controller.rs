use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::app::{OpdsError, Result};
use crate::config::ReaderSettings;
use crate::domain::{Entry, PageMode, ReaderState};
use crate::fetcher::FeedFetcher;
use crate::navigation::state::{Effect, FeedRequest, NavError, Navigator, Screen, Transition};
use crate::navigation::url::page_url;
use crate::prefetch::{PageImage, PrefetchCache};

/// Drives a [`Navigator`] against real fetchers and the page cache.
///
/// Operations take `&self` and may run concurrently; each transition is applied
/// atomically, and the state machine drops results that arrive out of turn.
pub struct NavigationController {
    navigator: Mutex<Navigator>,
    feeds: Arc<dyn FeedFetcher + Send + Sync>,
    cache: Arc<PrefetchCache>,
    settings: Mutex<ReaderSettings>,
}

impl NavigationController {
    pub fn new(
        server_url: impl Into<String>,
        feeds: Arc<dyn FeedFetcher + Send + Sync>,
        cache: Arc<PrefetchCache>,
        settings: ReaderSettings,
    ) -> Self {
        Self {
            navigator: Mutex::new(Navigator::new(server_url)),
            feeds,
            cache,
            settings: Mutex::new(settings),
        }
    }

    fn navigator(&self) -> MutexGuard<'_, Navigator> {
        self.navigator.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settings_guard(&self) -> MutexGuard<'_, ReaderSettings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current navigation state, for rendering.
    pub fn snapshot(&self) -> Navigator {
        self.navigator().clone()
    }

    pub fn settings(&self) -> ReaderSettings {
        self.settings_guard().clone()
    }

    pub fn cache(&self) -> &Arc<PrefetchCache> {
        &self.cache
    }

    pub fn set_preload_radius(&self, radius: u32) {
        let mut settings = self.settings_guard();
        *settings = settings.clone().with_preload_radius(radius);
    }

    pub fn set_page_mode(&self, mode: PageMode) {
        self.settings_guard().page_mode = mode;
    }

    pub fn set_preloading(&self, enabled: bool) {
        self.settings_guard().enable_preloading = enabled;
    }

    fn transition(&self, step: impl FnOnce(Navigator) -> Transition) -> Vec<Effect> {
        let mut navigator = self.navigator();
        let (next, effects) = step(std::mem::take(&mut *navigator));
        *navigator = next;
        effects
    }

    /// Apply a transition and carry out its effects. Returns whether it had any.
    async fn apply(&self, step: impl FnOnce(Navigator) -> Transition) -> bool {
        let effects = self.transition(step);
        let accepted = !effects.is_empty();
        self.run(effects).await;
        accepted
    }

    async fn run(&self, effects: Vec<Effect>) {
        let mut queue = VecDeque::from(effects);

        while let Some(effect) = queue.pop_front() {
            let follow_up = match effect {
                Effect::FetchFeed(request) => self.fetch_feed(&request).await.1,
                Effect::PreloadPages => {
                    self.preload();
                    Vec::new()
                }
                Effect::ShowPage(page) => match self.load_page(page).await {
                    Some(Err(e)) => self.record_page_failure(page, &e),
                    _ => Vec::new(),
                },
                Effect::ReleasePages => {
                    self.cache.clear();
                    Vec::new()
                }
                Effect::OpenAdjacent(direction, entry) => {
                    if self.settings_guard().auto_open_next_book {
                        info!("Opening {:?} entry {}", direction, entry.display_title());
                        self.transition(|nav| nav.activate(&entry))
                    } else {
                        Vec::new()
                    }
                }
            };
            queue.extend(follow_up);
        }
    }

    /// Fetch the feed of `request` and hand the result to the navigator.
    /// Also returns how this particular fetch ended.
    async fn fetch_feed(
        &self,
        request: &FeedRequest,
    ) -> (std::result::Result<(), NavError>, Vec<Effect>) {
        let result = self
            .feeds
            .fetch_feed(&request.url)
            .await
            .map_err(OpdsError::into_network_error);
        let outcome = match &result {
            Ok(_) => Ok(()),
            Err(e) => Err(NavError::FeedFetchFailed {
                url: request.url.clone(),
                kind: e.kind,
                detail: e.detail.clone(),
            }),
        };
        let effects = self.transition(|nav| nav.feed_loaded(request, result));
        (outcome, effects)
    }

    fn preload(&self) {
        let settings = self.settings();
        if !settings.enable_preloading {
            return;
        }
        let Some(reader) = self.reading() else {
            return;
        };
        self.cache.preload_around(
            &reader.base_url,
            &reader.stream_template,
            reader.current_page,
            reader.page_count,
            settings.effective_preload_radius(),
        );
    }

    fn reading(&self) -> Option<ReaderState> {
        match &self.navigator().screen {
            Screen::Reading(reader) => Some(reader.clone()),
            _ => None,
        }
    }

    /// Load `page` of the open volume through the cache. `None` when nothing is open.
    async fn load_page(&self, page: u32) -> Option<Result<PageImage>> {
        let reader = self.reading()?;
        let url = page_url(&reader.base_url, &reader.stream_template, page);
        Some(self.cache.load(&url).await)
    }

    fn record_page_failure(&self, page: u32, error: &OpdsError) -> Vec<Effect> {
        if let OpdsError::Cancelled(reason) = error {
            debug!("Page {} no longer wanted: {}", page, reason);
            return Vec::new();
        }
        self.transition(|nav| nav.page_failed(page, error.to_string()))
    }

    /// Load a feed by absolute URL or href relative to the current feed.
    ///
    /// Returns `Ok(false)` without fetching when another load is already
    /// running. Errors are those of this call only.
    pub async fn load_feed(&self, url: &str) -> std::result::Result<bool, NavError> {
        let mut started = Ok(None);
        self.transition(|nav| {
            let (next, outcome) = nav.begin_load(url);
            started = outcome;
            (next, Vec::new())
        });
        let Some(request) = started? else {
            return Ok(false);
        };

        let (outcome, follow_up) = self.fetch_feed(&request).await;
        self.run(follow_up).await;
        outcome.map(|()| true)
    }

    /// Leave the reader or return to the previous feed. Returns `false` when
    /// there is nothing to go back to or a back navigation is already running.
    pub async fn navigate_back(&self) -> bool {
        self.apply(Navigator::navigate_back).await
    }

    pub async fn reset_navigation(&self) {
        self.apply(Navigator::reset).await;
    }

    /// Re-issue the last failed feed operation.
    pub async fn retry(&self) -> bool {
        self.apply(Navigator::retry).await
    }

    pub async fn activate_entry(&self, entry: &Entry) {
        self.apply(|nav| nav.activate(entry)).await;
    }

    pub async fn confirm_resume(&self) {
        self.apply(Navigator::confirm_resume).await;
    }

    pub async fn start_from_beginning(&self) {
        self.apply(Navigator::start_from_beginning).await;
    }

    pub async fn dismiss_resume(&self) {
        self.apply(Navigator::dismiss_resume).await;
    }

    pub async fn close_reader(&self) {
        self.apply(Navigator::close_reader).await;
    }

    pub async fn change_page(&self, page: u32) {
        self.apply(|nav| nav.change_page(page)).await;
    }

    pub async fn turn_forward(&self) {
        let mode = self.settings_guard().page_mode;
        let cache = self.cache.clone();
        self.apply(move |nav| {
            let Some(reader) = nav.reader().cloned() else {
                return (nav, Vec::new());
            };
            nav.turn_forward(mode, |page| {
                cache.aspect_ratio(&page_url(&reader.base_url, &reader.stream_template, page))
            })
        })
        .await;
    }

    pub async fn turn_backward(&self) {
        let mode = self.settings_guard().page_mode;
        let cache = self.cache.clone();
        self.apply(move |nav| {
            let Some(reader) = nav.reader().cloned() else {
                return (nav, Vec::new());
            };
            nav.turn_backward(mode, |page| {
                cache.aspect_ratio(&page_url(&reader.base_url, &reader.stream_template, page))
            })
        })
        .await;
    }

    /// Image of the page on screen, fetched through the cache. A failure is
    /// recorded on the reader so it can be retried.
    pub async fn show_current_page(&self) -> Result<PageImage> {
        let Some(page) = self.reading().map(|reader| reader.current_page) else {
            return Err(OpdsError::Other("no volume is open".into()));
        };
        match self.load_page(page).await {
            Some(Ok(image)) => Ok(image),
            Some(Err(e)) => {
                self.record_page_failure(page, &e);
                Err(e)
            }
            None => Err(OpdsError::Cancelled("volume closed while loading".into())),
        }
    }

    pub async fn retry_page(&self) -> bool {
        self.apply(Navigator::retry_page).await
    }

    /// Whether the page on screen should be paired with the next one.
    pub fn is_double_spread(&self) -> bool {
        let mode = self.settings_guard().page_mode;
        let Some(reader) = self.reading() else {
            return false;
        };
        let ratio_of = |page| {
            let url = page_url(&reader.base_url, &reader.stream_template, page);
            self.cache.aspect_ratio(&url)
        };
        crate::layout::should_show_double_page(
            mode,
            reader.current_page,
            reader.page_count,
            ratio_of(reader.current_page),
            ratio_of(reader.current_page + 1),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use image::{ImageFormat, RgbImage};

    use crate::domain::{Feed, Link, PSE_STREAM_REL};
    use crate::fetcher::{ImageFetcher, NetworkError, NetworkErrorKind};
    use crate::navigation::NavigationStack;
    use crate::prefetch::{CacheStatus, FixedPressure};

    const ROOT: &str = "https://komga.local/opds/v1.2/catalog";

    struct MockFeeds {
        feeds: HashMap<String, Feed>,
        calls: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl MockFeeds {
        fn new(feeds: Vec<(&str, Feed)>) -> Arc<Self> {
            Self::with_delay(feeds, Duration::ZERO)
        }

        fn with_delay(feeds: Vec<(&str, Feed)>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                feeds: feeds
                    .into_iter()
                    .map(|(url, feed)| (url.to_string(), feed))
                    .collect(),
                calls: Mutex::new(Vec::new()),
                delay,
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FeedFetcher for MockFeeds {
        async fn fetch_feed(&self, url: &str) -> Result<Feed> {
            self.calls.lock().unwrap().push(url.to_string());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.feeds.get(url).cloned().ok_or_else(|| {
                NetworkError::new(NetworkErrorKind::Http, format!("404 for {url}")).into()
            })
        }
    }

    /// Serves 600x900 portrait pages unless `fail` is set.
    #[derive(Default)]
    struct MockPages {
        fail: AtomicBool,
    }

    #[async_trait]
    impl ImageFetcher for MockPages {
        async fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
            if self.fail.load(Ordering::SeqCst) {
                let error = NetworkError::new(NetworkErrorKind::Io, format!("reset on {url}"));
                return Err(error.into());
            }
            let mut buf = Cursor::new(Vec::new());
            RgbImage::new(600, 900)
                .write_to(&mut buf, ImageFormat::Png)
                .unwrap();
            Ok(buf.into_inner())
        }
    }

    fn folder(title: &str, href: &str) -> Entry {
        Entry {
            title: Some(title.into()),
            content: None,
            links: vec![Link {
                href: Some(href.into()),
                media_type: Some(
                    "application/atom+xml;profile=opds-catalog;kind=navigation".into(),
                ),
                ..Default::default()
            }],
        }
    }

    fn book(id: u32, count: u32, last_read: Option<u32>) -> Entry {
        Entry {
            title: Some(format!("Vol. {id}")),
            content: None,
            links: vec![Link {
                href: Some(format!("/opds/v1.2/books/{id}/pages/{{pageNumber}}")),
                media_type: Some("application/x-cbz".into()),
                rel: Some(PSE_STREAM_REL.into()),
                count: Some(count.to_string()),
                last_read: last_read.map(|page| page.to_string()),
            }],
        }
    }

    fn feed(entries: Vec<Entry>) -> Feed {
        Feed {
            title: Some("Komga".into()),
            entries,
        }
    }

    fn page(id: u32, page: u32) -> String {
        format!("https://komga.local/opds/v1.2/books/{id}/pages/{}", page - 1)
    }

    fn controller_with(
        feeds: Arc<MockFeeds>,
        pages: Arc<MockPages>,
        settings: ReaderSettings,
    ) -> NavigationController {
        let cache = Arc::new(PrefetchCache::new(pages, Arc::new(FixedPressure::new(0.1))));
        NavigationController::new(ROOT, feeds, cache, settings)
    }

    fn library(entries: Vec<Entry>) -> Arc<MockFeeds> {
        MockFeeds::new(vec![(ROOT, feed(entries))])
    }

    fn current_page(controller: &NavigationController) -> Option<u32> {
        controller.reading().map(|reader| reader.current_page)
    }

    #[tokio::test]
    async fn test_browse_down_and_back() {
        let series = "https://komga.local/opds/v1.2/series";
        let feeds = MockFeeds::new(vec![
            (ROOT, feed(vec![folder("Series", "/opds/v1.2/series")])),
            (series, feed(vec![book(1, 10, None)])),
        ]);
        let controller = controller_with(feeds.clone(), Arc::default(), ReaderSettings::default());

        controller.load_feed(ROOT).await.unwrap();
        let entry = controller.snapshot().feed.unwrap().entries[0].clone();
        controller.activate_entry(&entry).await;

        let nav = controller.snapshot();
        assert_eq!(nav.stack.as_slice(), [ROOT.to_string(), series.to_string()]);
        assert_eq!(nav.feed.unwrap().entries[0].title.as_deref(), Some("Vol. 1"));

        assert!(controller.navigate_back().await);
        let nav = controller.snapshot();
        assert_eq!(nav.stack.as_slice(), [ROOT.to_string()]);
        assert_eq!(nav.feed.unwrap().entries[0].title.as_deref(), Some("Series"));
        assert_eq!(feeds.calls(), vec![ROOT, series, ROOT]);

        assert!(!controller.navigate_back().await);
    }

    #[tokio::test]
    async fn test_back_rejected_while_in_flight() {
        let a = "https://h/a";
        let b = "https://h/b";
        let c = "https://h/c";
        let feeds = MockFeeds::with_delay(
            vec![(a, feed(vec![])), (b, feed(vec![])), (c, feed(vec![]))],
            Duration::from_millis(20),
        );
        let controller = controller_with(feeds.clone(), Arc::default(), ReaderSettings::default());
        for url in [a, b, c] {
            controller.load_feed(url).await.unwrap();
        }

        let (first, second) = tokio::join!(controller.navigate_back(), controller.navigate_back());
        assert!(first);
        assert!(!second);
        assert_eq!(controller.snapshot().stack.len(), 2);
        assert_eq!(feeds.calls().last().map(String::as_str), Some(b));
    }

    #[tokio::test]
    async fn test_concurrent_load_is_rejected() {
        let a = "https://h/a";
        let b = "https://h/b";
        let feeds = MockFeeds::with_delay(
            vec![(a, feed(vec![])), (b, feed(vec![]))],
            Duration::from_millis(50),
        );
        let controller = controller_with(feeds.clone(), Arc::default(), ReaderSettings::default());

        let (first, second, invalid) = tokio::join!(
            controller.load_feed(a),
            async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                controller.load_feed(b).await
            },
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                controller.load_feed("ftp://h/c").await
            },
        );
        assert_eq!(first, Ok(true));
        assert_eq!(second, Ok(false));
        assert!(matches!(invalid, Err(NavError::InvalidUrl(_))));
        assert_eq!(feeds.calls(), vec![a]);

        let nav = controller.snapshot();
        assert_eq!(nav.stack.as_slice(), [a.to_string()]);
        assert!(nav.error.is_none());
    }

    #[tokio::test]
    async fn test_failed_load_then_retry() {
        let controller = controller_with(
            library(vec![]),
            Arc::default(),
            ReaderSettings::default(),
        );
        controller.load_feed(ROOT).await.unwrap();

        let err = controller.load_feed("/opds/v1.2/missing").await.unwrap_err();
        assert!(matches!(
            err,
            NavError::FeedFetchFailed {
                kind: NetworkErrorKind::Http,
                ..
            }
        ));
        assert_eq!(controller.snapshot().stack.len(), 1);

        assert!(controller.retry().await);
        assert!(controller.snapshot().error.is_some());
        assert_eq!(controller.snapshot().stack.len(), 1);
    }

    #[tokio::test]
    async fn test_reset_navigation() {
        let controller = controller_with(
            library(vec![]),
            Arc::default(),
            ReaderSettings::default(),
        );
        controller.load_feed(ROOT).await.unwrap();
        controller.reset_navigation().await;

        let nav = controller.snapshot();
        assert_eq!(nav.stack, NavigationStack::default());
        assert!(nav.feed.is_none());
        assert_eq!(nav.server_url, ROOT);
    }

    #[tokio::test]
    async fn test_open_volume_preloads_window() {
        let controller = controller_with(
            library(vec![book(1, 10, None)]),
            Arc::default(),
            ReaderSettings::default(),
        );
        controller.load_feed(ROOT).await.unwrap();
        let entry = controller.snapshot().feed.unwrap().entries[0].clone();
        controller.activate_entry(&entry).await;

        assert_eq!(current_page(&controller), Some(1));
        assert_eq!(controller.cache().status(&page(1, 1)), Some(CacheStatus::Ready));
        for p in 2..=4 {
            assert!(controller.cache().status(&page(1, p)).is_some());
        }
        assert_eq!(controller.cache().status(&page(1, 5)), None);

        let image = controller.show_current_page().await.unwrap();
        assert!(!image.bytes.is_empty());
        assert!((image.aspect_ratio.unwrap() - 600.0 / 900.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_preloading_disabled_fetches_current_page_only() {
        let settings = ReaderSettings {
            enable_preloading: false,
            ..Default::default()
        };
        let controller = controller_with(
            library(vec![book(1, 10, None)]),
            Arc::default(),
            settings,
        );
        controller.load_feed(ROOT).await.unwrap();
        let entry = controller.snapshot().feed.unwrap().entries[0].clone();
        controller.activate_entry(&entry).await;

        assert_eq!(controller.cache().jobs_started(), 1);
        controller.change_page(5).await;
        assert_eq!(controller.cache().jobs_started(), 2);
    }

    #[tokio::test]
    async fn test_resume_prompt() {
        let controller = controller_with(
            library(vec![book(42, 120, Some(37))]),
            Arc::default(),
            ReaderSettings::default(),
        );
        controller.load_feed(ROOT).await.unwrap();
        let entry = controller.snapshot().feed.unwrap().entries[0].clone();

        controller.activate_entry(&entry).await;
        assert!(matches!(
            controller.snapshot().screen,
            Screen::ConfirmResume {
                pending_page: 37,
                ..
            }
        ));
        assert!(controller.cache().is_empty());

        controller.confirm_resume().await;
        assert_eq!(current_page(&controller), Some(37));
        assert_eq!(controller.cache().status(&page(42, 37)), Some(CacheStatus::Ready));

        controller.close_reader().await;
        assert!(controller.cache().is_empty());
        controller.activate_entry(&entry).await;
        controller.dismiss_resume().await;
        assert_eq!(controller.snapshot().screen, Screen::Browsing);
    }

    #[tokio::test]
    async fn test_double_page_turns_when_ratios_known() {
        let settings = ReaderSettings {
            page_mode: PageMode::Double,
            ..Default::default()
        };
        let controller = controller_with(
            library(vec![book(1, 10, None)]),
            Arc::default(),
            settings,
        );
        controller.load_feed(ROOT).await.unwrap();
        let entry = controller.snapshot().feed.unwrap().entries[0].clone();
        controller.activate_entry(&entry).await;

        controller.change_page(2).await;
        controller.cache().wait_for(&page(1, 3)).await.unwrap();
        assert!(controller.is_double_spread());

        controller.turn_forward().await;
        assert_eq!(current_page(&controller), Some(4));

        controller.cache().wait_for(&page(1, 3)).await.unwrap();
        controller.cache().wait_for(&page(1, 2)).await.unwrap();
        controller.turn_backward().await;
        assert_eq!(current_page(&controller), Some(2));
    }

    #[tokio::test]
    async fn test_paging_past_end_opens_next_volume() {
        let controller = controller_with(
            library(vec![book(1, 2, None), book(2, 5, None)]),
            Arc::default(),
            ReaderSettings::default(),
        );
        controller.load_feed(ROOT).await.unwrap();
        let entry = controller.snapshot().feed.unwrap().entries[0].clone();
        controller.activate_entry(&entry).await;

        controller.turn_forward().await;
        assert_eq!(current_page(&controller), Some(2));
        controller.turn_forward().await;

        let reader = controller.reading().unwrap();
        assert_eq!(reader.source.title.as_deref(), Some("Vol. 2"));
        assert_eq!(reader.current_page, 1);
        assert_eq!(controller.cache().status(&page(1, 1)), None);

        controller.turn_backward().await;
        let reader = controller.reading().unwrap();
        assert_eq!(reader.source.title.as_deref(), Some("Vol. 1"));
    }

    #[tokio::test]
    async fn test_paging_past_end_without_auto_open_closes() {
        let settings = ReaderSettings {
            auto_open_next_book: false,
            ..Default::default()
        };
        let controller = controller_with(
            library(vec![book(1, 1, None), book(2, 5, None)]),
            Arc::default(),
            settings,
        );
        controller.load_feed(ROOT).await.unwrap();
        let entry = controller.snapshot().feed.unwrap().entries[0].clone();
        controller.activate_entry(&entry).await;

        controller.turn_forward().await;
        assert_eq!(controller.snapshot().screen, Screen::Browsing);
    }

    #[tokio::test]
    async fn test_page_failure_and_retry() {
        let pages = Arc::new(MockPages::default());
        pages.fail.store(true, Ordering::SeqCst);
        let controller = controller_with(
            library(vec![book(1, 10, None)]),
            pages.clone(),
            ReaderSettings::default(),
        );
        controller.load_feed(ROOT).await.unwrap();
        let entry = controller.snapshot().feed.unwrap().entries[0].clone();
        controller.activate_entry(&entry).await;

        let reader = controller.reading().unwrap();
        let error = reader.page_error.unwrap();
        assert_eq!(error.page, 1);
        assert!(error.detail.contains("reset"));

        pages.fail.store(false, Ordering::SeqCst);
        assert!(controller.retry_page().await);
        assert!(controller.reading().unwrap().page_error.is_none());
        assert_eq!(controller.cache().status(&page(1, 1)), Some(CacheStatus::Ready));
    }

    #[tokio::test]
    async fn test_set_preload_radius_floor() {
        let controller = controller_with(
            library(vec![]),
            Arc::default(),
            ReaderSettings::default(),
        );
        controller.set_preload_radius(0);
        assert_eq!(controller.settings().preload_radius, 1);
        controller.set_preload_radius(6);
        assert_eq!(controller.settings().effective_preload_radius(), 6);
    }
}
