//! Browse/read state machine.
//!
//! Every transition consumes the current [`Navigator`] and returns the next one
//! together with the side effects the caller has to carry out. Nothing here
//! performs I/O, so the whole machine is testable without a network or a UI.

use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{Entry, Feed, PageLoadError, PageMode, ReaderState};
use crate::fetcher::{NetworkError, NetworkErrorKind};
use crate::layout;
use crate::navigation::classify::{self, LinkAction};
use crate::navigation::url::{is_absolute, resolve, stream_identity};

/// Browse history of absolute feed URLs. The last element is the current feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationStack {
    urls: Vec<String>,
}

impl NavigationStack {
    pub fn push(&mut self, url: String) {
        self.urls.push(url);
    }

    /// Drop the current feed. Never pops the root.
    pub fn pop(&mut self) -> bool {
        if self.urls.len() <= 1 {
            return false;
        }
        self.urls.pop();
        true
    }

    pub fn current(&self) -> Option<&str> {
        self.urls.last().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.urls
    }

    pub fn clear(&mut self) {
        self.urls.clear();
    }
}

/// The two single-flight feed operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOp {
    Load,
    Back,
}

/// A feed fetch the caller must perform and report back with [`Navigator::feed_loaded`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRequest {
    pub ticket: u64,
    pub op: FeedOp,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Next,
    Previous,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    FetchFeed(FeedRequest),
    /// Preload around the reader's current page.
    PreloadPages,
    /// Load the page now on screen.
    ShowPage(u32),
    /// Drop everything the closed reader was prefetching.
    ReleasePages,
    /// Neighbouring entry to open after paging past either end of a volume.
    OpenAdjacent(Direction, Entry),
}

/// User-visible navigation failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NavError {
    /// A relative href with no server URL to resolve it against.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid URL {0:?}: it must start with http:// or https://")]
    InvalidUrl(String),

    #[error("Could not load {url} ({kind}): {detail}")]
    FeedFetchFailed {
        url: String,
        kind: NetworkErrorKind,
        detail: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum Screen {
    #[default]
    Browsing,
    Reading(ReaderState),
    ConfirmResume {
        reader: ReaderState,
        pending_page: u32,
    },
}

impl Screen {
    pub fn reader(&self) -> Option<&ReaderState> {
        match self {
            Screen::Browsing => None,
            Screen::Reading(reader) => Some(reader),
            Screen::ConfirmResume { reader, .. } => Some(reader),
        }
    }
}

pub type Transition = (Navigator, Vec<Effect>);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Navigator {
    /// Catalog root restored by [`Navigator::reset`].
    pub root_url: String,
    /// Fallback base for relative hrefs when no feed is open.
    pub server_url: String,
    pub stack: NavigationStack,
    pub feed: Option<Feed>,
    pub screen: Screen,
    pub error: Option<NavError>,
    /// Feed operation re-issued by [`Navigator::retry`].
    pub retry: Option<(FeedOp, String)>,
    load_in_flight: Option<u64>,
    back_in_flight: Option<u64>,
    next_ticket: u64,
}

impl Navigator {
    pub fn new(server_url: impl Into<String>) -> Self {
        let server_url = server_url.into();
        Self {
            root_url: server_url.clone(),
            server_url,
            ..Default::default()
        }
    }

    pub fn is_loading(&self) -> bool {
        self.load_in_flight.is_some() || self.back_in_flight.is_some()
    }

    pub fn reader(&self) -> Option<&ReaderState> {
        self.screen.reader()
    }

    /// Base relative hrefs resolve against: the current feed, else the server.
    pub fn base_url(&self) -> &str {
        self.stack.current().unwrap_or(&self.server_url)
    }

    fn ticket(&mut self) -> u64 {
        self.next_ticket += 1;
        self.next_ticket
    }

    fn fail(mut self, error: NavError) -> Transition {
        debug!("Navigation error: {}", error);
        self.error = Some(error);
        (self, Vec::new())
    }

    fn resolve_href(&self, href: &str) -> Result<String, NavError> {
        let url = resolve(self.base_url(), href);
        if url.is_empty() {
            return Err(NavError::Configuration(
                "set a server URL before opening relative links".into(),
            ));
        }
        Ok(url)
    }

    pub fn set_server_url(mut self, url: impl Into<String>) -> Transition {
        self.server_url = url.into();
        (self, Vec::new())
    }

    /// Start loading a feed; pushed onto the stack once it arrives.
    pub fn load_feed(self, url: &str) -> Transition {
        let (next, started) = self.begin_load(url);
        let effects = match started {
            Ok(Some(request)) => vec![Effect::FetchFeed(request)],
            _ => Vec::new(),
        };
        (next, effects)
    }

    /// Like [`Navigator::load_feed`], but reports the outcome of this call alone:
    /// the request to perform, `None` when another load is already running, or
    /// the error that stopped it before any fetch.
    pub fn begin_load(mut self, url: &str) -> (Self, Result<Option<FeedRequest>, NavError>) {
        if url.contains("://") && !is_absolute(url) {
            return self.reject(NavError::InvalidUrl(url.to_string()));
        }
        let url = match self.resolve_href(url) {
            Ok(url) => url,
            Err(e) => return self.reject(e),
        };
        if !is_absolute(&url) {
            return self.reject(NavError::InvalidUrl(url));
        }
        if self.load_in_flight.is_some() {
            debug!("Feed load already in flight, ignoring {}", url);
            return (self, Ok(None));
        }

        let ticket = self.ticket();
        self.load_in_flight = Some(ticket);
        self.error = None;
        info!("Loading feed {}", url);
        let request = FeedRequest {
            ticket,
            op: FeedOp::Load,
            url,
        };
        (self, Ok(Some(request)))
    }

    fn reject<T>(self, error: NavError) -> (Self, Result<T, NavError>) {
        let (next, _) = self.fail(error.clone());
        (next, Err(error))
    }

    /// Leave the reader, or pop to the previous feed and fetch it again.
    pub fn navigate_back(mut self) -> Transition {
        if self.back_in_flight.is_some() {
            debug!("Back navigation already in flight");
            return (self, Vec::new());
        }
        if self.reader().is_some() {
            return self.close_reader();
        }
        if !self.stack.pop() {
            return (self, Vec::new());
        }

        let Some(url) = self.stack.current().map(String::from) else {
            return (self, Vec::new());
        };
        let ticket = self.ticket();
        self.back_in_flight = Some(ticket);
        self.feed = None;
        self.error = None;
        let request = FeedRequest {
            ticket,
            op: FeedOp::Back,
            url,
        };
        (self, vec![Effect::FetchFeed(request)])
    }

    /// Apply the outcome of a feed fetch. Results of superseded requests are dropped.
    pub fn feed_loaded(
        mut self,
        request: &FeedRequest,
        result: Result<Feed, NetworkError>,
    ) -> Transition {
        let in_flight = match request.op {
            FeedOp::Load => &mut self.load_in_flight,
            FeedOp::Back => &mut self.back_in_flight,
        };
        if *in_flight != Some(request.ticket) {
            debug!("Dropping stale feed response for {}", request.url);
            return (self, Vec::new());
        }
        *in_flight = None;

        if request.op == FeedOp::Back && self.stack.current() != Some(request.url.as_str()) {
            debug!("Stack moved on, dropping feed {}", request.url);
            return (self, Vec::new());
        }

        match result {
            Ok(feed) => {
                if request.op == FeedOp::Load {
                    self.stack.push(request.url.clone());
                    if self.server_url.is_empty() {
                        self.server_url = request.url.clone();
                    }
                }
                info!("Loaded {} ({} entries)", request.url, feed.entries.len());
                self.feed = Some(feed);
                self.error = None;
                self.retry = None;
                (self, Vec::new())
            }
            Err(e) => {
                self.retry = Some((request.op, request.url.clone()));
                self.fail(NavError::FeedFetchFailed {
                    url: request.url.clone(),
                    kind: e.kind,
                    detail: e.detail,
                })
            }
        }
    }

    /// Re-issue the last failed feed operation.
    pub fn retry(mut self) -> Transition {
        match self.retry.take() {
            Some((FeedOp::Load, url)) => {
                let (mut next, effects) = self.load_feed(&url);
                if effects.is_empty() && next.retry.is_none() {
                    next.retry = Some((FeedOp::Load, url));
                }
                (next, effects)
            }
            Some((FeedOp::Back, url)) => {
                if self.stack.current() != Some(url.as_str()) {
                    return (self, Vec::new());
                }
                if self.back_in_flight.is_some() {
                    self.retry = Some((FeedOp::Back, url));
                    return (self, Vec::new());
                }
                let ticket = self.ticket();
                self.back_in_flight = Some(ticket);
                self.error = None;
                let request = FeedRequest {
                    ticket,
                    op: FeedOp::Back,
                    url,
                };
                (self, vec![Effect::FetchFeed(request)])
            }
            None => (self, Vec::new()),
        }
    }

    /// Back to an empty catalog at the configured root. In-flight fetches are orphaned.
    pub fn reset(self) -> Transition {
        let effects = if self.reader().is_some() {
            vec![Effect::ReleasePages]
        } else {
            Vec::new()
        };
        let next = Self {
            root_url: self.root_url.clone(),
            server_url: self.root_url,
            next_ticket: self.next_ticket,
            ..Default::default()
        };
        (next, effects)
    }

    /// React to the user picking an entry of the displayed feed.
    pub fn activate(self, entry: &Entry) -> Transition {
        if self.screen != Screen::Browsing {
            debug!("Ignoring activation of {:?} while reading", entry.title);
            return (self, Vec::new());
        }

        match classify::classify(entry) {
            LinkAction::Navigate { href } => self.load_feed(&href),
            LinkAction::OpenStream {
                href,
                count,
                last_read,
            } => self.open_stream(entry, &href, count, last_read.unwrap_or(0)),
            LinkAction::OpenStreamFromStart { href } => self.open_stream(entry, &href, 0, 0),
            LinkAction::Unhandled => (self, Vec::new()),
        }
    }

    fn open_stream(mut self, entry: &Entry, href: &str, count: u32, last_read: u32) -> Transition {
        let template = match self.resolve_href(href) {
            Ok(url) => url,
            Err(e) => return self.fail(e),
        };
        let base = self.base_url().to_string();
        let reader = ReaderState::new(template, base, count, last_read, entry.clone());
        self.error = None;

        if last_read > 0 {
            info!(
                "Opening {} with resume prompt at page {}",
                entry.display_title(),
                last_read
            );
            self.screen = Screen::ConfirmResume {
                reader,
                pending_page: last_read,
            };
            (self, Vec::new())
        } else {
            info!("Opening {} at page 1", entry.display_title());
            self.enter_reading(reader, 1)
        }
    }

    fn enter_reading(mut self, reader: ReaderState, page: u32) -> Transition {
        let reader = reader.with_page(page);
        let page = reader.current_page;
        self.screen = Screen::Reading(reader);
        (self, vec![Effect::PreloadPages, Effect::ShowPage(page)])
    }

    /// Resume at the server-side last-read page.
    pub fn confirm_resume(self) -> Transition {
        match self.screen.clone() {
            Screen::ConfirmResume {
                reader,
                pending_page,
            } => self.enter_reading(reader, pending_page),
            _ => (self, Vec::new()),
        }
    }

    pub fn start_from_beginning(self) -> Transition {
        match self.screen.clone() {
            Screen::ConfirmResume { reader, .. } => self.enter_reading(reader, 1),
            _ => (self, Vec::new()),
        }
    }

    /// Close the resume prompt without reading.
    pub fn dismiss_resume(mut self) -> Transition {
        if matches!(self.screen, Screen::ConfirmResume { .. }) {
            self.screen = Screen::Browsing;
        }
        (self, Vec::new())
    }

    pub fn close_reader(mut self) -> Transition {
        if self.reader().is_none() {
            return (self, Vec::new());
        }
        self.screen = Screen::Browsing;
        (self, vec![Effect::ReleasePages])
    }

    /// Jump to `page`, clamped to the volume.
    pub fn change_page(mut self, page: u32) -> Transition {
        let Screen::Reading(reader) = &self.screen else {
            return (self, Vec::new());
        };
        let before = reader.current_page;
        let reader = reader.clone().with_page(page);
        let page = reader.current_page;
        self.screen = Screen::Reading(reader);

        if page == before {
            return (self, Vec::new());
        }
        (self, vec![Effect::PreloadPages, Effect::ShowPage(page)])
    }

    /// Turn forward one page or one spread; past the last page, close and move on
    /// to the next entry.
    pub fn turn_forward(
        self,
        mode: PageMode,
        ratio_of: impl Fn(u32) -> Option<f32>,
    ) -> Transition {
        let Screen::Reading(reader) = &self.screen else {
            return (self, Vec::new());
        };
        match layout::next_page(mode, reader.current_page, reader.page_count, ratio_of) {
            Some(page) => self.change_page(page),
            None => self.leave_volume(Direction::Next),
        }
    }

    /// Turn back one page or one spread; before the first page, close and move on
    /// to the previous entry.
    pub fn turn_backward(
        self,
        mode: PageMode,
        ratio_of: impl Fn(u32) -> Option<f32>,
    ) -> Transition {
        let Screen::Reading(reader) = &self.screen else {
            return (self, Vec::new());
        };
        match layout::previous_page(mode, reader.current_page, ratio_of) {
            Some(page) => self.change_page(page),
            None => self.leave_volume(Direction::Previous),
        }
    }

    fn leave_volume(self, direction: Direction) -> Transition {
        let adjacent = self
            .reader()
            .and_then(|reader| self.adjacent_entry(reader, direction))
            .cloned();
        let (next, mut effects) = self.close_reader();
        if let Some(entry) = adjacent {
            effects.push(Effect::OpenAdjacent(direction, entry));
        }
        (next, effects)
    }

    /// Entry next to the one `reader` was opened from, matched by stream address.
    fn adjacent_entry(&self, reader: &ReaderState, direction: Direction) -> Option<&Entry> {
        let entries = &self.feed.as_ref()?.entries;
        let identity = stream_identity(&reader.stream_template);
        let index = entries.iter().position(|entry| {
            classify::stream_link(entry)
                .and_then(|link| link.href())
                .map(|href| stream_identity(&resolve(&reader.base_url, href)) == identity)
                .unwrap_or(false)
        })?;

        match direction {
            Direction::Next => entries.get(index + 1),
            Direction::Previous => index.checked_sub(1).and_then(|i| entries.get(i)),
        }
    }

    /// Record a failure of the page on screen. Failures of pages no longer shown are ignored.
    pub fn page_failed(mut self, page: u32, detail: impl Into<String>) -> Transition {
        if let Screen::Reading(reader) = &mut self.screen {
            if reader.current_page == page {
                reader.page_error = Some(PageLoadError {
                    page,
                    detail: detail.into(),
                });
            }
        }
        (self, Vec::new())
    }

    pub fn retry_page(mut self) -> Transition {
        let Screen::Reading(reader) = &mut self.screen else {
            return (self, Vec::new());
        };
        if reader.page_error.take().is_none() {
            return (self, Vec::new());
        }
        let page = reader.current_page;
        (self, vec![Effect::ShowPage(page)])
    }
}
