//! # OPDS Reader
//!
//! Client core for browsing OPDS catalogs and reading comics streamed page by
//! page over OPDS-PSE.
//!
//! ## Architecture
//!
//! ```text
//! Fetcher → Normalizer → Navigator → Prefetch cache → Layout
//! ```
//!
//! - [`fetcher`]: HTTP client for feeds and page images
//! - [`normalizer`]: Parses Atom catalogs into domain models
//! - [`navigation`]: Link classification, URL building, browse/read state machine
//! - [`prefetch`]: Background page loading with memory-pressure eviction
//! - [`layout`]: Single vs double page decisions
//!
//! ## Quick Start
//!
//! ```bash
//! # List a catalog
//! opds-reader browse https://komga.local/opds/v1.2/catalog
//!
//! # Open its third entry, resume where the server says you stopped
//! opds-reader read https://komga.local/opds/v1.2/series/12 --entry 2 --resume
//!
//! # Page through in double-page mode under simulated memory pressure
//! opds-reader --simulate-pressure 0.9 read URL --entry 0 --double --turns 5
//! ```
//!
//! ## Modules
//!
//! - [`app`]: Application context and error types
//! - [`cli`]: Command-line interface definitions
//! - [`config`]: TOML configuration
//! - [`domain`]: Core domain models (Feed, Entry, Link, ReaderState)

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together all components:
/// fetcher, prefetch cache, navigation controller.
pub mod app;

/// Configuration management.
///
/// Loads from `~/.config/opds-reader/config.toml`, supporting:
/// - Server URL and HTTP client options
/// - Reader preferences (page mode, preloading, memory threshold)
pub mod config;

/// Command-line interface using clap.
///
/// - `browse [url]` - List the entries of a feed
/// - `read <url> --entry N` - Open an entry and page through it
pub mod cli;

/// Core domain models.
///
/// - [`Feed`](domain::Feed) and [`Entry`](domain::Entry): catalog content
/// - [`Link`](domain::Link): typed links, including page-streaming attributes
/// - [`ReaderState`](domain::ReaderState): the open volume
pub mod domain;

/// HTTP fetching.
///
/// - [`FeedFetcher`](fetcher::FeedFetcher) and
///   [`ImageFetcher`](fetcher::ImageFetcher): async traits
/// - [`HttpFetcher`](fetcher::http_fetcher::HttpFetcher): reqwest-based implementation
pub mod fetcher;

/// Double-page heuristic based on page aspect ratios.
pub mod layout;

/// Catalog navigation.
///
/// - [`classify`](navigation::classify()): what activating an entry does
/// - [`Navigator`](navigation::Navigator): pure browse/read state machine
/// - [`NavigationController`](navigation::NavigationController): async driver
pub mod navigation;

/// Atom catalog parsing into [`Feed`](domain::Feed) structs.
pub mod normalizer;

/// Page prefetch cache.
///
/// - [`PrefetchCache`](prefetch::PrefetchCache): one fetch per page, cancellable
/// - [`MemoryPressure`](prefetch::MemoryPressure): signal driving eviction
pub mod prefetch;
