//! Podcast feed ingestion: fetching, parsing and server-side caching.
//!
//! The site's podcast page used to pull the Substack RSS feed through a
//! public CORS proxy on every page view. This module does the same work
//! once, on the server, and keeps the result for everyone:
//!
//! - [`parser`] - Streaming RSS parsing with `quick-xml` into [`Episode`]s
//! - [`fetcher`] - HTTP retrieval with timeouts, size limits and backoff
//! - [`cache`] - TTL cache with single-flight refresh and stale fallback
//!
//! # Example
//!
//! ```ignore
//! use fhirsite::feed::{FeedCache, FeedSource, FetchSettings};
//!
//! let source = FeedSource::new(client, feed_url, FetchSettings::default());
//! let cache = FeedCache::new(source, Duration::from_secs(900));
//! let snapshot = cache.get().await?;
//! ```

mod cache;
mod fetcher;
mod parser;

pub use cache::{FeedCache, FeedSnapshot};
pub use fetcher::{build_client, FeedSource, FetchError, FetchSettings};
pub use parser::{
    display_duration, parse_podcast, Enclosure, Episode, ParseError, Podcast, MAX_EPISODES,
};
