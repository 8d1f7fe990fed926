use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use super::fetcher::{FeedSource, FetchError};
use super::parser::Podcast;

/// A parsed feed as handed to callers.
#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    pub podcast: Arc<Podcast>,
    /// When the upstream fetch that produced this snapshot completed.
    pub fetched_at: DateTime<Utc>,
    /// True when a refresh failed and this is the last good copy.
    pub stale: bool,
}

#[derive(Debug)]
struct CachedFeed {
    podcast: Arc<Podcast>,
    fetched_at: DateTime<Utc>,
    stored_at: Instant,
}

impl CachedFeed {
    fn snapshot(&self, stale: bool) -> FeedSnapshot {
        FeedSnapshot {
            podcast: Arc::clone(&self.podcast),
            fetched_at: self.fetched_at,
            stale,
        }
    }
}

/// Server-side cache in front of the upstream feed.
///
/// - Entries younger than `ttl` are served without touching the network.
/// - Concurrent callers that find the entry expired share one refresh,
///   including its failure.
/// - A failed refresh falls back to the previous good entry, marked stale.
#[derive(Debug)]
pub struct FeedCache {
    source: FeedSource,
    ttl: Duration,
    entry: RwLock<Option<CachedFeed>>,
    /// Held for the duration of a refresh. Guards the error of the most
    /// recent refresh, `None` if it succeeded.
    refresh_lock: Mutex<Option<FetchError>>,
    /// Completed refreshes, bumped while `refresh_lock` is held.
    refreshes: AtomicU64,
}

impl FeedCache {
    pub fn new(source: FeedSource, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            entry: RwLock::new(None),
            refresh_lock: Mutex::new(None),
            refreshes: AtomicU64::new(0),
        }
    }

    pub fn source(&self) -> &FeedSource {
        &self.source
    }

    /// Returns the cached feed, refreshing it first if it has expired.
    ///
    /// # Errors
    ///
    /// Returns the upstream [`FetchError`] only when the refresh fails and
    /// no previous copy exists.
    pub async fn get(&self) -> Result<FeedSnapshot, FetchError> {
        let seen = self.refreshes.load(Ordering::Acquire);

        if let Some(snapshot) = self.fresh().await {
            return Ok(snapshot);
        }

        let mut last_error = self.refresh_lock.lock().await;

        // A refresh finished while we waited for the lock: share its outcome
        if self.refreshes.load(Ordering::Acquire) != seen {
            let entry = self.entry.read().await;
            if let Some(cached) = entry.as_ref() {
                return Ok(cached.snapshot(last_error.is_some()));
            }
            if let Some(e) = last_error.as_ref() {
                return Err(e.clone());
            }
            // Invalidated since that refresh, so fetch again below
        }

        let result = self.source.fetch().await;
        *last_error = result.as_ref().err().cloned();
        self.refreshes.fetch_add(1, Ordering::Release);

        match result {
            Ok(podcast) => {
                let cached = CachedFeed {
                    podcast: Arc::new(podcast),
                    fetched_at: Utc::now(),
                    stored_at: Instant::now(),
                };
                let snapshot = cached.snapshot(false);
                *self.entry.write().await = Some(cached);
                tracing::info!(
                    feed = %self.source.url(),
                    episodes = snapshot.podcast.episodes.len(),
                    "Podcast feed cache refreshed"
                );
                Ok(snapshot)
            }
            Err(e) => {
                let entry = self.entry.read().await;
                match entry.as_ref() {
                    Some(previous) => {
                        tracing::warn!(
                            feed = %self.source.url(),
                            error = %e,
                            fetched_at = %previous.fetched_at,
                            "Feed refresh failed, serving stale copy"
                        );
                        Ok(previous.snapshot(true))
                    }
                    None => {
                        tracing::warn!(
                            feed = %self.source.url(),
                            error = %e,
                            "Feed refresh failed with nothing cached"
                        );
                        Err(e)
                    }
                }
            }
        }
    }

    /// Drops the cached entry so the next [`get`](Self::get) refetches.
    pub async fn invalidate(&self) {
        *self.entry.write().await = None;
    }

    async fn fresh(&self) -> Option<FeedSnapshot> {
        let entry = self.entry.read().await;
        entry
            .as_ref()
            .filter(|cached| cached.stored_at.elapsed() < self.ttl)
            .map(|cached| cached.snapshot(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FetchSettings;
    use wiremock::matchers::any;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<rss version="2.0"><channel><title>FHIR Talk</title>
        <item><guid>1</guid><title>First</title></item>
    </channel></rss>"#;

    fn cache_for(server: &MockServer, ttl: Duration) -> FeedCache {
        let settings = FetchSettings {
            max_retries: 0,
            ..FetchSettings::default()
        };
        let source = FeedSource::new(
            reqwest::Client::new(),
            format!("{}/feed", server.uri()),
            settings,
        );
        FeedCache::new(source, ttl)
    }

    #[tokio::test]
    async fn test_fresh_entry_served_without_refetch() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .expect(1)
            .mount(&mock_server)
            .await;

        let cache = cache_for(&mock_server, Duration::from_secs(300));
        let first = cache.get().await.unwrap();
        let second = cache.get().await.unwrap();

        assert!(!first.stale);
        assert!(!second.stale);
        assert!(Arc::ptr_eq(&first.podcast, &second.podcast));
    }

    #[tokio::test]
    async fn test_zero_ttl_always_refetches() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .expect(2)
            .mount(&mock_server)
            .await;

        let cache = cache_for(&mock_server, Duration::ZERO);
        cache.get().await.unwrap();
        cache.get().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_gets_share_one_fetch() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .set_delay(Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let cache = Arc::new(cache_for(&mock_server, Duration::from_secs(300)));
        let handles: Vec<_> = (0..5)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get().await.map(|s| s.podcast.episodes.len()) })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn test_concurrent_gets_share_one_failed_fetch() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(500).set_delay(Duration::from_millis(100)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let cache = Arc::new(cache_for(&mock_server, Duration::from_secs(300)));
        let handles: Vec<_> = (0..5)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get().await })
            })
            .collect();

        for handle in handles {
            assert!(matches!(
                handle.await.unwrap(),
                Err(FetchError::HttpStatus(500))
            ));
        }
    }

    #[tokio::test]
    async fn test_concurrent_gets_share_stale_copy_after_failed_refresh() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .up_to_n_times(1)
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(503).set_delay(Duration::from_millis(100)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let cache = Arc::new(cache_for(&mock_server, Duration::ZERO));
        cache.get().await.unwrap();

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get().await })
            })
            .collect();

        for handle in handles {
            let snapshot = handle.await.unwrap().unwrap();
            assert!(snapshot.stale);
            assert_eq!(snapshot.podcast.episodes[0].title, "First");
        }
    }

    #[tokio::test]
    async fn test_next_get_after_shared_failure_fetches_again() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let cache = cache_for(&mock_server, Duration::from_secs(300));
        assert!(cache.get().await.is_err());
        assert!(!cache.get().await.unwrap().stale);
    }

    #[tokio::test]
    async fn test_failed_refresh_serves_stale_copy() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let cache = cache_for(&mock_server, Duration::ZERO);
        let first = cache.get().await.unwrap();
        let second = cache.get().await.unwrap();

        assert!(!first.stale);
        assert!(second.stale);
        assert_eq!(second.podcast.episodes[0].title, "First");
        assert_eq!(first.fetched_at, second.fetched_at);
    }

    #[tokio::test]
    async fn test_failure_with_empty_cache_is_error() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(502))
            .mount(&mock_server)
            .await;

        let cache = cache_for(&mock_server, Duration::from_secs(300));
        assert!(matches!(
            cache.get().await,
            Err(FetchError::HttpStatus(502))
        ));
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .expect(2)
            .mount(&mock_server)
            .await;

        let cache = cache_for(&mock_server, Duration::from_secs(300));
        cache.get().await.unwrap();
        cache.invalidate().await;
        cache.get().await.unwrap();
    }
}
