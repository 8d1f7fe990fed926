use crate::config::Config;
use crate::feed::parser::{parse_podcast, Podcast, MAX_EPISODES};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;

/// Errors that can occur while retrieving the podcast feed.
///
/// These errors cover the full lifecycle of a fetch: network issues,
/// HTTP errors, oversized or truncated bodies, and parsing failures.
///
/// Cloneable so that one failed refresh can be reported to every caller
/// that was waiting on it.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[source] Arc<reqwest::Error>),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Feed XML could not be parsed as RSS
    #[error("Parse error: {0}")]
    Parse(String),
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Network(Arc::new(e))
    }
}

/// Tunables for a single feed retrieval.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub timeout: Duration,
    pub max_bytes: usize,
    /// Retries for 429/5xx/truncated responses. Zero means a single attempt.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub max_episodes: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_bytes: DEFAULT_MAX_FEED_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            max_episodes: MAX_EPISODES,
        }
    }
}

impl FetchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
            max_bytes: config.max_feed_bytes,
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_episodes: config.max_episodes,
        }
    }

    /// Exponential backoff: base, 2x base, 4x base, ...
    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Builds the shared HTTP client used for upstream requests.
pub fn build_client(user_agent: &str) -> Result<reqwest::Client, FetchError> {
    let client = reqwest::Client::builder().user_agent(user_agent).build()?;
    Ok(client)
}

/// The upstream podcast feed: where it lives and how to fetch it.
#[derive(Debug, Clone)]
pub struct FeedSource {
    client: reqwest::Client,
    url: String,
    settings: FetchSettings,
}

impl FeedSource {
    pub fn new(client: reqwest::Client, url: impl Into<String>, settings: FetchSettings) -> Self {
        Self {
            client,
            url: url.into(),
            settings,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetches and parses the feed.
    ///
    /// # Behavior
    ///
    /// - Each attempt, headers and body together, is bounded by `settings.timeout`
    /// - 4xx responses fail immediately
    /// - 429, 5xx and truncated bodies are retried up to `settings.max_retries`
    ///   times with exponential backoff
    /// - Bodies larger than `settings.max_bytes` are rejected without buffering
    ///   the remainder
    ///
    /// # Errors
    ///
    /// - [`FetchError::Network`] - Connection or TLS errors
    /// - [`FetchError::Timeout`] - Request exceeded the timeout
    /// - [`FetchError::HttpStatus`] - Non-2xx HTTP response
    /// - [`FetchError::RateLimited`] - 429 response after max retries
    /// - [`FetchError::ResponseTooLarge`] - Body exceeded the size limit
    /// - [`FetchError::Parse`] - Body is not a usable RSS document
    pub async fn fetch(&self) -> Result<Podcast, FetchError> {
        let bytes = self.fetch_bytes().await?;

        let podcast = parse_podcast(&bytes, self.settings.max_episodes)
            .map_err(|e| FetchError::Parse(e.to_string()))?;

        tracing::debug!(
            feed = %self.url,
            episodes = podcast.episodes.len(),
            bytes = bytes.len(),
            "Fetched podcast feed"
        );

        Ok(podcast)
    }

    async fn fetch_bytes(&self) -> Result<Vec<u8>, FetchError> {
        let settings = &self.settings;
        let mut retry_count = 0;

        loop {
            // One deadline covers the headers and the body of each attempt
            let deadline = tokio::time::Instant::now() + settings.timeout;
            let response = tokio::time::timeout_at(deadline, self.client.get(&self.url).send())
                .await
                .map_err(|_| FetchError::Timeout)?
                .map_err(FetchError::from)?;

            let status = response.status();

            // EDGE-004: Handle rate limiting with exponential backoff
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if retry_count >= settings.max_retries {
                    return Err(FetchError::RateLimited(settings.max_retries));
                }

                let delay = settings.backoff(retry_count);
                tracing::warn!(
                    feed = %self.url,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off"
                );

                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if status.is_server_error() {
                if retry_count >= settings.max_retries {
                    return Err(FetchError::HttpStatus(status.as_u16()));
                }

                let delay = settings.backoff(retry_count);
                tracing::warn!(
                    feed = %self.url,
                    status = %status,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Server error, retrying after delay"
                );

                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            // EDGE-002: 4xx errors fail immediately
            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            let body = tokio::time::timeout_at(
                deadline,
                read_limited_bytes(response, settings.max_bytes),
            )
            .await
            .map_err(|_| FetchError::Timeout)?;

            match body {
                Ok(bytes) => return Ok(bytes),
                Err(FetchError::IncompleteResponse { expected, received }) => {
                    // EDGE-005: Retry truncated downloads
                    if retry_count >= settings.max_retries {
                        return Err(FetchError::IncompleteResponse { expected, received });
                    }

                    let delay = settings.backoff(retry_count);
                    tracing::debug!(
                        feed = %self.url,
                        expected = expected,
                        received = received,
                        attempt = retry_count + 1,
                        "Retrying incomplete download"
                    );

                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::from)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{any, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>FHIR Talk</title>
    <item><guid>1</guid><title>Test</title></item>
</channel></rss>"#;

    fn fast_settings() -> FetchSettings {
        FetchSettings {
            retry_base_delay: Duration::from_millis(5),
            ..FetchSettings::default()
        }
    }

    fn source(server: &MockServer, settings: FetchSettings) -> FeedSource {
        FeedSource::new(
            reqwest::Client::new(),
            format!("{}/feed", server.uri()),
            settings,
        )
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("Content-Type", "application/rss+xml"),
            )
            .mount(&mock_server)
            .await;

        let podcast = source(&mock_server, fast_settings()).fetch().await.unwrap();
        assert_eq!(podcast.title, "FHIR Talk");
        assert_eq!(podcast.episodes.len(), 1);
        assert_eq!(podcast.episodes[0].guid, "1");
    }

    #[tokio::test]
    async fn test_fetch_404_fails_without_retry() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let result = source(&mock_server, fast_settings()).fetch().await;
        match result.unwrap_err() {
            FetchError::HttpStatus(404) => {}
            e => panic!("Expected HttpStatus(404), got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_fetch_500_retries_then_fails() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3) // Initial request + 2 retries
            .mount(&mock_server)
            .await;

        let result = source(&mock_server, fast_settings()).fetch().await;
        match result.unwrap_err() {
            FetchError::HttpStatus(500) => {}
            e => panic!("Expected HttpStatus(500), got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_zero_retries_is_single_shot() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&mock_server)
            .await;

        let settings = FetchSettings {
            max_retries: 0,
            ..fast_settings()
        };
        let result = source(&mock_server, settings).fetch().await;
        assert!(matches!(result, Err(FetchError::HttpStatus(503))));
    }

    #[tokio::test]
    async fn test_fetch_503_retry_then_success() {
        let mock_server = MockServer::start().await;

        Mock::given(any())
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&mock_server)
            .await;

        Mock::given(any())
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .mount(&mock_server)
            .await;

        let podcast = source(&mock_server, fast_settings()).fetch().await.unwrap();
        assert_eq!(podcast.episodes.len(), 1);
    }

    #[tokio::test]
    async fn test_rate_limited_after_retries() {
        let mock_server = MockServer::start().await;
        Mock::given(any())
            .respond_with(ResponseTemplate::new(429))
            .mount(&mock_server)
            .await;

        let result = source(&mock_server, fast_settings()).fetch().await;
        assert!(matches!(result, Err(FetchError::RateLimited(2))));
    }

    #[tokio::test]
    async fn test_malformed_feed_parse_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<not valid xml"))
            .mount(&mock_server)
            .await;

        let result = source(&mock_server, fast_settings()).fetch().await;
        match result.unwrap_err() {
            FetchError::Parse(_) => {}
            e => panic!("Expected Parse error, got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(2048)))
            .mount(&mock_server)
            .await;

        let settings = FetchSettings {
            max_bytes: 1024,
            ..fast_settings()
        };
        let result = source(&mock_server, settings).fetch().await;
        assert!(matches!(result, Err(FetchError::ResponseTooLarge)));
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&mock_server)
            .await;

        let settings = FetchSettings {
            timeout: Duration::from_millis(50),
            ..fast_settings()
        };
        let result = source(&mock_server, settings).fetch().await;
        assert!(matches!(result, Err(FetchError::Timeout)));
    }

    #[tokio::test]
    async fn test_stalled_body_times_out() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Sends headers and a few body bytes, then goes quiet
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\n<rss>")
                .await
                .unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let settings = FetchSettings {
            timeout: Duration::from_millis(200),
            max_retries: 0,
            ..fast_settings()
        };
        let source = FeedSource::new(
            reqwest::Client::new(),
            format!("http://{addr}/feed"),
            settings,
        );

        let result = tokio::time::timeout(Duration::from_secs(3), source.fetch())
            .await
            .expect("fetch should give up once the deadline passes");
        assert!(matches!(result, Err(FetchError::Timeout)));
    }

    #[test]
    fn test_backoff_doubles() {
        let settings = FetchSettings {
            retry_base_delay: Duration::from_millis(100),
            ..FetchSettings::default()
        };
        assert_eq!(settings.backoff(0), Duration::from_millis(100));
        assert_eq!(settings.backoff(1), Duration::from_millis(200));
        assert_eq!(settings.backoff(2), Duration::from_millis(400));
    }
}
