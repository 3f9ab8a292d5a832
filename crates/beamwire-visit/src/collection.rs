/*!
 * Collection-number clients.
 *
 * A collection is a numbered unit within a visit; each run is assigned
 * one by the numbering service, the external authority for the
 * monotonically increasing counter. Two client variants share one
 * interface: a remote HTTP client and a local in-process counter for
 * tests and offline runs.
 */
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, VisitError};

/// A single monotonically increasing positive collection number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollectionNumber(u64);

impl CollectionNumber {
    /// Create a collection number
    pub fn new(number: u64) -> Self {
        Self(number)
    }

    /// The raw number
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CollectionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CollectionNumber {
    fn from(number: u64) -> Self {
        Self(number)
    }
}

/// Client interface to the numbering service
///
/// The interface is narrow on purpose: one request per call, failures
/// surface as errors, no retry policy.
#[async_trait]
pub trait CollectionClient: Send + Sync {
    /// Allocate the next collection number for the visit
    async fn next_collection(&self) -> Result<CollectionNumber>;

    /// Read the current collection number without allocating
    async fn current_collection(&self) -> Result<CollectionNumber>;
}

/// Wire DTO for the numbering-service responses
#[derive(Debug, Deserialize)]
struct CollectionResponse {
    #[serde(rename = "collectionNumber")]
    collection_number: u64,
}

/// Remote HTTP client for the numbering service
///
/// `POST {base}/numtracker` allocates the next collection number;
/// `GET {base}/numtracker` reads the current one. Non-2xx responses are
/// errors and there is no retry: a failed allocation must surface so
/// two runs cannot write over each other.
pub struct RemoteCollectionClient {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteCollectionClient {
    /// Create a client for the numbering service at `base_url`
    pub fn new(base_url: impl AsRef<str>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VisitError::numbering_service(format!("Failed to build client: {}", e)))?;
        let endpoint = format!("{}/numtracker", base_url.as_ref().trim_end_matches('/'));
        Ok(Self { client, endpoint })
    }

    async fn parse(response: reqwest::Response) -> Result<CollectionNumber> {
        let body: CollectionResponse = response.error_for_status()?.json().await?;
        Ok(CollectionNumber::new(body.collection_number))
    }
}

#[async_trait]
impl CollectionClient for RemoteCollectionClient {
    async fn next_collection(&self) -> Result<CollectionNumber> {
        let response = self.client.post(&self.endpoint).send().await?;
        let number = Self::parse(response).await?;
        debug!("Allocated collection {}", number);
        Ok(number)
    }

    async fn current_collection(&self) -> Result<CollectionNumber> {
        let response = self.client.get(&self.endpoint).send().await?;
        Self::parse(response).await
    }
}

/// Local in-process counter variant, for tests and offline runs
pub struct LocalCollectionClient {
    counter: AtomicU64,
}

impl LocalCollectionClient {
    /// Create a counter starting at zero
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Create a counter starting at the given value
    pub fn starting_at(value: u64) -> Self {
        Self {
            counter: AtomicU64::new(value),
        }
    }
}

impl Default for LocalCollectionClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CollectionClient for LocalCollectionClient {
    async fn next_collection(&self) -> Result<CollectionNumber> {
        let next = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(CollectionNumber::new(next))
    }

    async fn current_collection(&self) -> Result<CollectionNumber> {
        Ok(CollectionNumber::new(self.counter.load(Ordering::SeqCst)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_local_client_increments() {
        let client = LocalCollectionClient::new();
        assert_eq!(client.current_collection().await.unwrap().value(), 0);
        assert_eq!(client.next_collection().await.unwrap().value(), 1);
        assert_eq!(client.next_collection().await.unwrap().value(), 2);
        assert_eq!(client.current_collection().await.unwrap().value(), 2);
    }

    #[tokio::test]
    async fn test_local_client_starting_at() {
        let client = LocalCollectionClient::starting_at(41);
        assert_eq!(client.next_collection().await.unwrap().value(), 42);
    }

    #[tokio::test]
    async fn test_remote_allocate_and_read() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/numtracker"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "collectionNumber": 17
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/numtracker"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "collectionNumber": 17
            })))
            .mount(&server)
            .await;

        let client =
            RemoteCollectionClient::new(server.uri(), Duration::from_secs(1)).unwrap();
        assert_eq!(client.next_collection().await.unwrap().value(), 17);
        assert_eq!(client.current_collection().await.unwrap().value(), 17);
    }

    #[tokio::test]
    async fn test_remote_non_success_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/numtracker"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client =
            RemoteCollectionClient::new(server.uri(), Duration::from_secs(1)).unwrap();
        let err = client.next_collection().await.unwrap_err();
        assert!(matches!(err, VisitError::NumberingService(_)));
    }

    #[tokio::test]
    async fn test_remote_malformed_body_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/numtracker"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client =
            RemoteCollectionClient::new(server.uri(), Duration::from_secs(1)).unwrap();
        let err = client.current_collection().await.unwrap_err();
        assert!(matches!(err, VisitError::NumberingService(_)));
    }

    #[test]
    fn test_trailing_slash_normalised() {
        let client =
            RemoteCollectionClient::new("http://numtracker.example/", Duration::from_secs(1))
                .unwrap();
        assert_eq!(client.endpoint, "http://numtracker.example/numtracker");
    }

    #[test]
    fn test_collection_number_display() {
        assert_eq!(CollectionNumber::new(7).to_string(), "7");
        assert!(CollectionNumber::new(8) > CollectionNumber::new(7));
    }
}
