/*!
 * Visit path provider.
 *
 * Maps a device name and the active data collection to a concrete
 * `(directory, filename stem)` pair under the visit root. The provider
 * owns the collection lifecycle: `update()` allocates a new collection
 * through the client and a failed allocation clears the active
 * collection so two runs can never write over each other. Paths are
 * derived, never created; directory existence is the caller's concern.
 */
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::collection::{CollectionClient, CollectionNumber};
use crate::error::{Result, VisitError};

/// A derived output location for one device in one collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPath {
    /// The directory data is written into (the flat visit root)
    pub directory: PathBuf,
    /// The filename stem, unique per (collection, device) within the
    /// visit; writers append their own extension
    pub stem: String,
}

impl DataPath {
    /// The full path with a writer-specific extension appended
    pub fn with_extension(&self, extension: &str) -> PathBuf {
        self.directory.join(format!("{}.{}", self.stem, extension))
    }
}

/// Provider of per-device data paths tied to the active collection
///
/// Implementations may choose their own stem template, but the stem
/// must uniquely identify `(collection, device)` within the visit.
#[async_trait]
pub trait PathProvider: Send + Sync {
    /// Allocate a new collection and make it the active one
    ///
    /// On failure the active collection is cleared before the error
    /// propagates; subsequent `data_path` calls fail until the next
    /// successful update.
    async fn update(&self) -> Result<CollectionNumber>;

    /// Derive the data path for a device under the active collection
    fn data_path(&self, device: &str) -> Result<DataPath>;
}

/// The currently active collection
#[derive(Debug, Clone)]
struct ActiveCollection {
    root: PathBuf,
    number: CollectionNumber,
}

/// The default path provider
///
/// Stems follow the `{beamline}-{collection}-{device}` template and all
/// files land flat in the visit root.
pub struct VisitPathProvider {
    beamline: String,
    root: PathBuf,
    client: Arc<dyn CollectionClient>,
    current: RwLock<Option<ActiveCollection>>,
}

impl VisitPathProvider {
    /// Create a provider for a visit
    ///
    /// # Arguments
    ///
    /// * `beamline` - The beamline tag encoded into filename stems
    /// * `root` - The absolute visit root directory
    /// * `client` - The collection-number client
    pub fn new(
        beamline: impl Into<String>,
        root: impl AsRef<Path>,
        client: Arc<dyn CollectionClient>,
    ) -> Self {
        Self {
            beamline: beamline.into(),
            root: root.as_ref().to_path_buf(),
            client,
            current: RwLock::new(None),
        }
    }

    /// The beamline tag
    pub fn beamline(&self) -> &str {
        &self.beamline
    }

    /// The visit root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The active collection number, if any
    pub fn current_collection(&self) -> Result<Option<CollectionNumber>> {
        let current = self.current.read().map_err(|_| VisitError::CollectionLock)?;
        Ok(current.as_ref().map(|collection| collection.number))
    }
}

#[async_trait]
impl PathProvider for VisitPathProvider {
    async fn update(&self) -> Result<CollectionNumber> {
        match self.client.next_collection().await {
            Ok(number) => {
                let mut current = self.current.write().map_err(|_| VisitError::CollectionLock)?;
                *current = Some(ActiveCollection {
                    root: self.root.clone(),
                    number,
                });
                info!("Collection {} active under {}", number, self.root.display());
                Ok(number)
            }
            Err(error) => {
                // Clear first so a failed allocation can never leave a
                // stale collection for the next run to write into
                if let Ok(mut current) = self.current.write() {
                    *current = None;
                }
                warn!("Collection update failed: {}", error);
                Err(error)
            }
        }
    }

    fn data_path(&self, device: &str) -> Result<DataPath> {
        let current = self.current.read().map_err(|_| VisitError::CollectionLock)?;
        let collection = current.as_ref().ok_or(VisitError::NoActiveCollection)?;
        Ok(DataPath {
            directory: collection.root.clone(),
            stem: format!("{}-{}-{}", self.beamline, collection.number, device),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::LocalCollectionClient;

    struct FailingClient;

    #[async_trait]
    impl CollectionClient for FailingClient {
        async fn next_collection(&self) -> Result<CollectionNumber> {
            Err(VisitError::numbering_service("connection refused"))
        }

        async fn current_collection(&self) -> Result<CollectionNumber> {
            Err(VisitError::numbering_service("connection refused"))
        }
    }

    fn provider_with_local() -> VisitPathProvider {
        VisitPathProvider::new("bl1", "/data/v", Arc::new(LocalCollectionClient::new()))
    }

    #[tokio::test]
    async fn test_paths_encode_collection_and_device() {
        let provider = provider_with_local();
        provider.update().await.unwrap();
        provider.update().await.unwrap();
        provider.update().await.unwrap();

        let path = provider.data_path("det").unwrap();
        assert_eq!(path.directory, PathBuf::from("/data/v"));
        assert_eq!(path.stem, "bl1-3-det");

        provider.update().await.unwrap();
        let path = provider.data_path("det2").unwrap();
        assert_eq!(path.directory, PathBuf::from("/data/v"));
        assert_eq!(path.stem, "bl1-4-det2");
    }

    #[tokio::test]
    async fn test_no_active_collection_before_update() {
        let provider = provider_with_local();
        let err = provider.data_path("det").unwrap_err();
        assert!(matches!(err, VisitError::NoActiveCollection));
    }

    #[tokio::test]
    async fn test_updates_are_strictly_increasing() {
        let provider = provider_with_local();
        let mut previous = provider.update().await.unwrap();
        for _ in 0..5 {
            let next = provider.update().await.unwrap();
            assert!(next > previous);
            previous = next;
        }
    }

    #[tokio::test]
    async fn test_failed_update_clears_active_collection() {
        let local = Arc::new(LocalCollectionClient::new());
        let provider = VisitPathProvider::new("bl1", "/data/v", local);
        provider.update().await.unwrap();
        assert!(provider.data_path("det").is_ok());

        let failing = VisitPathProvider::new("bl1", "/data/v", Arc::new(FailingClient));
        failing.update().await.unwrap_err();
        assert!(matches!(
            failing.data_path("det").unwrap_err(),
            VisitError::NoActiveCollection
        ));
    }

    #[tokio::test]
    async fn test_failure_invalidates_previous_collection() {
        struct FlakyClient {
            local: LocalCollectionClient,
            fail: std::sync::atomic::AtomicBool,
        }

        #[async_trait]
        impl CollectionClient for FlakyClient {
            async fn next_collection(&self) -> Result<CollectionNumber> {
                if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                    Err(VisitError::numbering_service("HTTP 500"))
                } else {
                    self.local.next_collection().await
                }
            }

            async fn current_collection(&self) -> Result<CollectionNumber> {
                self.local.current_collection().await
            }
        }

        let client = Arc::new(FlakyClient {
            local: LocalCollectionClient::new(),
            fail: std::sync::atomic::AtomicBool::new(false),
        });
        let provider = VisitPathProvider::new("bl1", "/data/v", client.clone());

        provider.update().await.unwrap();
        assert_eq!(provider.current_collection().unwrap().unwrap().value(), 1);

        client.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        provider.update().await.unwrap_err();
        assert_eq!(provider.current_collection().unwrap(), None);
        assert!(provider.data_path("det").is_err());

        // Recovery on the next successful update
        client.fail.store(false, std::sync::atomic::Ordering::SeqCst);
        provider.update().await.unwrap();
        assert_eq!(provider.data_path("det").unwrap().stem, "bl1-2-det");
    }

    #[tokio::test]
    async fn test_stems_unique_per_device() {
        let provider = provider_with_local();
        provider.update().await.unwrap();
        let a = provider.data_path("det_a").unwrap();
        let b = provider.data_path("det_b").unwrap();
        assert_ne!(a.stem, b.stem);
        assert_eq!(a.directory, b.directory);
    }

    #[tokio::test]
    async fn test_with_extension() {
        let provider = provider_with_local();
        provider.update().await.unwrap();
        let path = provider.data_path("det").unwrap();
        assert_eq!(path.with_extension("h5"), PathBuf::from("/data/v/bl1-1-det.h5"));
    }
}
