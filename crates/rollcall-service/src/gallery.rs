use std::sync::Arc;

use tokio::sync::RwLock;

use rollcall_core::GalleryEntry;
use rollcall_store::{Store, StoreError};

/// Cached gallery snapshot.
///
/// Readers clone the inner `Arc` and match against that; a refresh
/// swaps the pointer, so in-flight matches keep the snapshot they
/// started with and are never blocked by enrollment.
pub struct GalleryCache {
    store: Store,
    snapshot: RwLock<Arc<Vec<GalleryEntry>>>,
}

impl GalleryCache {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            snapshot: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Reload from the store, replacing the snapshot.
    pub async fn refresh(&self) -> Result<(), StoreError> {
        let gallery = self.store.load_gallery().await?;
        tracing::debug!(entries = gallery.len(), "gallery refreshed");
        *self.snapshot.write().await = Arc::new(gallery);
        Ok(())
    }

    pub async fn snapshot(&self) -> Arc<Vec<GalleryEntry>> {
        self.snapshot.read().await.clone()
    }
}
