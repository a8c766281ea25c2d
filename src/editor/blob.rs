//! Object URLs for locally selected files.
//!
//! A file the user picks is kept in memory under a `blob:<uuid>` URL so it
//! can be opened like any other image reference. Whoever creates the URL
//! owns it and must revoke it once the editor closes.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// URL scheme used for in-memory images
pub const BLOB_SCHEME: &str = "blob:";

/// Shared in-memory blob registry
#[derive(Debug, Clone, Default)]
pub struct BlobStore {
    blobs: Arc<Mutex<HashMap<String, Bytes>>>,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register bytes and return a fresh object URL for them
    pub fn create_object_url(&self, data: Bytes) -> String {
        let url = format!("{}{}", BLOB_SCHEME, Uuid::new_v4());
        tracing::debug!("Created object URL {} ({} bytes)", url, data.len());
        self.lock().insert(url.clone(), data);
        url
    }

    /// Look up the bytes behind an object URL
    pub fn resolve(&self, url: &str) -> Option<Bytes> {
        self.lock().get(url).cloned()
    }

    /// Release an object URL; returns false if it was unknown or already revoked
    pub fn revoke(&self, url: &str) -> bool {
        let removed = self.lock().remove(url).is_some();
        if removed {
            tracing::debug!("Revoked object URL {}", url);
        }
        removed
    }

    /// Number of live object URLs
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Bytes>> {
        self.blobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
