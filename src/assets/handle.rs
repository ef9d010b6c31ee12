//! Blob handles and their scoped ownership.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;
use uuid::Uuid;

/// Process-wide table resolving blob URLs to bytes.
///
/// A URL stays resolvable until it is revoked, either by the [`HandleScope`]
/// that tracks it or, for a disowned handle, by whoever took it over.
#[derive(Debug, Default)]
pub struct BlobRegistry {
    blobs: Mutex<HashMap<String, Arc<[u8]>>>,
}

impl BlobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<[u8]>>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register bytes and return a fresh `blob:` URL for them
    pub fn register(&self, bytes: Arc<[u8]>) -> String {
        let url = format!("blob:scanzip/{}", Uuid::new_v4());
        self.lock().insert(url.clone(), bytes);
        url
    }

    pub fn resolve(&self, url: &str) -> Option<Arc<[u8]>> {
        self.lock().get(url).cloned()
    }

    /// Release a URL. Returns false if it was not registered.
    pub fn revoke(&self, url: &str) -> bool {
        self.lock().remove(url).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Verified entry bytes plus the URL the rendering layer can dereference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedAsset {
    pub entry_name: String,
    pub bytes: Arc<[u8]>,
    pub url: String,
}

impl ExtractedAsset {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Default)]
struct ScopeState {
    assets: HashMap<String, ExtractedAsset>,
    disposed: bool,
}

/// Owns every handle extracted from one archive and releases them together.
///
/// Release happens on [`dispose`](Self::dispose) or drop, whichever comes
/// first. Handles tracked after disposal are released immediately, so a load
/// that finishes after its archive was replaced cannot leak a URL.
pub struct HandleScope {
    registry: Arc<BlobRegistry>,
    state: Mutex<ScopeState>,
}

impl HandleScope {
    pub fn new(registry: Arc<BlobRegistry>) -> Self {
        Self {
            registry,
            state: Mutex::new(ScopeState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScopeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached handle for an entry name
    pub fn get(&self, entry_name: &str) -> Option<ExtractedAsset> {
        self.lock().assets.get(entry_name).cloned()
    }

    /// Wrap verified bytes in a handle and track it.
    ///
    /// If the name is already tracked the existing handle is returned and the
    /// new bytes are dropped.
    pub fn track(&self, entry_name: &str, bytes: Vec<u8>) -> ExtractedAsset {
        let mut state = self.lock();
        if let Some(existing) = state.assets.get(entry_name) {
            return existing.clone();
        }

        let bytes: Arc<[u8]> = bytes.into();
        let url = self.registry.register(Arc::clone(&bytes));
        let asset = ExtractedAsset {
            entry_name: entry_name.to_string(),
            bytes,
            url,
        };

        if state.disposed {
            self.registry.revoke(&asset.url);
        } else {
            state.assets.insert(entry_name.to_string(), asset.clone());
        }
        asset
    }

    /// Stop tracking a handle so disposal leaves its URL alive.
    ///
    /// The caller becomes responsible for [`BlobRegistry::revoke`].
    pub fn disown(&self, entry_name: &str) -> Option<ExtractedAsset> {
        self.lock().assets.remove(entry_name)
    }

    /// Release every tracked handle. Returns how many were released.
    pub fn dispose(&self) -> usize {
        let assets = {
            let mut state = self.lock();
            state.disposed = true;
            std::mem::take(&mut state.assets)
        };
        for asset in assets.values() {
            self.registry.revoke(&asset.url);
        }
        if !assets.is_empty() {
            debug!(released = assets.len(), "released blob handles");
        }
        assets.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    /// Number of handles currently tracked
    pub fn len(&self) -> usize {
        self.lock().assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().assets.is_empty()
    }
}

impl Drop for HandleScope {
    fn drop(&mut self) {
        self.dispose();
    }
}
