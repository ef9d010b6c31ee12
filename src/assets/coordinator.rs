//! Per-asset-type load state machine with single-flight loading.

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::ArchiveResult;
use crate::manifest::AssetType;

/// Observable load state of one asset type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetState {
    Unloaded,
    Loading,
    Loaded,
    Error,
}

/// Internal slot; `Loading` carries the completion signal joiners wait on.
enum Slot {
    Loading(watch::Receiver<Option<bool>>),
    Loaded,
    Error,
}

impl Slot {
    fn state(&self) -> AssetState {
        match self {
            Slot::Loading(_) => AssetState::Loading,
            Slot::Loaded => AssetState::Loaded,
            Slot::Error => AssetState::Error,
        }
    }
}

enum Next {
    Done(bool),
    Join(watch::Receiver<Option<bool>>),
    Run(watch::Sender<Option<bool>>),
}

/// Tracks Unloaded → Loading → {Loaded, Error} for each [`AssetType`].
///
/// A type absent from the map is Unloaded. Terminal states are sticky: a
/// failed type is only retried by building a new coordinator, which happens
/// when another archive is opened.
#[derive(Default)]
pub struct AssetLoadCoordinator {
    slots: Mutex<HashMap<AssetType, Slot>>,
}

impl AssetLoadCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AssetType, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self, asset_type: AssetType) -> AssetState {
        self.lock()
            .get(&asset_type)
            .map_or(AssetState::Unloaded, Slot::state)
    }

    /// Make sure `asset_type` is loaded, running `load` at most once.
    ///
    /// Concurrent callers for a type that is already loading wait for the
    /// running attempt and receive its outcome; `load` is not invoked again.
    pub async fn ensure_loaded<F, Fut>(&self, asset_type: AssetType, load: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ArchiveResult<()>>,
    {
        let next = {
            let mut slots = self.lock();
            match slots.get(&asset_type) {
                Some(Slot::Loaded) => Next::Done(true),
                Some(Slot::Error) => Next::Done(false),
                Some(Slot::Loading(rx)) => Next::Join(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    slots.insert(asset_type, Slot::Loading(rx));
                    Next::Run(tx)
                }
            }
        };

        match next {
            Next::Done(outcome) => outcome,
            Next::Join(mut rx) => {
                debug!(%asset_type, "joining in-flight load");
                match rx.wait_for(Option::is_some).await {
                    Ok(outcome) => (*outcome).unwrap_or(false),
                    Err(_) => false,
                }
            }
            Next::Run(tx) => {
                let mut attempt = Attempt {
                    coordinator: self,
                    asset_type,
                    tx: Some(tx),
                };
                debug!(%asset_type, "loading");
                let outcome = match load().await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(%asset_type, error = %e, "asset load failed");
                        false
                    }
                };
                attempt.finish(outcome);
                outcome
            }
        }
    }

    fn settle(&self, asset_type: AssetType, outcome: bool) {
        let slot = if outcome { Slot::Loaded } else { Slot::Error };
        self.lock().insert(asset_type, slot);
    }
}

/// The single running attempt for one type. Dropping it unfinished (the load
/// future was cancelled) settles the type as Error so joiners are released.
struct Attempt<'a> {
    coordinator: &'a AssetLoadCoordinator,
    asset_type: AssetType,
    tx: Option<watch::Sender<Option<bool>>>,
}

impl Attempt<'_> {
    fn finish(&mut self, outcome: bool) {
        if let Some(tx) = self.tx.take() {
            self.coordinator.settle(self.asset_type, outcome);
            tx.send_replace(Some(outcome));
        }
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if self.tx.is_some() {
            warn!(asset_type = %self.asset_type, "load abandoned before completion");
            self.finish(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ArchiveError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn loads_once_then_reports_loaded() {
        let coordinator = AssetLoadCoordinator::new();
        let calls = AtomicUsize::new(0);

        assert_eq!(coordinator.state(AssetType::Mesh), AssetState::Unloaded);
        let first = coordinator
            .ensure_loaded(AssetType::Mesh, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        let second = coordinator
            .ensure_loaded(AssetType::Mesh, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(first && second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.state(AssetType::Mesh), AssetState::Loaded);
    }

    #[tokio::test]
    async fn error_is_sticky() {
        let coordinator = AssetLoadCoordinator::new();
        let failed = coordinator
            .ensure_loaded(AssetType::Splat, || async {
                Err(ArchiveError::NotFound("scene".into()))
            })
            .await;
        let retried = coordinator
            .ensure_loaded(AssetType::Splat, || async { Ok(()) })
            .await;

        assert!(!failed && !retried);
        assert_eq!(coordinator.state(AssetType::Splat), AssetState::Error);
        assert_eq!(coordinator.state(AssetType::Mesh), AssetState::Unloaded);
    }

    #[tokio::test]
    async fn cancelled_attempt_settles_as_error() {
        let coordinator = AssetLoadCoordinator::new();
        {
            let pending = coordinator.ensure_loaded(AssetType::Pointcloud, || {
                std::future::pending::<ArchiveResult<()>>()
            });
            tokio::pin!(pending);
            let polled = futures_poll_once(pending.as_mut()).await;
            assert!(polled.is_none());
            assert_eq!(coordinator.state(AssetType::Pointcloud), AssetState::Loading);
        }
        assert_eq!(coordinator.state(AssetType::Pointcloud), AssetState::Error);
    }

    async fn futures_poll_once<F: Future + Unpin>(fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            out = fut => Some(out),
            _ = std::future::ready(()) => None,
        }
    }
}
