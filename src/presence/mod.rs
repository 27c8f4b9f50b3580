//! Directory of online drivers.
//!
//! The registry is ephemeral and best-effort: it only affects how fast and how well
//! candidates are found, never the correctness of an assignment. The backing
//! [`PresenceStore`] is injected so a multi-instance deployment can swap in a shared
//! store; the bundled [`InMemoryPresenceStore`] is single-process only.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::AppError;
use crate::models::driver::{ConnectionHandle, GeoPoint, PresenceEntry};

pub use memory::InMemoryPresenceStore;

#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn set(&self, entry: PresenceEntry) -> Result<(), AppError>;

    async fn get(&self, driver_id: &Uuid) -> Result<Option<PresenceEntry>, AppError>;

    /// Removes the entry, returning it if it existed.
    async fn delete(&self, driver_id: &Uuid) -> Result<Option<PresenceEntry>, AppError>;

    async fn list(&self) -> Result<Vec<PresenceEntry>, AppError>;
}

#[derive(Clone)]
pub struct PresenceRegistry {
    store: Arc<dyn PresenceStore>,
    clock: Arc<dyn Clock>,
}

impl PresenceRegistry {
    pub fn new(store: Arc<dyn PresenceStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn set_online(
        &self,
        driver_id: Uuid,
        location: Option<GeoPoint>,
        handle: Option<ConnectionHandle>,
    ) -> Result<PresenceEntry, AppError> {
        let entry = PresenceEntry {
            driver_id,
            handle,
            location,
            updated_at: self.clock.now(),
        };

        self.store.set(entry.clone()).await?;
        Ok(entry)
    }

    pub async fn set_offline(&self, driver_id: &Uuid) -> Result<bool, AppError> {
        Ok(self.store.delete(driver_id).await?.is_some())
    }

    /// Removes the driver only if the entry still belongs to `handle`, so a stale
    /// disconnect cannot evict a newer session.
    pub async fn set_offline_if_handle(
        &self,
        driver_id: &Uuid,
        handle: &ConnectionHandle,
    ) -> Result<bool, AppError> {
        match self.store.get(driver_id).await? {
            Some(entry) if entry.handle.as_ref() == Some(handle) => {
                self.set_offline(driver_id).await
            }
            _ => Ok(false),
        }
    }

    /// Refreshes a present driver's location. Returns `None` when the driver is not online.
    pub async fn update_location(
        &self,
        driver_id: &Uuid,
        location: GeoPoint,
    ) -> Result<Option<PresenceEntry>, AppError> {
        let Some(mut entry) = self.store.get(driver_id).await? else {
            return Ok(None);
        };

        entry.location = Some(location);
        entry.updated_at = self.clock.now();
        self.store.set(entry.clone()).await?;

        Ok(Some(entry))
    }

    pub async fn get(&self, driver_id: &Uuid) -> Result<Option<PresenceEntry>, AppError> {
        self.store.get(driver_id).await
    }

    pub async fn list_all(&self) -> Result<Vec<PresenceEntry>, AppError> {
        self.store.list().await
    }
}
