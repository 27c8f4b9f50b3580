use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::PresenceStore;
use crate::error::AppError;
use crate::models::driver::PresenceEntry;

#[derive(Debug, Default)]
pub struct InMemoryPresenceStore {
    entries: DashMap<Uuid, PresenceEntry>,
}

impl InMemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PresenceStore for InMemoryPresenceStore {
    async fn set(&self, entry: PresenceEntry) -> Result<(), AppError> {
        self.entries.insert(entry.driver_id, entry);
        Ok(())
    }

    async fn get(&self, driver_id: &Uuid) -> Result<Option<PresenceEntry>, AppError> {
        Ok(self.entries.get(driver_id).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, driver_id: &Uuid) -> Result<Option<PresenceEntry>, AppError> {
        Ok(self.entries.remove(driver_id).map(|(_, entry)| entry))
    }

    async fn list(&self) -> Result<Vec<PresenceEntry>, AppError> {
        Ok(self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }
}
