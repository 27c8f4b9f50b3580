use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::driver::PenaltyStatus;

/// Read side of the penalty subsystem. Drivers without a record are unpenalized.
#[async_trait]
pub trait PenaltyLookup: Send + Sync {
    async fn penalties(
        &self,
        driver_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, PenaltyStatus>, AppError>;
}

#[derive(Debug, Default)]
pub struct InMemoryPenaltyDirectory {
    records: DashMap<Uuid, PenaltyStatus>,
}

impl InMemoryPenaltyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, driver_id: Uuid, status: PenaltyStatus) {
        self.records.insert(driver_id, status);
    }

    pub fn clear(&self, driver_id: &Uuid) {
        self.records.remove(driver_id);
    }
}

#[async_trait]
impl PenaltyLookup for InMemoryPenaltyDirectory {
    async fn penalties(
        &self,
        driver_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, PenaltyStatus>, AppError> {
        Ok(driver_ids
            .iter()
            .filter_map(|id| {
                self.records
                    .get(id)
                    .map(|status| (*id, status.value().clone()))
            })
            .collect())
    }
}
