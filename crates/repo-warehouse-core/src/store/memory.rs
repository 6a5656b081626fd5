//! In-memory [`WarehouseStore`] implementation for tests and embedding.
//!
//! Uses `HashMap`s behind `std::sync::RwLock`. Nothing survives the process.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::lifecycle::StatusChange;
use crate::models::{DocumentCommitRecord, GeneratedDocument, Warehouse, WarehouseStatus};

use super::WarehouseStore;

/// In-memory store.
pub struct InMemoryStore {
    warehouses: RwLock<HashMap<String, Warehouse>>,
    records: RwLock<HashMap<String, DocumentCommitRecord>>,
    documents: RwLock<HashMap<String, Vec<GeneratedDocument>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            warehouses: RwLock::new(HashMap::new()),
            records: RwLock::new(HashMap::new()),
            documents: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

#[async_trait]
impl WarehouseStore for InMemoryStore {
    async fn insert_warehouse(&self, warehouse: &Warehouse) -> Result<()> {
        let mut map = write(&self.warehouses)?;
        if map.values().any(|w| w.address == warehouse.address) {
            bail!("warehouse with address '{}' already exists", warehouse.address);
        }
        map.insert(warehouse.id.clone(), warehouse.clone());
        Ok(())
    }

    async fn save_submission(&self, warehouse: &Warehouse) -> Result<()> {
        let mut map = write(&self.warehouses)?;
        let stored = map
            .get_mut(&warehouse.id)
            .ok_or_else(|| anyhow!("warehouse {} does not exist", warehouse.id))?;
        stored.address = warehouse.address.clone();
        stored.branch = warehouse.branch.clone();
        stored.model = warehouse.model.clone();
        stored.description = warehouse.description.clone();
        stored.status = warehouse.status;
        stored.progress = warehouse.progress;
        stored.error = warehouse.error.clone();
        Ok(())
    }

    async fn get_warehouse(&self, id: &str) -> Result<Option<Warehouse>> {
        Ok(read(&self.warehouses)?.get(id).cloned())
    }

    async fn find_by_address(&self, address: &str) -> Result<Option<Warehouse>> {
        Ok(read(&self.warehouses)?
            .values()
            .find(|w| w.address == address)
            .cloned())
    }

    async fn find_by_name(&self, organization: &str, name: &str) -> Result<Option<Warehouse>> {
        Ok(read(&self.warehouses)?
            .values()
            .filter(|w| w.organization_name == organization && w.name == name)
            .min_by_key(|w| w.created_at)
            .cloned())
    }

    async fn list_warehouses(&self, offset: i64, limit: i64) -> Result<(i64, Vec<Warehouse>)> {
        let map = read(&self.warehouses)?;
        let mut all: Vec<Warehouse> = map.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = all.len() as i64;
        let page = all
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((total, page))
    }

    async fn apply_status(
        &self,
        id: &str,
        expected: WarehouseStatus,
        change: &StatusChange,
    ) -> Result<bool> {
        let mut map = write(&self.warehouses)?;
        let Some(stored) = map.get_mut(id) else {
            return Ok(false);
        };
        if stored.status != expected {
            return Ok(false);
        }
        stored.status = change.status;
        stored.progress = change.progress;
        stored.error = change.error.clone();
        if let Some(version) = &change.version {
            stored.version = version.clone();
        }
        Ok(true)
    }

    async fn set_progress(&self, id: &str, progress: u8) -> Result<bool> {
        let mut map = write(&self.warehouses)?;
        match map.get_mut(id) {
            Some(stored)
                if stored.status == WarehouseStatus::Processing && stored.progress <= progress =>
            {
                stored.progress = progress;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_commit_record(&self, warehouse_id: &str) -> Result<Option<DocumentCommitRecord>> {
        Ok(read(&self.records)?.get(warehouse_id).cloned())
    }

    async fn put_commit_record(&self, record: &DocumentCommitRecord) -> Result<()> {
        write(&self.records)?.insert(record.warehouse_id.clone(), record.clone());
        Ok(())
    }

    async fn replace_documents(
        &self,
        warehouse_id: &str,
        documents: &[GeneratedDocument],
    ) -> Result<()> {
        write(&self.documents)?.insert(warehouse_id.to_string(), documents.to_vec());
        Ok(())
    }

    async fn list_documents(&self, warehouse_id: &str) -> Result<Vec<GeneratedDocument>> {
        Ok(read(&self.documents)?
            .get(warehouse_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReferenceKind;
    use chrono::{Duration, Utc};

    fn warehouse(id: &str, address: &str) -> Warehouse {
        Warehouse {
            id: id.to_string(),
            address: address.to_string(),
            organization_name: "org".to_string(),
            name: id.to_string(),
            branch: None,
            kind: ReferenceKind::Remote,
            status: WarehouseStatus::Pending,
            progress: 0,
            error: String::new(),
            version: "1.0.0".to_string(),
            description: String::new(),
            model: String::new(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_address_is_rejected() {
        let store = InMemoryStore::new();
        store.insert_warehouse(&warehouse("a", "x.git")).await.unwrap();
        assert!(store.insert_warehouse(&warehouse("b", "x.git")).await.is_err());
    }

    #[tokio::test]
    async fn status_write_is_compare_and_set() {
        let store = InMemoryStore::new();
        store.insert_warehouse(&warehouse("a", "x.git")).await.unwrap();
        let change = StatusChange {
            status: WarehouseStatus::Processing,
            progress: 0,
            error: String::new(),
            version: None,
        };
        assert!(store.apply_status("a", WarehouseStatus::Pending, &change).await.unwrap());
        assert!(!store.apply_status("a", WarehouseStatus::Pending, &change).await.unwrap());
    }

    #[tokio::test]
    async fn progress_only_moves_forward_while_processing() {
        let store = InMemoryStore::new();
        store.insert_warehouse(&warehouse("a", "x.git")).await.unwrap();
        assert!(!store.set_progress("a", 10).await.unwrap());

        let change = StatusChange {
            status: WarehouseStatus::Processing,
            progress: 0,
            error: String::new(),
            version: None,
        };
        store.apply_status("a", WarehouseStatus::Pending, &change).await.unwrap();
        assert!(store.set_progress("a", 20).await.unwrap());
        assert!(!store.set_progress("a", 5).await.unwrap());
        assert_eq!(store.get_warehouse("a").await.unwrap().unwrap().progress, 20);
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let store = InMemoryStore::new();
        let mut old = warehouse("old", "old.git");
        old.created_at = Utc::now() - Duration::hours(1);
        store.insert_warehouse(&old).await.unwrap();
        store.insert_warehouse(&warehouse("new", "new.git")).await.unwrap();

        let (total, page) = store.list_warehouses(0, 1).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(page[0].id, "new");
    }
}
