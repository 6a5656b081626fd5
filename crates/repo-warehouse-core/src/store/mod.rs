//! Storage abstraction for Repo Warehouse.
//!
//! The [`WarehouseStore`] trait is the state store behind the lifecycle and
//! the coordinator: warehouses, their last processed commit, and the
//! documents produced by the last successful run. Backends must offer
//! read-your-writes consistency on a single node.
//!
//! Status writes are compare-and-set on the previous status so that two
//! writers can never both believe they performed the same transition.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::lifecycle::StatusChange;
use crate::models::{DocumentCommitRecord, GeneratedDocument, Warehouse, WarehouseStatus};

/// Abstract storage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_warehouse`](WarehouseStore::insert_warehouse) | Create a warehouse (address must be new) |
/// | [`save_submission`](WarehouseStore::save_submission) | Overwrite submission fields and reset to `Pending` |
/// | [`apply_status`](WarehouseStore::apply_status) | Compare-and-set status transition |
/// | [`set_progress`](WarehouseStore::set_progress) | Monotonic progress update while processing |
/// | [`put_commit_record`](WarehouseStore::put_commit_record) | Replace the active commit record |
/// | [`replace_documents`](WarehouseStore::replace_documents) | Replace generated documents |
#[async_trait]
pub trait WarehouseStore: Send + Sync {
    async fn insert_warehouse(&self, warehouse: &Warehouse) -> Result<()>;

    /// Persist address, branch, model, description, status, progress, and
    /// error of an existing warehouse.
    async fn save_submission(&self, warehouse: &Warehouse) -> Result<()>;

    async fn get_warehouse(&self, id: &str) -> Result<Option<Warehouse>>;

    async fn find_by_address(&self, address: &str) -> Result<Option<Warehouse>>;

    async fn find_by_name(&self, organization: &str, name: &str) -> Result<Option<Warehouse>>;

    /// Page of warehouses, newest first, plus the total count.
    async fn list_warehouses(&self, offset: i64, limit: i64) -> Result<(i64, Vec<Warehouse>)>;

    /// Apply `change` only if the stored status still equals `expected`.
    ///
    /// Returns `false` when another writer got there first.
    async fn apply_status(
        &self,
        id: &str,
        expected: WarehouseStatus,
        change: &StatusChange,
    ) -> Result<bool>;

    /// Raise progress while the warehouse is `Processing`.
    ///
    /// Returns `false` if the warehouse left `Processing` or already reports
    /// a higher value.
    async fn set_progress(&self, id: &str, progress: u8) -> Result<bool>;

    async fn get_commit_record(&self, warehouse_id: &str) -> Result<Option<DocumentCommitRecord>>;

    async fn put_commit_record(&self, record: &DocumentCommitRecord) -> Result<()>;

    async fn replace_documents(&self, warehouse_id: &str, documents: &[GeneratedDocument])
        -> Result<()>;

    async fn list_documents(&self, warehouse_id: &str) -> Result<Vec<GeneratedDocument>>;
}
