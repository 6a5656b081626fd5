//! Query and submission boundary.
//!
//! Every operation returns a [`Reply`] that serializes to JSON: the payload
//! itself, `{"not_found": ...}` when no warehouse matches, or
//! `{"error": ...}` for any other failure. Errors never propagate past this
//! module.

use serde::Serialize;
use std::sync::Arc;

use repo_warehouse_core::models::{
    DocumentCommitRecord, GeneratedDocument, ReferenceKind, RepositoryReference, Warehouse,
    WarehouseStatus,
};
use repo_warehouse_core::path::{looks_local, normalize_address};
use repo_warehouse_core::PipelineError;

use crate::coordinator::PipelineCoordinator;
use crate::lifecycle::SubmitOptions;

pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply<T> {
    Ok(T),
    NotFound { not_found: String },
    Error { error: String },
}

impl<T> Reply<T> {
    fn from_result(result: Result<T, PipelineError>) -> Self {
        match result {
            Ok(value) => Reply::Ok(value),
            Err(PipelineError::NotFound(what)) => Reply::NotFound { not_found: what },
            Err(e) => Reply::Error {
                error: e.to_string(),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Ok(_))
    }

    pub fn ok(self) -> Option<T> {
        match self {
            Reply::Ok(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitResponse {
    pub id: String,
    pub name: String,
    pub organization: String,
    pub status: WarehouseStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WarehouseStatusView {
    pub id: String,
    pub name: String,
    pub address: String,
    pub description: String,
    pub status: WarehouseStatus,
    pub progress: u8,
    pub error: String,
    pub version: String,
}

impl From<&Warehouse> for WarehouseStatusView {
    fn from(w: &Warehouse) -> Self {
        Self {
            id: w.id.clone(),
            name: w.name.clone(),
            address: w.address.clone(),
            description: w.description.clone(),
            status: w.status,
            progress: w.progress,
            error: w.error.clone(),
            version: w.version.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WarehousePage {
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub items: Vec<Warehouse>,
}

pub struct WarehouseService {
    coordinator: Arc<PipelineCoordinator>,
}

impl WarehouseService {
    pub fn new(coordinator: Arc<PipelineCoordinator>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &Arc<PipelineCoordinator> {
        &self.coordinator
    }

    pub async fn submit_warehouse(
        &self,
        reference: &RepositoryReference,
        options: &SubmitOptions,
    ) -> Reply<SubmitResponse> {
        let result = self
            .coordinator
            .lifecycle()
            .submit(reference, options)
            .await
            .map(|w| SubmitResponse {
                id: w.id,
                name: w.name,
                organization: w.organization_name,
                status: w.status,
            });
        Reply::from_result(result)
    }

    /// Status of the warehouse with this address (normalized the same way as
    /// on submission) or, failing that, this id.
    pub async fn get_warehouse_status(&self, address_or_id: &str) -> Reply<WarehouseStatusView> {
        Reply::from_result(
            self.lookup(address_or_id)
                .await
                .map(|w| WarehouseStatusView::from(&w)),
        )
    }

    /// The last processed commit of `owner/name`. `Ok(None)` when the
    /// warehouse exists but has never completed a generating run.
    pub async fn get_change_log(
        &self,
        owner: &str,
        name: &str,
    ) -> Reply<Option<DocumentCommitRecord>> {
        let result: Result<_, PipelineError> = async {
            let store = self.coordinator.store();
            let warehouse = store
                .find_by_name(owner, name)
                .await?
                .ok_or_else(|| PipelineError::NotFound(format!("warehouse {}/{}", owner, name)))?;
            Ok(store.get_commit_record(&warehouse.id).await?)
        }
        .await;
        Reply::from_result(result)
    }

    /// One page of warehouses, newest first. Pages are 1-based.
    pub async fn list_warehouses(&self, page: i64, page_size: i64) -> Reply<WarehousePage> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let result = self
            .coordinator
            .store()
            .list_warehouses((page - 1) * page_size, page_size)
            .await
            .map(|(total, items)| WarehousePage {
                total,
                page,
                page_size,
                items,
            })
            .map_err(PipelineError::from);
        Reply::from_result(result)
    }

    /// Documents produced by the last generating run.
    pub async fn list_documents(&self, address_or_id: &str) -> Reply<Vec<GeneratedDocument>> {
        let result: Result<_, PipelineError> = async {
            let warehouse = self.lookup(address_or_id).await?;
            Ok(self.coordinator.store().list_documents(&warehouse.id).await?)
        }
        .await;
        Reply::from_result(result)
    }

    async fn lookup(&self, address_or_id: &str) -> Result<Warehouse, PipelineError> {
        let store = self.coordinator.store();
        let trimmed = address_or_id.trim();
        let kind = if looks_local(trimmed) {
            ReferenceKind::Local
        } else {
            ReferenceKind::Remote
        };

        if let Some(w) = store.find_by_address(&normalize_address(trimmed, kind)).await? {
            return Ok(w);
        }
        if let Some(w) = store.find_by_address(trimmed).await? {
            return Ok(w);
        }
        store
            .get_warehouse(trimmed)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("warehouse {}", trimmed)))
    }
}
