//! # Repo Warehouse
//!
//! Repository ingestion and documentation pipeline.
//!
//! Repo Warehouse takes a repository reference (a remote Git URL or a local
//! directory), mirrors it into an on-disk cache, tracks a persistent
//! lifecycle per repository, decides from commit history whether anything
//! changed since the last run, and drives catalogue and document generation
//! against the synchronized working copy.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌──────────────┐   ┌────────────┐
//! │ reference │──▶│ PathResolver │──▶│ Synchronizer │──▶│  Change    │
//! │ URL/path  │   │ org/repo     │   │ clone / copy │   │  Detector  │
//! └───────────┘   └──────────────┘   └──────────────┘   └─────┬──────┘
//!                                                              │
//!                 ┌──────────────┐   ┌──────────────┐         ▼
//!                 │   SQLite     │◀──│  Lifecycle   │◀── Coordinator ──▶ Generation
//!                 │ warehouses   │   │ Pending → …  │                    catalogue + docs
//!                 └──────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rwh init                                            # create database
//! rwh submit https://github.com/org/repo --process    # register and run
//! rwh status https://github.com/org/repo              # poll lifecycle
//! rwh changelog org repo                              # last processed commit
//! rwh docs https://github.com/org/repo                # generated documents
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite `WarehouseStore` |
//! | [`git`] | Git subprocess helpers |
//! | [`trust`] | Certificate policy and transport credentials |
//! | [`locks`] | Per-address and per-cache-key locks |
//! | [`sync`] | Repository synchronization into the cache |
//! | [`lifecycle`] | Warehouse lifecycle service |
//! | [`changes`] | Git-backed change detection |
//! | [`repo_files`] | README, file tree, and scoped file reads |
//! | [`generation`] | Catalogue and document generation providers |
//! | [`progress`] | Progress reporting |
//! | [`coordinator`] | End-to-end pipeline runs |
//! | [`service`] | JSON query and submission boundary |
//!
//! Pure logic (models, path resolution, transition rules, the reprocessing
//! decision, catalogue parsing) lives in the `repo-warehouse-core` crate,
//! re-exported here.

pub use repo_warehouse_core;

pub mod changes;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod generation;
pub mod git;
pub mod lifecycle;
pub mod locks;
pub mod migrate;
pub mod progress;
pub mod repo_files;
pub mod service;
pub mod sqlite_store;
pub mod sync;
pub mod trust;
