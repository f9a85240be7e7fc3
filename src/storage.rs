//! Storage subsystem
//!
//! Durable persistence for sessions, anomaly events, alerts, evidence
//! metadata, and risk-score snapshots, plus the content-addressed blob
//! store for thumbnail bytes.
//!
//! Components:
//! - `storage_trait`: the `Storage` trait defining a uniform API.
//! - `types`: shared record types used across the write and read paths.
//! - `database_storage`: ORM-based SQLite implementation using SeaORM.
//! - `db_entities`: SeaORM entity models for the database backend.
//! - `blob_store`: the `BlobStore` trait and its filesystem backend.

pub mod blob_store;
pub mod database_storage;
pub mod db_entities;
pub mod storage_trait;
pub mod types;

pub use blob_store::{BlobStore, FsBlobStore};
pub use database_storage::DatabaseStorage;
pub use storage_trait::Storage;
