//! stowage - per-owner file storage service
//!
//! Folders and files are catalogued in SQLite and their bytes live on a
//! pluggable backend (local disk or a remote drive). On top of that sit
//! streaming multipart ingestion, Range-aware delivery, signed capability
//! URLs and zip export of folder subtrees, served over an axum HTTP API.

pub mod archive;
pub mod capability;
pub mod catalog;
pub mod config;
pub mod db;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod legacy;
pub mod logging;
pub mod sandbox;
pub mod storage;
pub mod web;

#[cfg(test)]
mod testing;

pub use capability::{CapabilityClaims, CapabilityIssuer, SignedCapability};
pub use catalog::{ChildEntry, FileEntry, FolderEntry};
pub use config::Config;
pub use db::Database;
pub use delivery::{ByteRange, Delivery};
pub use engine::{EngineOptions, FileEngine};
pub use error::{Result, StowageError};
pub use ingest::{UploadReport, UploadStatus};
pub use storage::{build_backend, LocalDiskBackend, RemoteDriveBackend, StorageBackend};
pub use web::WebServer;
