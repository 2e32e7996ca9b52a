//! HTTP API for stowage.
//!
//! A thin axum layer over [`crate::engine::FileEngine`]: session handling,
//! request validation and response shaping live here, storage semantics do not.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod server;

pub use error::ApiError;
pub use router::create_router;
pub use server::WebServer;
