//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (HTTP, WebSockets, file I/O). Each sub-module
//! groups adapters by infrastructure concern.
//!
//! Adapter categories:
//! - `api`: price backend REST client
//! - `feeds`: price push channel over WebSocket
//! - `metrics`: Prometheus metrics export and health checks
//! - `persistence`: feed settings storage

pub mod api;
pub mod feeds;
pub mod metrics;
pub mod persistence;
