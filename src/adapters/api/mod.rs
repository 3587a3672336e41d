//! Price Backend REST Adapter
//!
//! Implements the `PriceApi` port over HTTP.
//!
//! Sub-modules:
//! - `client`: HTTP client with a concurrency cap and retries
//! - `types`: API request/response type definitions

pub mod client;
pub mod types;

pub use client::{PriceApiClient, PriceApiClientConfig};
