//! Offline-tolerant data access for a storefront client.
//!
//! Reads go network-first and fall back to a TTL cache when the server
//! cannot be reached. Writes made while offline are queued durably and
//! replayed in order once connectivity returns. [`context::ClientContext`]
//! wires the pieces together.

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod connectivity;
pub mod context;
pub mod facade;
pub mod logging;
pub mod queue;
pub mod session;
pub mod store;

#[cfg(test)]
mod testing;

pub use context::{ClientContext, ContextOptions};
