//! Community token indexer: reconciles group token events into a read model
//! and serves it over HTTP.

pub mod api;
pub mod batch;
pub mod config;
pub mod reconciler;
pub mod retry;
pub mod store;
pub mod webhook;
