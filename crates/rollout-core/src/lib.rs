//! Core types and the deployment status engine for the rollout pipeline.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! Storage backends and the ingest host depend on it; it depends on nothing
//! proprietary. Everything in [`engine`] is pure computation over an
//! in-memory [`deployment::Deployment`].

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod aggregate;
pub mod deployment;
pub mod engine;
pub mod error;
pub mod event;
pub mod patch;
pub mod roster;
pub mod sequencing;
pub mod status;
pub mod store;
pub mod workflow;

pub use error::{Error, Result};
