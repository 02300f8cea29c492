//! Batched, TTL-cached entity loading with cross-process cache invalidation
//! and a generic query resolution engine.

pub mod application;
pub mod cache;
pub mod config;
pub mod context;
pub mod domain;
pub mod infra;

pub use context::{LoaderContext, LoaderContextBuilder};
