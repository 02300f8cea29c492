//! Application layer: store contracts, pagination and query resolution.

pub mod error;
pub mod pagination;
pub mod query;
pub mod repos;
