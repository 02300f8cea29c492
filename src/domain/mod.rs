//! Domain primitives: keys, column values and entity metadata.

pub mod entities;
pub mod types;

pub use entities::Entity;
pub use types::{PrimaryKey, Value};
