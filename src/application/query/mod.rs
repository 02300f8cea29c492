//! Query resolution over cached, batched entity loaders.

mod category;
mod engine;
mod request;
mod sample;
mod selection;

pub use category::StoreCategoryResolver;
pub use engine::{QueryEngine, Resolution};
pub use request::{OrderBy, QueryRequest, ResolutionMode};
pub use sample::{ChaChaSource, RandomSource, window_start};
pub use selection::FieldSelection;
