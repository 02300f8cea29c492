//! Entity cache system
//!
//! - **TTL cache**: process-local `(segment, key) -> value` map with lazy expiry
//! - **Batched loaders**: coalesce concurrent loads into one bulk fetch per window
//! - **Invalidation**: local clears plus best-effort notification of peer processes
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! ttl_ms = 30000
//! batch_delay_ms = 20
//! max_batch_size = 100
//! ```

mod bus;
mod config;
mod consumer;
mod events;
mod loader;
mod lock;
mod registry;
mod store;
mod trigger;

pub use bus::{BusError, InvalidationBus, MemoryBus, PayloadStream};
pub use config::CacheConfig;
pub use consumer::InvalidationListener;
pub use events::{INVALIDATION_CHANNEL, InvalidationAction, InvalidationMessage};
pub use loader::BatchedLoader;
pub use registry::LoaderRegistry;
pub use store::{CacheEpoch, TtlCache};
pub use trigger::{InvalidationCoordinator, RemoteOutcome};
