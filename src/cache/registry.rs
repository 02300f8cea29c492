//! Loader registry keyed by entity segment.
//!
//! Built once at startup; each registered entity type gets exactly one
//! [`BatchedLoader`], looked up by its static segment name.

use std::any::Any;
use std::collections::HashMap;

use crate::domain::Entity;

use super::loader::BatchedLoader;

#[derive(Default)]
pub struct LoaderRegistry {
    loaders: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the loader for `E`, replacing any previous one.
    pub fn register<E: Entity>(&mut self, loader: BatchedLoader<E>) {
        self.loaders.insert(E::SEGMENT, Box::new(loader));
    }

    pub fn get<E: Entity>(&self) -> Option<BatchedLoader<E>> {
        self.loaders
            .get(E::SEGMENT)
            .and_then(|loader| loader.downcast_ref::<BatchedLoader<E>>())
            .cloned()
    }

    pub fn contains(&self, segment: &str) -> bool {
        self.loaders.contains_key(segment)
    }

    pub fn segments(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.loaders.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}
