use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::RwLock;

use crate::ConfigGroup;

/// Loaded config groups, keyed by type.
///
/// Every write to the underlying stores calls [`invalidate`](Self::invalidate).
/// A load that raced with an invalidation is returned to its caller but not
/// cached.
#[derive(Default)]
pub struct GroupCache {
    inner: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    generation: AtomicU64,
}

impl GroupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load<G: ConfigGroup>(&self, load: impl FnOnce() -> G) -> Arc<G> {
        if let Some(cached) = self
            .inner
            .read()
            .get(&TypeId::of::<G>())
            .and_then(|v| v.clone().downcast::<G>().ok())
        {
            return cached;
        }

        let generation = self.generation.load(Ordering::Acquire);
        let loaded = Arc::new(load());

        let mut inner = self.inner.write();
        if self.generation.load(Ordering::Acquire) == generation {
            inner.insert(TypeId::of::<G>(), loaded.clone());
        }
        loaded
    }

    pub fn invalidate(&self) {
        let mut inner = self.inner.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        inner.clear();
    }
}
