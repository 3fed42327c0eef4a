use std::{future::Future, sync::Arc};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::cache::CacheKey;

use super::types::RenderError;

type RenderSlot = Arc<OnceCell<Result<Bytes, RenderError>>>;

/// How a caller took part in a shared render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderRole {
    /// This caller ran the engine.
    Leader,
    /// This caller waited on a render started by someone else.
    Joined,
}

/// Registry of renders currently running, keyed by cache key.
///
/// Concurrent requests for the same key share one engine invocation. If the
/// caller driving the render is dropped before it finishes, the next waiter
/// takes over. The slot is removed once a result is available, so later
/// requests start a new render.
#[derive(Default, Clone)]
pub struct InFlightRenders {
    slots: Arc<DashMap<CacheKey, RenderSlot>>,
}

impl InFlightRenders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `render` for `key` unless a render for the same key is already running,
    /// in which case its result is awaited and returned instead.
    pub async fn run<F, Fut>(&self, key: &CacheKey, render: F) -> (Result<Bytes, RenderError>, RenderRole)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, RenderError>>,
    {
        let slot = {
            let entry = self
                .slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()));
            Arc::clone(entry.value())
        };

        let mut role = RenderRole::Joined;
        let result = slot
            .get_or_init(|| {
                role = RenderRole::Leader;
                render()
            })
            .await
            .clone();

        self.slots
            .remove_if(key, |_, current| Arc::ptr_eq(current, &slot));

        (result, role)
    }

    /// Number of keys with a render in progress.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
