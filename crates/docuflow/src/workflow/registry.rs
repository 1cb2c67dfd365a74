use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

use crate::workflow::model::{CancelSignal, DecisionSignal};
use crate::workflow::review::ReviewWorkflowHandle;

/// In-process directory of live review instances, keyed by review id.
/// Signals addressed to an unknown (finished or never-started) instance are
/// reported back as not delivered, never as errors.
#[derive(Default)]
pub struct WorkflowRegistry {
    inner: Mutex<HashMap<String, ReviewWorkflowHandle>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: ReviewWorkflowHandle) {
        let mut map = self.inner.lock().expect("registry lock poisoned");
        map.insert(handle.review_id.clone(), handle);
    }

    pub fn remove(&self, review_id: &str) {
        let mut map = self.inner.lock().expect("registry lock poisoned");
        if map.remove(review_id).is_some() {
            debug!(review_id, "workflow handle removed");
        }
    }

    pub fn contains(&self, review_id: &str) -> bool {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .contains_key(review_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn deliver_decision(&self, review_id: &str, signal: DecisionSignal) -> bool {
        let handle = {
            let map = self.inner.lock().expect("registry lock poisoned");
            map.get(review_id).cloned()
        };
        match handle {
            Some(handle) => handle.decide(signal).await,
            None => false,
        }
    }

    pub async fn deliver_cancel(&self, review_id: &str, signal: CancelSignal) -> bool {
        let handle = {
            let map = self.inner.lock().expect("registry lock poisoned");
            map.get(review_id).cloned()
        };
        match handle {
            Some(handle) => handle.cancel(signal).await,
            None => false,
        }
    }
}
