//! Session key-value store shared by every connection

use hbridge_protocol::{Map, Value};
use parking_lot::Mutex;

/// String-keyed state that outlives individual connections
#[derive(Debug, Default)]
pub struct SessionState {
    inner: Mutex<Map>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner.lock().insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.lock().remove(key)
    }

    pub fn snapshot(&self) -> Map {
        self.inner.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Write back what changed between `before` and `after`.
    ///
    /// Keys dropped from `after` are removed and keys whose value differs are
    /// stored. Keys untouched between the two keep their current value, so
    /// writes made by others since `before` was taken survive.
    pub fn merge_changes(&self, before: &Map, after: Map) -> usize {
        let mut inner = self.inner.lock();
        let mut changed = 0;

        for key in before.keys() {
            if !after.contains_key(key) && inner.remove(key).is_some() {
                changed += 1;
            }
        }
        for (key, value) in after {
            if before.get(&key) != Some(&value) {
                inner.insert(key, value);
                changed += 1;
            }
        }
        changed
    }
}
