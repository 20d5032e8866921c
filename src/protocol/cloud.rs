//! The cloud origin seam.
//!
//! The origin store is an external collaborator; the core only needs the
//! three data operations below. [`MemoryCloud`] is the in-process
//! reference used by tests and benchmarks.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::types::{Key, Value};

pub trait CloudStore: Send + Sync {
    fn get(&self, key: &Key) -> Option<Value>;
    fn put(&self, key: &Key, value: Value);
    fn del(&self, key: &Key);
}

#[derive(Default)]
pub struct MemoryCloud {
    objects: RwLock<FxHashMap<Key, Value>>,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CloudStore for MemoryCloud {
    fn get(&self, key: &Key) -> Option<Value> {
        self.objects.read().get(key).cloned()
    }

    fn put(&self, key: &Key, value: Value) {
        self.objects.write().insert(key.clone(), value);
    }

    fn del(&self, key: &Key) {
        self.objects.write().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_del() {
        let cloud = MemoryCloud::new();
        let key = Key::from("k");
        assert!(cloud.get(&key).is_none());
        cloud.put(&key, Value::new(&b"v"[..]));
        assert_eq!(cloud.get(&key).unwrap().data().as_ref(), b"v");
        cloud.del(&key);
        assert!(cloud.get(&key).is_none());
    }
}
