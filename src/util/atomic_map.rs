use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock};
use rustc_hash::FxHashMap;

/// A copy-on-write map: readers get a consistent snapshot without blocking writers for longer
///  than a pointer swap, and [AtomicMap::update] applies a closure to the map as a single atomic
///  step. The latter is what allows 'check and insert' without races between concurrent callers.
pub struct AtomicMap<K,V> {
    map: RwLock<Arc<FxHashMap<K,V>>>,
}
impl <K: Hash+Eq+Clone+Sync+Send,V:Clone+Sync+Send> Default for AtomicMap<K,V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash+Eq+Clone+Sync+Send, V:Clone+Sync+Send> AtomicMap<K,V> {
    pub fn new() -> AtomicMap<K,V> {
        AtomicMap {
            map: RwLock::new(Arc::new(FxHashMap::default())),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.snapshot()
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// returns the map's state at the time of the call; later updates are not reflected
    pub fn snapshot(&self) -> Arc<FxHashMap<K,V>> {
        self.map.read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Applies `f` to a copy of the map and publishes the result. Concurrent updates are
    ///  serialized, so `f` always sees the result of all previous updates.
    pub fn update<R>(&self, f: impl FnOnce(&mut FxHashMap<K,V>) -> R) -> R {
        let mut lock = self.map.write()
            .unwrap_or_else(PoisonError::into_inner);

        let mut map: FxHashMap<K,V> = (**lock).clone();
        let result = f(&mut map);
        *lock = Arc::new(map);
        result
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.update(|m| m.remove(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_drop() {
        let _ = AtomicMap::<u32, u32>::new();
    }

    #[test]
    fn test_update() {
        let map = AtomicMap::<u32, u32>::new();

        map.update(|m| {
            m.insert(1, 2);
        });
        assert_eq!(Some(2), map.get(&1));
        assert_eq!(1, map.len());
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_updates() {
        let map = AtomicMap::<u32, u32>::new();
        map.update(|m| { m.insert(1, 1); });

        let snapshot = map.snapshot();
        map.update(|m| { m.insert(2, 2); });

        assert_eq!(snapshot.len(), 1);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_remove() {
        let map = AtomicMap::<u32, u32>::new();
        map.update(|m| { m.insert(1, 5); });

        assert_eq!(map.remove(&1), Some(5));
        assert_eq!(map.remove(&1), None);
        assert!(map.is_empty());
    }

    #[test]
    fn test_concurrent_check_and_insert() {
        let map = Arc::new(AtomicMap::<u32, u32>::new());

        let inserted = std::thread::scope(|s| {
            let handles = (0..16)
                .map(|i| {
                    let map = map.clone();
                    s.spawn(move || map.update(|m| {
                        if m.contains_key(&7) {
                            false
                        }
                        else {
                            m.insert(7, i);
                            true
                        }
                    }))
                })
                .collect::<Vec<_>>();

            handles.into_iter()
                .map(|h| h.join().unwrap())
                .filter(|&inserted| inserted)
                .count()
        });

        assert_eq!(inserted, 1);
        assert_eq!(map.len(), 1);
    }
}
