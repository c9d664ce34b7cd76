// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Golem Source License v1.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://license.golem.cloud/LICENSE
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use lru::LruCache;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

/// The stored upstream handle of one cached entity, tagged with a
/// generation so a caller that observed a stale handle can tell whether a
/// concurrent refresh already replaced it.
pub(crate) struct UpstreamCell<T: ?Sized> {
    cell: RwLock<(u64, Arc<T>)>,
}

impl<T: ?Sized> UpstreamCell<T> {
    pub fn new(handle: Arc<T>) -> Self {
        Self {
            cell: RwLock::new((0, handle)),
        }
    }

    pub fn get(&self) -> (u64, Arc<T>) {
        let guard = self.cell.read().unwrap();
        (guard.0, guard.1.clone())
    }

    pub fn handle(&self) -> Arc<T> {
        self.cell.read().unwrap().1.clone()
    }

    pub fn generation(&self) -> u64 {
        self.cell.read().unwrap().0
    }

    pub fn replace(&self, handle: Arc<T>) {
        let mut guard = self.cell.write().unwrap();
        guard.0 += 1;
        guard.1 = handle;
    }
}

/// `get` both inserts on miss and reorders on hit, so it takes the writer
/// lock; `peek` observes without promoting and stays on the reader lock.
pub(crate) fn lru_get<K, V>(cache: &RwLock<LruCache<K, V>>, key: &K) -> Option<V>
where
    K: Hash + Eq,
    V: Clone,
{
    cache.write().unwrap().get(key).cloned()
}

pub(crate) fn lru_peek<K, V>(cache: &RwLock<LruCache<K, V>>, key: &K) -> Option<V>
where
    K: Hash + Eq,
    V: Clone,
{
    cache.read().unwrap().peek(key).cloned()
}

pub(crate) fn lru_remove<K, V>(cache: &RwLock<LruCache<K, V>>, key: &K)
where
    K: Hash + Eq,
{
    cache.write().unwrap().pop(key);
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::check;
    use test_r::test;

    #[test]
    fn replace_bumps_the_generation() {
        let cell: UpstreamCell<str> = UpstreamCell::new(Arc::from("one"));
        let (generation, handle) = cell.get();
        check!(generation == 0);
        check!(&*handle == "one");

        cell.replace(Arc::from("two"));
        check!(cell.generation() == 1);
        check!(&*cell.handle() == "two");
    }

    #[test]
    fn peek_does_not_reorder() {
        let cache = RwLock::new(LruCache::new(std::num::NonZeroUsize::new(2).unwrap()));
        cache.write().unwrap().put("a".to_string(), 1);
        cache.write().unwrap().put("b".to_string(), 2);

        // peeking at the oldest entry does not rescue it from eviction
        check!(lru_peek(&cache, &"a".to_string()) == Some(1));
        cache.write().unwrap().put("c".to_string(), 3);
        check!(lru_peek(&cache, &"a".to_string()) == None);
        check!(lru_peek(&cache, &"b".to_string()) == Some(2));
    }
}
