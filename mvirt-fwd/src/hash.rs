//! Fixed-size chained hash table with lock-free readers.
//!
//! Each bucket holds an immutable chain behind an `ArcSwap`. The single writer
//! (`HashTable`, `&mut self`) replaces a whole chain per mutation with a
//! copy-on-write store; readers (`HashTableReader`) do one atomic load per lookup.
//! Removed items are freed when the last reader drops the old chain.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use arc_swap::ArcSwap;

struct Buckets<K, V> {
    chains: Box<[ArcSwap<Vec<(K, V)>>]>,
    hasher: RandomState,
}

impl<K: Hash + Eq, V> Buckets<K, V> {
    #[inline]
    fn chain(&self, key: &K) -> &ArcSwap<Vec<(K, V)>> {
        let index = self.hasher.hash_one(key) as usize % self.chains.len();
        &self.chains[index]
    }
}

/// Writer handle of a fixed-size hash table.
pub struct HashTable<K, V> {
    buckets: Arc<Buckets<K, V>>,
    len: usize,
}

impl<K, V> HashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a table with `bucket_count` collision chains (at least one).
    pub fn new(bucket_count: usize) -> Self {
        let empty = Arc::new(Vec::new());
        let chains = (0..bucket_count.max(1))
            .map(|_| ArcSwap::new(Arc::clone(&empty)))
            .collect();

        HashTable {
            buckets: Arc::new(Buckets {
                chains,
                hasher: RandomState::new(),
            }),
            len: 0,
        }
    }

    pub fn reader(&self) -> HashTableReader<K, V> {
        HashTableReader {
            buckets: Arc::clone(&self.buckets),
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.chains.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append `key` to its bucket chain.
    ///
    /// Returns the item back if the key is already present.
    pub fn insert(&mut self, key: K, value: V) -> Result<(), (K, V)> {
        let slot = self.buckets.chain(&key);
        let chain = slot.load();
        if chain.iter().any(|(k, _)| *k == key) {
            return Err((key, value));
        }

        let mut next = Vec::with_capacity(chain.len() + 1);
        next.extend(chain.iter().cloned());
        next.push((key, value));
        slot.store(Arc::new(next));
        self.len += 1;
        Ok(())
    }

    /// Unlink `key` from its bucket chain.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.buckets.chain(key);
        let chain = slot.load();
        let pos = chain.iter().position(|(k, _)| k == key)?;

        let removed = chain[pos].1.clone();
        let next: Vec<_> = chain
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != pos)
            .map(|(_, item)| item.clone())
            .collect();
        slot.store(Arc::new(next));
        self.len -= 1;
        Some(removed)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        get_from(&self.buckets, key)
    }

    /// Snapshot of all items, bucket by bucket.
    pub fn entries(&self) -> Vec<(K, V)> {
        self.buckets
            .chains
            .iter()
            .flat_map(|slot| slot.load().iter().cloned().collect::<Vec<_>>())
            .collect()
    }

    pub fn clear(&mut self) {
        let empty = Arc::new(Vec::new());
        for slot in self.buckets.chains.iter() {
            slot.store(Arc::clone(&empty));
        }
        self.len = 0;
    }
}

/// Lock-free read handle of a [`HashTable`].
pub struct HashTableReader<K, V> {
    buckets: Arc<Buckets<K, V>>,
}

impl<K, V> Clone for HashTableReader<K, V> {
    fn clone(&self) -> Self {
        HashTableReader {
            buckets: Arc::clone(&self.buckets),
        }
    }
}

impl<K, V> HashTableReader<K, V>
where
    K: Hash + Eq,
    V: Clone,
{
    #[inline]
    pub fn get(&self, key: &K) -> Option<V> {
        get_from(&self.buckets, key)
    }
}

#[inline]
fn get_from<K: Hash + Eq, V: Clone>(buckets: &Buckets<K, V>, key: &K) -> Option<V> {
    buckets
        .chain(key)
        .load()
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.clone())
}
