//! Index cache and scanner: resolves a key to a row index via a bounded MRU cache, falling back
//! to a linear scan of the key column.

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::file::TableFile;

/// Bounded most-recently-used `key -> row index` mapping.
///
/// A capacity of zero disables caching entirely (every lookup falls through to a linear scan)
/// without affecting correctness, per §8's boundary behavior for `indexData = 0`.
#[derive(Debug)]
pub struct IndexCache {
    cache: Option<LruCache<Vec<u8>, u32>>,
}

impl IndexCache {
    pub fn new(capacity: usize) -> Self {
        IndexCache {
            cache: NonZeroUsize::new(capacity).map(LruCache::new),
        }
    }

    fn get(&mut self, key: &[u8]) -> Option<u32> {
        self.cache.as_mut().and_then(|c| c.get(key).copied())
    }

    fn insert(&mut self, key: Vec<u8>, index: u32) {
        if let Some(cache) = self.cache.as_mut() {
            cache.put(key, index);
        }
    }

    /// Drops any cached mapping for `key`. Used on removal, since swap-with-last compaction can
    /// leave stale mappings pointing at a row index that no longer holds that key.
    pub fn invalidate(&mut self, key: &[u8]) {
        if let Some(cache) = self.cache.as_mut() {
            cache.pop(key);
        }
    }

    /// Drops any cached mapping whose value equals `index`, regardless of key. Used when
    /// swap-with-last compaction moves the row at `index` elsewhere (or truncates it away),
    /// since a different key's cached mapping may still point at it.
    pub fn invalidate_index(&mut self, index: u32) {
        if let Some(cache) = self.cache.as_mut() {
            let stale: Vec<Vec<u8>> = cache
                .iter()
                .filter(|(_, &v)| v == index)
                .map(|(k, _)| k.clone())
                .collect();
            for key in stale {
                cache.pop(&key);
            }
        }
    }
}

/// Resolves `key` (already encoded to its fixed key-width buffer) to a row index.
///
/// On a cache miss, performs a linear scan of the key column across every row. If `create` is
/// true and no row matches, appends a new (uninitialized) row and returns its index; the caller
/// is responsible for writing that row's bytes.
pub async fn find(
    file: &mut TableFile,
    index_cache: &mut IndexCache,
    key: &[u8],
    create: bool,
) -> std::io::Result<Option<u32>> {
    if let Some(index) = index_cache.get(key) {
        return Ok(Some(index));
    }

    let key_width = key.len();
    let mut scratch = vec![0u8; key_width];
    for i in 0..file.row_count() {
        file.read_key(i, key_width, &mut scratch).await?;
        if scratch == key {
            index_cache.insert(key.to_vec(), i);
            return Ok(Some(i));
        }
    }

    if !create {
        return Ok(None);
    }

    let index = file.append_row().await?;
    index_cache.insert(key.to_vec(), index);
    Ok(Some(index))
}
