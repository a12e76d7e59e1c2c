//! Row cache and dirty manager: a bounded MRU cache of deserialized rows, plus the load/save
//! paths that decode and encode rows against the schema and keep the index cache consistent
//! across swap-with-last compaction.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;

use lru::LruCache;

use crate::codec::{self, Value};
use crate::file::TableFile;
use crate::index::{self, IndexCache};
use crate::schema::Schema;

/// An open mapping of non-key column name to value, as presented to transaction bodies.
///
/// The key column's value is not present here; it is carried alongside the snapshot by whatever
/// owns it (the row cache entry, or the transaction controller's key facade).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSnapshot {
    fields: BTreeMap<String, Value>,
}

impl RowSnapshot {
    /// Builds a fresh snapshot populated with each non-key column's default.
    pub fn defaults(schema: &Schema) -> Self {
        let mut fields = BTreeMap::new();
        for column in schema.columns.iter().skip(1) {
            fields.insert(
                column.name.clone(),
                column
                    .default
                    .clone()
                    .expect("non-key columns always have a resolved default"),
            );
        }
        RowSnapshot { fields }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }

    pub fn set(&mut self, column: &str, value: Value) {
        self.fields.insert(column.to_string(), value);
    }

    fn decode(schema: &Schema, row: &[u8]) -> Self {
        let mut fields = BTreeMap::new();
        for column in schema.columns.iter().skip(1) {
            let value = codec::read(row, column.ty, column.offset, column.width);
            fields.insert(column.name.clone(), value);
        }
        RowSnapshot { fields }
    }

    fn encode(&self, schema: &Schema, key: &[u8], buf: &mut [u8]) {
        buf[..key.len()].copy_from_slice(key);
        for column in schema.columns.iter().skip(1) {
            let value = self.fields.get(&column.name).unwrap_or_else(|| {
                column
                    .default
                    .as_ref()
                    .expect("non-key columns always have a resolved default")
            });
            codec::write(buf, column.ty, value, column.offset, column.width);
        }
    }
}

/// Bounded MRU cache of `key -> row snapshot`. A capacity of zero disables caching: every
/// `load` miss reads the file and every `write` flushes immediately (§8).
#[derive(Debug)]
pub struct RowCache {
    cache: Option<LruCache<Vec<u8>, RowSnapshot>>,
}

impl RowCache {
    pub fn new(capacity: usize) -> Self {
        RowCache {
            cache: NonZeroUsize::new(capacity).map(LruCache::new),
        }
    }

    fn get(&mut self, key: &[u8]) -> Option<RowSnapshot> {
        self.cache.as_mut().and_then(|c| c.get(key).cloned())
    }

    fn remove(&mut self, key: &[u8]) {
        if let Some(cache) = self.cache.as_mut() {
            cache.pop(key);
        }
    }

    /// Inserts `snapshot` at the front, returning an evicted tail entry (if any and if over
    /// capacity) that the caller must flush to disk.
    fn insert(&mut self, key: Vec<u8>, snapshot: RowSnapshot) -> Option<(Vec<u8>, RowSnapshot)> {
        match self.cache.as_mut() {
            Some(cache) => {
                let evicted = if cache.len() == cache.cap().get() && !cache.contains(&key) {
                    cache.pop_lru()
                } else {
                    None
                };
                cache.put(key, snapshot);
                evicted
            }
            None => Some((key, snapshot)),
        }
    }

    /// Flushes every entry currently held in the cache back to disk, in unspecified order, and
    /// empties it. Used on table close.
    pub async fn flush_all(
        &mut self,
        file: &mut TableFile,
        index_cache: &mut IndexCache,
        schema: &Schema,
    ) -> std::io::Result<()> {
        let Some(cache) = self.cache.as_mut() else {
            return Ok(());
        };
        let entries: Vec<(Vec<u8>, RowSnapshot)> =
            cache.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        cache.clear();
        for (key, snapshot) in entries {
            save(file, index_cache, schema, &key, &snapshot).await?;
        }
        Ok(())
    }
}

/// Loads the current state of `key`: `(snapshot, exists)`.
///
/// Consults the row cache first; on miss, resolves the row index via the index cache/scanner and
/// either decodes the on-disk row or returns schema defaults for a non-existing key.
pub async fn load(
    file: &mut TableFile,
    index_cache: &mut IndexCache,
    row_cache: &mut RowCache,
    schema: &Schema,
    key: &[u8],
) -> std::io::Result<(RowSnapshot, bool)> {
    if let Some(snapshot) = row_cache.get(key) {
        return Ok((snapshot, true));
    }

    match index::find(file, index_cache, key, false).await? {
        None => Ok((RowSnapshot::defaults(schema), false)),
        Some(idx) => {
            let mut buf = vec![0u8; schema.row_length];
            file.read_row(idx, &mut buf).await?;
            let snapshot = RowSnapshot::decode(schema, &buf);
            if let Some((evicted_key, evicted_snapshot)) = row_cache.insert(key.to_vec(), snapshot.clone()) {
                save(file, index_cache, schema, &evicted_key, &evicted_snapshot).await?;
            }
            Ok((snapshot, true))
        }
    }
}

/// Encodes `snapshot` and persists it at `key`'s row, allocating a new row if necessary.
pub async fn save(
    file: &mut TableFile,
    index_cache: &mut IndexCache,
    schema: &Schema,
    key: &[u8],
    snapshot: &RowSnapshot,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; schema.row_length];
    snapshot.encode(schema, key, &mut buf);

    let idx = index::find(file, index_cache, key, true)
        .await?
        .expect("find with create=true always resolves an index");
    file.write_row(idx, &buf).await?;
    Ok(())
}

/// Inserts/replaces `key`'s entry at the front of the row cache; on overflow, flushes the
/// evicted tail entry to disk. Does not touch the file for the hot key itself.
pub async fn write(
    file: &mut TableFile,
    index_cache: &mut IndexCache,
    row_cache: &mut RowCache,
    schema: &Schema,
    key: &[u8],
    snapshot: RowSnapshot,
) -> std::io::Result<()> {
    if let Some((evicted_key, evicted_snapshot)) = row_cache.insert(key.to_vec(), snapshot) {
        save(file, index_cache, schema, &evicted_key, &evicted_snapshot).await?;
    }
    Ok(())
}

/// Removes `key` via swap-with-last compaction, if it exists.
///
/// Drops any row cache and index cache entry for `key` up front. The entire index cache entry
/// for the caller's key is invalidated regardless of whether a row is moved into its slot,
/// since the safest sound policy is to let the next miss re-scan for rows displaced by
/// compaction (§4.5). Also clears from the index cache any entry mapping to the row being moved
/// or truncated away (`last_index`), since that row's key -- not just the caller's -- would
/// otherwise have a stale cached index after this call.
pub async fn remove(
    file: &mut TableFile,
    index_cache: &mut IndexCache,
    row_cache: &mut RowCache,
    key: &[u8],
) -> std::io::Result<()> {
    row_cache.remove(key);
    index_cache.invalidate(key);

    let idx = match index::find(file, index_cache, key, false).await? {
        Some(idx) => idx,
        None => return Ok(()),
    };
    // `find` above may have re-inserted `key` into the index cache as a side effect of a miss
    // that then hit during the scan; undo that, since this row is about to be removed or moved.
    index_cache.invalidate(key);

    let row_count = file.row_count();
    let last_index = row_count - 1;

    index_cache.invalidate_index(last_index);

    if row_count == 1 {
        file.set_row_count(0).await?;
        file.truncate(file.data_offset()).await?;
        return Ok(());
    }

    if idx != last_index {
        let mut last_row = vec![0u8; file.row_length() as usize];
        file.read_row(last_index, &mut last_row).await?;
        file.write_row(idx, &last_row).await?;
    }

    let new_last_offset = file.row_offset(last_index);
    file.truncate(new_last_offset).await?;
    file.set_row_count(row_count - 1).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDecl;

    fn test_schema() -> Schema {
        Schema::resolve(
            "k",
            &[
                ColumnDecl::new("k").with_max_width(4),
                ColumnDecl::new("v").with_type("uint16").with_default(Value::Uint16(0)),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn load_missing_key_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let schema = test_schema();
        let mut file = TableFile::open(&dir.path().join("t.db"), &schema).await.unwrap();
        let mut index_cache = IndexCache::new(8);
        let mut row_cache = RowCache::new(8);

        let (snapshot, exists) = load(&mut file, &mut index_cache, &mut row_cache, &schema, b"abcd")
            .await
            .unwrap();
        assert!(!exists);
        assert_eq!(snapshot.get("v"), Some(&Value::Uint16(0)));
    }

    #[tokio::test]
    async fn write_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let schema = test_schema();
        let mut file = TableFile::open(&dir.path().join("t.db"), &schema).await.unwrap();
        let mut index_cache = IndexCache::new(8);
        let mut row_cache = RowCache::new(8);

        let mut snapshot = RowSnapshot::defaults(&schema);
        snapshot.set("v", Value::Uint16(42));
        write(&mut file, &mut index_cache, &mut row_cache, &schema, b"abcd", snapshot.clone())
            .await
            .unwrap();

        let (loaded, exists) = load(&mut file, &mut index_cache, &mut row_cache, &schema, b"abcd")
            .await
            .unwrap();
        assert!(exists);
        assert_eq!(loaded.get("v"), Some(&Value::Uint16(42)));
    }

    #[tokio::test]
    async fn remove_last_row_truncates_to_data_offset() {
        let dir = tempfile::tempdir().unwrap();
        let schema = test_schema();
        let mut file = TableFile::open(&dir.path().join("t.db"), &schema).await.unwrap();
        let mut index_cache = IndexCache::new(8);
        let mut row_cache = RowCache::new(8);

        let snapshot = RowSnapshot::defaults(&schema);
        write(&mut file, &mut index_cache, &mut row_cache, &schema, b"abcd", snapshot)
            .await
            .unwrap();
        // Force a flush to disk so the remove path observes it via `find`.
        save(
            &mut file,
            &mut index_cache,
            &schema,
            b"abcd",
            &RowSnapshot::defaults(&schema),
        )
        .await
        .unwrap();

        remove(&mut file, &mut index_cache, &mut row_cache, b"abcd").await.unwrap();
        assert_eq!(file.row_count(), 0);

        let path_len = file.row_offset(0);
        assert_eq!(path_len, file.data_offset());
    }

    #[tokio::test]
    async fn remove_non_last_row_swaps_last_into_its_place() {
        let dir = tempfile::tempdir().unwrap();
        let schema = test_schema();
        let mut file = TableFile::open(&dir.path().join("t.db"), &schema).await.unwrap();
        let mut index_cache = IndexCache::new(0);
        let mut row_cache = RowCache::new(0);

        for (key, value) in [(b"aaaa", 1u16), (b"bbbb", 2), (b"cccc", 3)] {
            let mut snapshot = RowSnapshot::defaults(&schema);
            snapshot.set("v", Value::Uint16(value));
            write(&mut file, &mut index_cache, &mut row_cache, &schema, key, snapshot)
                .await
                .unwrap();
        }

        remove(&mut file, &mut index_cache, &mut row_cache, b"bbbb").await.unwrap();
        assert_eq!(file.row_count(), 2);

        let (a, a_exists) = load(&mut file, &mut index_cache, &mut row_cache, &schema, b"aaaa")
            .await
            .unwrap();
        assert!(a_exists);
        assert_eq!(a.get("v"), Some(&Value::Uint16(1)));

        let (c, c_exists) = load(&mut file, &mut index_cache, &mut row_cache, &schema, b"cccc")
            .await
            .unwrap();
        assert!(c_exists);
        assert_eq!(c.get("v"), Some(&Value::Uint16(3)));

        let (_, b_exists) = load(&mut file, &mut index_cache, &mut row_cache, &schema, b"bbbb")
            .await
            .unwrap();
        assert!(!b_exists);
    }

    #[tokio::test]
    async fn remove_invalidates_stale_index_entry_for_moved_row() {
        let dir = tempfile::tempdir().unwrap();
        let schema = test_schema();
        let mut file = TableFile::open(&dir.path().join("t.db"), &schema).await.unwrap();
        let mut index_cache = IndexCache::new(8);
        let mut row_cache = RowCache::new(0);

        for (key, value) in [(b"aaaa", 1u16), (b"bbbb", 2), (b"cccc", 3)] {
            let mut snapshot = RowSnapshot::defaults(&schema);
            snapshot.set("v", Value::Uint16(value));
            write(&mut file, &mut index_cache, &mut row_cache, &schema, key, snapshot)
                .await
                .unwrap();
        }

        // Populate the index cache entry for "cccc" (the last row) before it gets moved by the
        // removal of "aaaa" below.
        let (_, exists) = load(&mut file, &mut index_cache, &mut row_cache, &schema, b"cccc")
            .await
            .unwrap();
        assert!(exists);

        remove(&mut file, &mut index_cache, &mut row_cache, b"aaaa").await.unwrap();
        assert_eq!(file.row_count(), 2);

        // "cccc" now lives at index 0; a stale cached mapping to the old last index (1) must not
        // be served, or this would read past the truncated file / return the wrong row.
        let (c, c_exists) = load(&mut file, &mut index_cache, &mut row_cache, &schema, b"cccc")
            .await
            .unwrap();
        assert!(c_exists);
        assert_eq!(c.get("v"), Some(&Value::Uint16(3)));
    }
}
