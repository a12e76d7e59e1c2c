//! Transaction controller: the key-indexed read-modify-write-or-delete facade, and the two
//! serialization disciplines (per-key, global file) that make it safe under concurrent callers.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use snafu::ResultExt;
use tokio::sync::Mutex as AsyncMutex;

use crate::codec::{self, ColumnType, Value};
use crate::config::TableConfig;
use crate::error::{
    BodySnafu, InvalidFieldSnafu, InvalidKeySnafu, IoSnafu, OpenError, SchemaSnafu,
    TransactionError, ValidationError,
};
use crate::file::TableFile;
use crate::index::IndexCache;
use crate::row::{self, RowCache, RowSnapshot};
use crate::schema::Schema;

/// A value usable as a table key before it has been checked against the key column's declared
/// type and width.
///
/// Strings are left as-is; integers are parsed/range-checked against whichever integer type the
/// key column declares, matching §4.6's "normalized" key handling.
#[derive(Debug, Clone)]
pub enum KeyLiteral {
    Str(String),
    Int(i64),
}

impl From<&str> for KeyLiteral {
    fn from(s: &str) -> Self {
        KeyLiteral::Str(s.to_string())
    }
}

impl From<String> for KeyLiteral {
    fn from(s: String) -> Self {
        KeyLiteral::Str(s)
    }
}

macro_rules! impl_int_key_literal {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for KeyLiteral {
                fn from(v: $ty) -> Self {
                    KeyLiteral::Int(i64::from(v))
                }
            }
        )*
    };
}

impl_int_key_literal!(i8, i16, i32, u8, u16, u32);

impl From<i64> for KeyLiteral {
    fn from(v: i64) -> Self {
        KeyLiteral::Int(v)
    }
}

/// Control handle passed alongside a row snapshot into a transaction body.
///
/// Captures whether the row existed when the transaction began, and lets the body signal
/// whether the row should be removed or (for a non-existing key) confirmed into existence.
#[derive(Debug)]
pub struct Handle {
    existed: bool,
    removed: bool,
    confirmed: bool,
}

impl Handle {
    fn new(existed: bool) -> Self {
        Handle {
            existed,
            removed: false,
            confirmed: false,
        }
    }

    /// Whether the row existed when this transaction's snapshot was loaded.
    pub fn exists(&self) -> bool {
        self.existed
    }

    /// Marks the row for removal on transaction completion. Returns whether the row existed
    /// prior to this call.
    pub fn remove(&mut self) -> bool {
        self.removed = true;
        self.existed
    }

    /// Marks a non-existing row for creation on transaction completion. Returns `true` iff the
    /// row did not previously exist.
    pub fn confirm(&mut self) -> bool {
        self.confirmed = true;
        !self.existed
    }

    pub fn removed(&self) -> bool {
        self.removed
    }

    pub fn confirmed(&self) -> bool {
        self.confirmed
    }
}

struct Store {
    file: TableFile,
    index_cache: IndexCache,
    row_cache: RowCache,
    /// Count of rows known to exist, including ones only held in the row cache and not yet
    /// flushed to disk. `file.row_count()` alone understates this whenever a row is created but
    /// not yet evicted from the row cache (§4.5: `write` never touches the file for a hot key).
    logical_rows: u32,
}

/// Tracks the most-recently-submitted future for each key that currently has an in-flight or
/// recently-finished transaction, so new submissions for the same key chain after it.
///
/// Entries are pruned opportunistically (on every acquisition) once no transaction holds a
/// strong reference to them, bounding growth to the number of keys with active or
/// very-recently-active transactions rather than every key ever touched.
#[derive(Default)]
struct KeyLocks {
    map: StdMutex<HashMap<Vec<u8>, Weak<AsyncMutex<()>>>>,
}

impl KeyLocks {
    fn acquire(&self, key: &[u8]) -> Arc<AsyncMutex<()>> {
        let mut map = self.map.lock().unwrap();
        map.retain(|_, weak| weak.strong_count() > 0);

        if let Some(existing) = map.get(key).and_then(Weak::upgrade) {
            return existing;
        }

        let lock = Arc::new(AsyncMutex::new(()));
        map.insert(key.to_vec(), Arc::downgrade(&lock));
        lock
    }
}

/// An embedded, single-file key/value table engine.
///
/// Cloning a [`Table`] is cheap: it shares the underlying file, caches, and key-lock map with
/// every other clone, the way a connection handle is shared.
#[derive(Clone)]
pub struct Table {
    schema: Arc<Schema>,
    store: Arc<AsyncMutex<Store>>,
    key_locks: Arc<KeyLocks>,
    closed: Arc<AtomicBool>,
}

impl Table {
    /// Opens or creates the table file at `path` per `config`.
    #[tracing::instrument(skip(config), fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>, config: TableConfig) -> Result<Self, OpenError> {
        let schema = Schema::resolve(&config.key, &config.values).context(SchemaSnafu)?;
        let file = TableFile::open(path.as_ref(), &schema).await?;
        let logical_rows = file.row_count();

        Ok(Table {
            schema: Arc::new(schema),
            store: Arc::new(AsyncMutex::new(Store {
                file,
                index_cache: IndexCache::new(config.index_cache),
                row_cache: RowCache::new(config.index_data),
                logical_rows,
            })),
            key_locks: Arc::new(KeyLocks::default()),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Current row count, including rows only held in the row cache and not yet flushed to disk.
    pub async fn size(&self) -> u32 {
        self.store.lock().await.logical_rows
    }

    /// Runs `body` against the row identified by `key`, persisting whatever changes `body` made
    /// according to the state machine in §4.6.
    ///
    /// At most one body runs at a time for a given key; bodies for different keys may run
    /// concurrently. All file I/O triggered by this transaction runs under the table's single
    /// global file lock.
    pub async fn transaction<K, F, Fut, T, E>(&self, key: K, body: F) -> Result<T, TransactionError<E>>
    where
        K: Into<KeyLiteral>,
        F: FnOnce(&mut RowSnapshot, &mut Handle) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let key_bytes = self.encode_key(key.into()).context(InvalidKeySnafu)?;

        let key_lock = self.key_locks.acquire(&key_bytes);
        let _key_guard = key_lock.lock().await;

        let (mut snapshot, existed) = {
            let mut store = self.store.lock().await;
            let Store {
                file,
                index_cache,
                row_cache,
                ..
            } = &mut *store;
            row::load(file, index_cache, row_cache, &self.schema, &key_bytes)
                .await
                .context(IoSnafu)?
        };
        let before = snapshot.clone();

        let mut handle = Handle::new(existed);
        let outcome = body(&mut snapshot, &mut handle).await.context(BodySnafu)?;

        if handle.removed() {
            if existed {
                tracing::debug!(?key_bytes, "removing row");
                let mut store = self.store.lock().await;
                let Store {
                    file,
                    index_cache,
                    row_cache,
                    logical_rows,
                } = &mut *store;
                row::remove(file, index_cache, row_cache, &key_bytes)
                    .await
                    .context(IoSnafu)?;
                *logical_rows -= 1;
            }
            return Ok(outcome);
        }

        self.validate_fields(&snapshot).context(InvalidFieldSnafu)?;
        let dirty = snapshot != before;

        if dirty || (!existed && handle.confirmed()) {
            tracing::trace!(?key_bytes, dirty, "persisting row");
            let mut store = self.store.lock().await;
            let Store {
                file,
                index_cache,
                row_cache,
                logical_rows,
            } = &mut *store;
            row::write(file, index_cache, row_cache, &self.schema, &key_bytes, snapshot)
                .await
                .context(IoSnafu)?;
            if !existed {
                *logical_rows += 1;
            }
        }

        Ok(outcome)
    }

    /// Flushes every row cache entry to disk and releases the file handle. Repeated calls are a
    /// no-op.
    pub async fn close(&self) -> std::io::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut store = self.store.lock().await;
        let Store {
            file,
            index_cache,
            row_cache,
            ..
        } = &mut *store;
        row_cache.flush_all(file, index_cache, &self.schema).await
    }

    fn validate_fields(&self, snapshot: &RowSnapshot) -> Result<(), ValidationError> {
        for column in self.schema.columns.iter().skip(1) {
            let value = snapshot.get(&column.name).unwrap_or_else(|| {
                column
                    .default
                    .as_ref()
                    .expect("non-key columns always have a resolved default")
            });
            codec::validate(&column.name, column.ty, column.width, value)?;
        }
        Ok(())
    }

    fn encode_key(&self, literal: KeyLiteral) -> Result<Vec<u8>, ValidationError> {
        let key_column = self.schema.key_column();
        let value = literal_to_value(key_column.ty, key_column.name.as_str(), literal)?;
        codec::validate(&key_column.name, key_column.ty, key_column.width, &value)?;
        let mut buf = vec![0u8; key_column.width as usize];
        codec::write(&mut buf, key_column.ty, &value, 0, key_column.width);
        Ok(buf)
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) && Arc::strong_count(&self.store) == 1 {
            tracing::warn!(
                "table dropped without calling close(); dirty cached rows may not have been flushed"
            );
        }
    }
}

fn literal_to_value(ty: ColumnType, column: &str, literal: KeyLiteral) -> Result<Value, ValidationError> {
    match (ty, literal) {
        (ColumnType::String, KeyLiteral::Str(s)) => Ok(Value::String(s)),
        (ColumnType::Uint32, KeyLiteral::Int(v)) => in_range(column, v, 0, u32::MAX as i64).map(|v| Value::Uint32(v as u32)),
        (ColumnType::Int32, KeyLiteral::Int(v)) => in_range(column, v, i32::MIN as i64, i32::MAX as i64).map(|v| Value::Int32(v as i32)),
        (ColumnType::Uint16, KeyLiteral::Int(v)) => in_range(column, v, 0, u16::MAX as i64).map(|v| Value::Uint16(v as u16)),
        (ColumnType::Int16, KeyLiteral::Int(v)) => in_range(column, v, i16::MIN as i64, i16::MAX as i64).map(|v| Value::Int16(v as i16)),
        (ColumnType::Uint8, KeyLiteral::Int(v)) => in_range(column, v, 0, u8::MAX as i64).map(|v| Value::Uint8(v as u8)),
        (ColumnType::Int8, KeyLiteral::Int(v)) => in_range(column, v, i8::MIN as i64, i8::MAX as i64).map(|v| Value::Int8(v as i8)),
        (ty, literal) => Err(ValidationError::InvalidValue {
            column: column.to_string(),
            reason: format!("key literal {:?} does not match column type '{}'", literal, ty.name()),
        }),
    }
}

fn in_range(column: &str, v: i64, lo: i64, hi: i64) -> Result<i64, ValidationError> {
    if v < lo || v > hi {
        Err(ValidationError::InvalidValue {
            column: column.to_string(),
            reason: format!("key value {} out of range [{}, {}]", v, lo, hi),
        })
    } else {
        Ok(v)
    }
}
