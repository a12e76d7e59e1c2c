//! Set facade: a persistent set of values, implemented as a thin mapping onto a single-column
//! table whose sole column is named `value` and is also the key column.

use std::convert::Infallible;
use std::path::Path;

use crate::config::SetConfig;
use crate::error::{OpenError, TransactionError};
use crate::schema::ColumnDecl;
use crate::table::{KeyLiteral, Table};

/// A persistent set of values, backed by a single-file table.
#[derive(Clone)]
pub struct Set {
    table: Table,
}

impl Set {
    pub async fn open(path: impl AsRef<Path>, config: SetConfig) -> Result<Self, OpenError> {
        let mut decl = ColumnDecl::new("value");
        if let Some(type_name) = &config.type_name {
            decl = decl.with_type(type_name.clone());
        }
        if let Some(max_length) = config.max_length {
            decl = decl.with_max_width(max_length);
        }

        let table_config = crate::config::TableConfigBuilder::new()
            .key("value")
            .value(decl)
            .index_cache(config.index_cache)
            .index_data(config.index_data)
            .build()
            .expect("Set always builds a single-column table config");

        let table = Table::open(path, table_config).await?;
        Ok(Set { table })
    }

    pub async fn has<K: Into<KeyLiteral>>(&self, key: K) -> Result<bool, TransactionError<Infallible>> {
        self.table
            .transaction(key, |_snapshot, handle| {
                let exists = handle.exists();
                async move { Ok::<bool, Infallible>(exists) }
            })
            .await
    }

    pub async fn add<K: Into<KeyLiteral>>(&self, key: K) -> Result<(), TransactionError<Infallible>> {
        self.table
            .transaction(key, |_snapshot, handle| {
                handle.confirm();
                async move { Ok::<(), Infallible>(()) }
            })
            .await
    }

    pub async fn remove<K: Into<KeyLiteral>>(&self, key: K) -> Result<(), TransactionError<Infallible>> {
        self.table
            .transaction(key, |_snapshot, handle| {
                handle.remove();
                async move { Ok::<(), Infallible>(()) }
            })
            .await
    }

    pub async fn size(&self) -> u32 {
        self.table.size().await
    }

    pub async fn close(&self) -> std::io::Result<()> {
        self.table.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_has_remove() {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::config::SetConfigBuilder::new().value_type("uint16").build().unwrap();
        let set = Set::open(dir.path().join("s.db"), config).await.unwrap();

        set.add(69u16).await.unwrap();
        set.add(1337u16).await.unwrap();
        set.remove(420u16).await.unwrap();

        assert!(set.has(69u16).await.unwrap());
        assert!(!set.has(420u16).await.unwrap());
        assert!(set.has(1337u16).await.unwrap());
        assert_eq!(set.size().await, 2);
    }
}
