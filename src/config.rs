//! Table and set configuration: builder/config-struct pairs validated at construction time, in
//! the same spirit as the teacher crate's `DiskBufferConfigBuilder`.

use snafu::Snafu;

use crate::schema::ColumnDecl;

const DEFAULT_INDEX_CACHE: usize = 1024;
const DEFAULT_INDEX_DATA: usize = 64;

#[derive(Debug, Snafu)]
pub enum BuildError {
    #[snafu(display("table configuration requires a `key` naming one of the declared columns"))]
    MissingKey,
    #[snafu(display("table configuration requires at least one column in `values`"))]
    MissingValues,
    #[snafu(display(
        "set configuration requires at least one of `type` or `max_length` to be specified"
    ))]
    SetMissingTypeOrMaxLength,
}

/// Resolved configuration for a table.
#[derive(Debug, Clone)]
pub struct TableConfig {
    pub key: String,
    pub values: Vec<ColumnDecl>,
    pub index_cache: usize,
    pub index_data: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TableConfigBuilder {
    key: Option<String>,
    values: Vec<ColumnDecl>,
    index_cache: Option<usize>,
    index_data: Option<usize>,
}

impl TableConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn value(mut self, decl: ColumnDecl) -> Self {
        self.values.push(decl);
        self
    }

    pub fn values(mut self, decls: impl IntoIterator<Item = ColumnDecl>) -> Self {
        self.values.extend(decls);
        self
    }

    /// Bounded MRU capacity for the index cache. Defaults to 1024; 0 disables caching but not
    /// correctness.
    pub fn index_cache(mut self, capacity: usize) -> Self {
        self.index_cache = Some(capacity);
        self
    }

    /// Bounded MRU capacity for the row cache. Defaults to 64.
    pub fn index_data(mut self, capacity: usize) -> Self {
        self.index_data = Some(capacity);
        self
    }

    pub fn build(self) -> Result<TableConfig, BuildError> {
        let key = self.key.ok_or(BuildError::MissingKey)?;
        if self.values.is_empty() {
            return Err(BuildError::MissingValues);
        }
        Ok(TableConfig {
            key,
            values: self.values,
            index_cache: self.index_cache.unwrap_or(DEFAULT_INDEX_CACHE),
            index_data: self.index_data.unwrap_or(DEFAULT_INDEX_DATA),
        })
    }
}

/// Resolved configuration for a set facade.
#[derive(Debug, Clone)]
pub struct SetConfig {
    pub type_name: Option<String>,
    pub max_length: Option<u16>,
    pub index_cache: usize,
    pub index_data: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SetConfigBuilder {
    type_name: Option<String>,
    max_length: Option<u16>,
    index_cache: Option<usize>,
    index_data: Option<usize>,
}

impl SetConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn max_length(mut self, len: u16) -> Self {
        self.max_length = Some(len);
        self
    }

    pub fn index_cache(mut self, capacity: usize) -> Self {
        self.index_cache = Some(capacity);
        self
    }

    pub fn index_data(mut self, capacity: usize) -> Self {
        self.index_data = Some(capacity);
        self
    }

    pub fn build(self) -> Result<SetConfig, BuildError> {
        if self.type_name.is_none() && self.max_length.is_none() {
            return Err(BuildError::SetMissingTypeOrMaxLength);
        }
        Ok(SetConfig {
            type_name: self.type_name,
            max_length: self.max_length,
            index_cache: self.index_cache.unwrap_or(DEFAULT_INDEX_CACHE),
            index_data: self.index_data.unwrap_or(DEFAULT_INDEX_DATA),
        })
    }
}
