//! Schema resolution: turns user-supplied column declarations into a frozen, byte-addressable
//! row layout plus the preamble bytes used for schema-compatibility checks on reopen.

use bytes::BufMut;

use crate::codec::{self, ColumnType, Value};
use crate::error::SchemaError;

/// A single column declaration, as given by the caller.
#[derive(Debug, Clone)]
pub struct ColumnDecl {
    pub name: String,
    /// Defaults to `string` when absent, matching §4.2.
    pub type_name: Option<String>,
    pub max_width: Option<u16>,
    pub default: Option<Value>,
}

impl ColumnDecl {
    pub fn new(name: impl Into<String>) -> Self {
        ColumnDecl {
            name: name.into(),
            type_name: None,
            max_width: None,
            default: None,
        }
    }

    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn with_max_width(mut self, width: u16) -> Self {
        self.max_width = Some(width);
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// A resolved column: its type, on-disk width, byte offset within a row, and default value.
///
/// The key column's `default` is always `None`; every other column's `default` is always
/// `Some`, since §3 requires a default value to exist for every non-key column, either declared
/// explicitly or implied by its type.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    pub width: u16,
    pub offset: usize,
    pub default: Option<Value>,
}

/// A resolved, frozen row layout and its preamble bytes.
#[derive(Debug, Clone)]
pub struct Schema {
    /// Columns in on-disk order: key column first, then the rest in declaration order.
    pub columns: Vec<Column>,
    pub row_length: usize,
    pub names_block: Vec<u8>,
    pub header_block: Vec<u8>,
    pub defaults_block: Vec<u8>,
}

impl Schema {
    pub fn key_column(&self) -> &Column {
        &self.columns[0]
    }

    pub fn key_width(&self) -> u16 {
        self.columns[0].width
    }

    /// Full preamble length in bytes: magic + names block + header block + defaults block.
    pub fn preamble_len(&self) -> usize {
        4 + self.names_block.len() + self.header_block.len() + self.defaults_block.len()
    }

    /// Byte offset of the first row, i.e. preamble length plus the 4-byte row count.
    pub fn data_offset(&self) -> u64 {
        (self.preamble_len() + 4) as u64
    }

    /// Resolves a key/value declaration pair into a frozen [`Schema`].
    ///
    /// `key_name` must match the `name` of exactly one entry in `values`; that entry becomes the
    /// key column and is placed first in on-disk order. All other entries follow in declaration
    /// order.
    pub fn resolve(key_name: &str, values: &[ColumnDecl]) -> Result<Schema, SchemaError> {
        if values.is_empty() {
            return Err(SchemaError::NoColumns);
        }

        let mut seen = std::collections::HashSet::new();
        for decl in values {
            if decl.name.is_empty() {
                return Err(SchemaError::EmptyName {
                    name: decl.name.clone(),
                });
            }
            if !seen.insert(decl.name.as_str()) {
                return Err(SchemaError::DuplicateName {
                    name: decl.name.clone(),
                });
            }
        }

        let key_pos = values
            .iter()
            .position(|d| d.name == key_name)
            .ok_or_else(|| SchemaError::UnknownKeyColumn {
                name: key_name.to_string(),
            })?;

        let mut ordered: Vec<&ColumnDecl> = Vec::with_capacity(values.len());
        ordered.push(&values[key_pos]);
        for (i, decl) in values.iter().enumerate() {
            if i != key_pos {
                ordered.push(decl);
            }
        }

        let mut columns = Vec::with_capacity(ordered.len());
        for (i, decl) in ordered.iter().enumerate() {
            let is_key = i == 0;
            columns.push(resolve_column(decl, is_key)?);
        }

        let mut offset = columns[0].width as usize;
        for column in columns.iter_mut().skip(1) {
            column.offset = offset;
            offset += column.width as usize;
        }
        let row_length = offset;

        let names_block = build_names_block(&columns);
        let header_block = build_header_block(&columns);
        let defaults_block = build_defaults_block(&columns);

        Ok(Schema {
            columns,
            row_length,
            names_block,
            header_block,
            defaults_block,
        })
    }
}

fn resolve_column(decl: &ColumnDecl, is_key: bool) -> Result<Column, SchemaError> {
    let type_name = decl.type_name.as_deref().unwrap_or("string");
    let ty = ColumnType::from_name(type_name).ok_or_else(|| SchemaError::UnknownType {
        name: decl.name.clone(),
        type_name: type_name.to_string(),
    })?;

    if is_key && decl.default.is_some() {
        return Err(SchemaError::KeyHasDefault {
            name: decl.name.clone(),
        });
    }

    let width = if let Some(fixed) = ty.fixed_width() {
        if decl.max_width.is_some() {
            return Err(SchemaError::FixedWidthHasExplicitWidth {
                name: decl.name.clone(),
            });
        }
        fixed
    } else {
        match (decl.max_width, &decl.default) {
            (Some(w), _) => w,
            (None, Some(Value::String(s))) => (s.as_bytes().len() + 2) as u16,
            (None, Some(_)) => {
                return Err(SchemaError::DefaultOutOfRange {
                    name: decl.name.clone(),
                    reason: "default value type does not match declared column type".to_string(),
                })
            }
            (None, None) => {
                return Err(SchemaError::MissingWidthOrDefault {
                    name: decl.name.clone(),
                })
            }
        }
    };

    let default = if is_key {
        None
    } else {
        Some(match &decl.default {
            Some(v) => v.clone(),
            None => zero_value(ty),
        })
    };

    if let Some(default) = &default {
        codec::validate(&decl.name, ty, width, default).map_err(|e| SchemaError::DefaultOutOfRange {
            name: decl.name.clone(),
            reason: e.to_string(),
        })?;
    }

    Ok(Column {
        name: decl.name.clone(),
        ty,
        width,
        offset: 0,
        default,
    })
}

fn zero_value(ty: ColumnType) -> Value {
    match ty {
        ColumnType::String => Value::String(String::new()),
        ColumnType::Uint32 => Value::Uint32(0),
        ColumnType::Int32 => Value::Int32(0),
        ColumnType::Uint16 => Value::Uint16(0),
        ColumnType::Int16 => Value::Int16(0),
        ColumnType::Uint8 => Value::Uint8(0),
        ColumnType::Int8 => Value::Int8(0),
    }
}

fn build_names_block(columns: &[Column]) -> Vec<u8> {
    let mut payload = Vec::new();
    for column in columns {
        payload.extend_from_slice(column.name.as_bytes());
        payload.push(0);
    }
    let mut block = Vec::with_capacity(2 + payload.len());
    block.put_u16_le(payload.len() as u16);
    block.extend_from_slice(&payload);
    block
}

fn build_header_block(columns: &[Column]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(columns.len() * 3);
    for column in columns {
        payload.put_u8(column.ty.type_id());
        payload.put_u16_le(column.width);
    }
    let mut block = Vec::with_capacity(4 + payload.len());
    block.put_u32_le(payload.len() as u32);
    block.extend_from_slice(&payload);
    block
}

fn build_defaults_block(columns: &[Column]) -> Vec<u8> {
    let mut block = Vec::new();
    for column in columns.iter().skip(1) {
        let mut slot = vec![0u8; column.width as usize];
        let default = column
            .default
            .as_ref()
            .expect("non-key columns always have a resolved default");
        codec::write(&mut slot, column.ty, default, 0, column.width);
        block.extend_from_slice(&slot);
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank_decls() -> Vec<ColumnDecl> {
        vec![
            ColumnDecl::new("userId").with_max_width(10),
            ColumnDecl::new("money").with_type("int32").with_default(Value::Int32(0)),
        ]
    }

    #[test]
    fn resolves_key_first() {
        let schema = Schema::resolve("userId", &bank_decls()).unwrap();
        assert_eq!(schema.columns[0].name, "userId");
        assert_eq!(schema.columns[1].name, "money");
        assert_eq!(schema.columns[0].offset, 0);
        assert_eq!(schema.columns[1].offset, 10);
        assert_eq!(schema.row_length, 14);
    }

    #[test]
    fn preamble_is_deterministic() {
        let a = Schema::resolve("userId", &bank_decls()).unwrap();
        let b = Schema::resolve("userId", &bank_decls()).unwrap();
        assert_eq!(a.names_block, b.names_block);
        assert_eq!(a.header_block, b.header_block);
        assert_eq!(a.defaults_block, b.defaults_block);
    }

    #[test]
    fn rejects_duplicate_names() {
        let decls = vec![ColumnDecl::new("a"), ColumnDecl::new("a").with_type("uint8")];
        assert!(Schema::resolve("a", &decls).is_err());
    }

    #[test]
    fn rejects_key_with_default() {
        let decls = vec![ColumnDecl::new("a").with_default(Value::String(String::new()))];
        assert!(Schema::resolve("a", &decls).is_err());
    }

    #[test]
    fn rejects_fixed_width_with_explicit_width() {
        let decls = vec![
            ColumnDecl::new("k").with_max_width(4),
            ColumnDecl::new("v").with_type("uint16").with_max_width(2),
        ];
        assert!(Schema::resolve("k", &decls).is_err());
    }

    #[test]
    fn rejects_string_with_neither_width_nor_default() {
        let decls = vec![ColumnDecl::new("k").with_max_width(4), ColumnDecl::new("v")];
        assert!(Schema::resolve("k", &decls).is_err());
    }

    #[test]
    fn string_width_derived_from_default() {
        let decls = vec![
            ColumnDecl::new("k").with_max_width(4),
            ColumnDecl::new("v").with_default(Value::String("hi".to_string())),
        ];
        let schema = Schema::resolve("k", &decls).unwrap();
        assert_eq!(schema.columns[1].width, 4);
    }

    proptest::proptest! {
        #[test]
        fn resolve_is_deterministic_prop(key_width in 1u16..64, default in "[-a-zA-Z0-9 ]{0,40}") {
            let decls = vec![
                ColumnDecl::new("k").with_max_width(key_width),
                ColumnDecl::new("v").with_default(Value::String(default)),
            ];
            let a = Schema::resolve("k", &decls).unwrap();
            let b = Schema::resolve("k", &decls).unwrap();
            proptest::prop_assert_eq!(a.names_block, b.names_block);
            proptest::prop_assert_eq!(a.header_block, b.header_block);
            proptest::prop_assert_eq!(a.defaults_block, b.defaults_block);
            proptest::prop_assert_eq!(a.row_length, b.row_length);
        }

        #[test]
        fn string_width_is_default_length_plus_two_prop(default in "[-a-zA-Z0-9 ]{0,200}") {
            let decls = vec![
                ColumnDecl::new("k").with_max_width(4),
                ColumnDecl::new("v").with_default(Value::String(default.clone())),
            ];
            let schema = Schema::resolve("k", &decls).unwrap();
            proptest::prop_assert_eq!(schema.columns[1].width as usize, default.len() + 2);
        }

        #[test]
        fn out_of_range_default_is_always_rejected_prop(key_width in 1u16..8, payload_len in 9usize..20) {
            let default = "x".repeat(payload_len);
            let decls = vec![
                ColumnDecl::new("k").with_max_width(key_width),
                ColumnDecl::new("v").with_max_width(8).with_default(Value::String(default)),
            ];
            proptest::prop_assert!(Schema::resolve("k", &decls).is_err());
        }
    }
}
