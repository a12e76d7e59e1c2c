//! File layout manager: owns the backing file handle, verifies or writes the preamble, and
//! provides absolute byte offsets for the row region.

use std::io::SeekFrom;
use std::path::Path;

use tokio::fs::OpenOptions;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::OpenError;
use crate::schema::Schema;

/// Magic bytes written at offset 0 of every table file.
pub const MAGIC: [u8; 4] = [0x0B, 0x0A, 0x0D, 0x0B];

/// Owns the table's file handle and tracks the row count and row-region geometry.
///
/// All methods that touch the file are `&mut self` and `async`; callers are expected to serialize
/// access to a single [`TableFile`] themselves (see the transaction controller's global file
/// lock) rather than relying on any internal locking here.
#[derive(Debug)]
pub struct TableFile {
    file: tokio::fs::File,
    data_offset: u64,
    row_length: u64,
    row_count: u32,
}

impl TableFile {
    /// Opens `path`, creating it with `schema`'s preamble if it does not exist, or verifying the
    /// existing preamble matches `schema` if it does.
    #[tracing::instrument(skip(schema), fields(path = %path.display()))]
    pub async fn open(path: &Path, schema: &Schema) -> Result<Self, OpenError> {
        let existed = tokio::fs::metadata(path).await.is_ok();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .await
            .map_err(|source| OpenError::Io { source })?;

        let data_offset = schema.data_offset();
        let row_length = schema.row_length as u64;

        let row_count = if existed {
            match verify_preamble(&mut file, schema).await {
                Ok(count) => count,
                Err(err) => {
                    tracing::warn!(error = %err, "schema-mismatch opening existing table file");
                    return Err(err);
                }
            }
        } else {
            tracing::debug!("creating new table file");
            write_preamble(&mut file, schema).await.map_err(|source| OpenError::Io { source })?;
            0
        };

        Ok(TableFile {
            file,
            data_offset,
            row_length,
            row_count,
        })
    }

    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    pub fn row_length(&self) -> u64 {
        self.row_length
    }

    pub fn row_offset(&self, index: u32) -> u64 {
        self.data_offset + u64::from(index) * self.row_length
    }

    pub async fn read_row(&mut self, index: u32, buf: &mut [u8]) -> std::io::Result<()> {
        debug_assert_eq!(buf.len() as u64, self.row_length);
        self.file.seek(SeekFrom::Start(self.row_offset(index))).await?;
        self.file.read_exact(buf).await?;
        Ok(())
    }

    pub async fn write_row(&mut self, index: u32, buf: &[u8]) -> std::io::Result<()> {
        debug_assert_eq!(buf.len() as u64, self.row_length);
        self.file.seek(SeekFrom::Start(self.row_offset(index))).await?;
        self.file.write_all(buf).await?;
        self.file.flush().await?;
        Ok(())
    }

    /// Reads only the first `key_width` bytes of row `index`.
    pub async fn read_key(&mut self, index: u32, key_width: usize, buf: &mut [u8]) -> std::io::Result<()> {
        debug_assert_eq!(buf.len(), key_width);
        self.file.seek(SeekFrom::Start(self.row_offset(index))).await?;
        self.file.read_exact(buf).await?;
        Ok(())
    }

    /// Persists a new row count, as the 4-byte counter preceding the row region.
    pub async fn set_row_count(&mut self, count: u32) -> std::io::Result<()> {
        let offset = self.data_offset - 4;
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(&count.to_le_bytes()).await?;
        self.file.flush().await?;
        self.row_count = count;
        Ok(())
    }

    /// Appends a new, uninitialized row slot by incrementing and persisting the row count.
    /// Returns the new row's index; the caller is responsible for writing its bytes.
    pub async fn append_row(&mut self) -> std::io::Result<u32> {
        let index = self.row_count;
        self.set_row_count(index + 1).await?;
        Ok(index)
    }

    pub async fn truncate(&mut self, len: u64) -> std::io::Result<()> {
        self.file.set_len(len).await?;
        Ok(())
    }

    pub fn data_offset(&self) -> u64 {
        self.data_offset
    }
}

async fn write_preamble(file: &mut tokio::fs::File, schema: &Schema) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(0)).await?;
    file.write_all(&MAGIC).await?;
    file.write_all(&schema.names_block).await?;
    file.write_all(&schema.header_block).await?;
    file.write_all(&schema.defaults_block).await?;
    file.write_all(&0u32.to_le_bytes()).await?;
    file.flush().await?;
    Ok(())
}

async fn verify_preamble(file: &mut tokio::fs::File, schema: &Schema) -> Result<u32, OpenError> {
    file.seek(SeekFrom::Start(0)).await.map_err(|source| OpenError::Io { source })?;

    let mut magic = [0u8; 4];
    file.read_exact(&mut magic).await.map_err(|source| OpenError::Io { source })?;
    if magic != MAGIC {
        return Err(OpenError::PreambleMismatch {
            reason: "magic bytes do not match".to_string(),
        });
    }

    let mut names = vec![0u8; schema.names_block.len()];
    file.read_exact(&mut names).await.map_err(|source| OpenError::Io { source })?;
    if names != schema.names_block {
        return Err(OpenError::PreambleMismatch {
            reason: "column names block does not match".to_string(),
        });
    }

    let mut header = vec![0u8; schema.header_block.len()];
    file.read_exact(&mut header).await.map_err(|source| OpenError::Io { source })?;
    if header != schema.header_block {
        return Err(OpenError::PreambleMismatch {
            reason: "column header block does not match".to_string(),
        });
    }

    let mut defaults = vec![0u8; schema.defaults_block.len()];
    file.read_exact(&mut defaults).await.map_err(|source| OpenError::Io { source })?;
    if defaults != schema.defaults_block {
        return Err(OpenError::PreambleMismatch {
            reason: "column defaults block does not match".to_string(),
        });
    }

    let mut count_bytes = [0u8; 4];
    file.read_exact(&mut count_bytes).await.map_err(|source| OpenError::Io { source })?;
    Ok(u32::from_le_bytes(count_bytes))
}
