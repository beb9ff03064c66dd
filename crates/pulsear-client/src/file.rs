use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use pulsear_transfer::slice_bounds;

/// Where the bytes of an upload live.
#[derive(Debug, Clone)]
pub enum FileSource {
    Memory(Bytes),
    Disk(PathBuf),
}

impl FileSource {
    pub async fn open(&self) -> std::io::Result<SliceReader> {
        Ok(match self {
            Self::Memory(bytes) => SliceReader::Memory(bytes.clone()),
            Self::Disk(path) => SliceReader::Disk(tokio::fs::File::open(path).await?),
        })
    }
}

/// Open handle used by a worker while it streams one command.
pub enum SliceReader {
    Memory(Bytes),
    Disk(tokio::fs::File),
}

impl SliceReader {
    /// Read slice `index`; the final slice is truncated to the remainder.
    pub async fn read_slice(
        &mut self,
        index: u32,
        slice_size: u64,
        size: u64,
    ) -> std::io::Result<Bytes> {
        let (offset, len) = slice_bounds(index, slice_size, size);
        match self {
            Self::Memory(bytes) => {
                let start = (offset as usize).min(bytes.len());
                let end = (start + len).min(bytes.len());
                Ok(bytes.slice(start..end))
            }
            Self::Disk(file) => {
                file.seek(SeekFrom::Start(offset)).await?;
                let mut buf = vec![0u8; len];
                file.read_exact(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

/// A file picked for upload.
#[derive(Debug, Clone)]
pub struct LocalFile {
    pub name: String,
    pub size: u64,
    /// Modification time, milliseconds since the Unix epoch.
    pub modified_ms: u64,
    pub source: FileSource,
}

impl LocalFile {
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        let modified_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            name,
            size: metadata.len(),
            modified_ms,
            source: FileSource::Disk(path.to_path_buf()),
        })
    }

    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>, modified_ms: u64) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            size: data.len() as u64,
            modified_ms,
            source: FileSource::Memory(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_slices() {
        let file = LocalFile::from_bytes("a", vec![7u8; 10], 0);
        let mut reader = file.source.open().await.unwrap();
        assert_eq!(reader.read_slice(0, 4, 10).await.unwrap().len(), 4);
        assert_eq!(reader.read_slice(2, 4, 10).await.unwrap().len(), 2);
        assert!(reader.read_slice(3, 4, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disk_slices() {
        let path = std::env::temp_dir().join(format!("pulsear_file_test_{}", std::process::id()));
        let data: Vec<u8> = (0..100u8).collect();
        tokio::fs::write(&path, &data).await.unwrap();

        let file = LocalFile::from_path(&path).await.unwrap();
        assert_eq!(file.size, 100);
        let mut reader = file.source.open().await.unwrap();
        let last = reader.read_slice(3, 30, 100).await.unwrap();
        assert_eq!(&last[..], &data[90..]);
        let first = reader.read_slice(0, 30, 100).await.unwrap();
        assert_eq!(&first[..], &data[..30]);

        let _ = tokio::fs::remove_file(&path).await;
    }
}
