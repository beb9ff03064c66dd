use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::content_id::ContentId;

/// Default slice size in bytes.
pub const DEFAULT_SLICE_SIZE: u64 = 40960;

/// One connected session of a user, as the server names it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRef {
    pub username: String,
    /// Server-assigned hash of this session; empty until the server's
    /// `Establish` reply has been seen.
    #[serde(default)]
    pub user_ctx_hash: String,
}

impl ClientRef {
    pub fn new(username: impl Into<String>, user_ctx_hash: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            user_ctx_hash: user_ctx_hash.into(),
        }
    }
}

/// Permission request for one upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    #[serde(rename = "username")]
    pub owner: String,
    pub name: String,
    pub size: u64,
    pub slice_size: u64,
    #[serde(rename = "last_modified_t")]
    pub modified_time: u64,
    #[serde(rename = "file_hash")]
    pub content_id: ContentId,
}

impl TransferRequest {
    /// Number of slices, `ceil(size / slice_size)`, or `None` when it does
    /// not fit a frame's 32-bit slice index.
    pub fn checked_slice_count(&self) -> Option<u32> {
        if self.slice_size == 0 {
            return Some(0);
        }
        u32::try_from(self.size.div_ceil(self.slice_size)).ok()
    }

    /// Number of slices; saturates for requests that fail
    /// [`checked_slice_count`](Self::checked_slice_count).
    pub fn slice_count(&self) -> u32 {
        self.checked_slice_count().unwrap_or(u32::MAX)
    }

    /// Half-open range covering every slice.
    pub fn full_range(&self) -> SliceRange {
        SliceRange::new(0, self.slice_count())
    }
}

/// Half-open range of slice indices `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SliceRange {
    pub start: u32,
    pub end: u32,
}

impl SliceRange {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub const fn single(index: u32) -> Self {
        Self { start: index, end: index + 1 }
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, index: u32) -> bool {
        self.start <= index && index < self.end
    }

    pub fn iter(&self) -> std::ops::Range<u32> {
        self.start..self.end
    }
}

/// A row of the file list, as rendered by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileListElem {
    pub name: String,
    pub size: String,
    pub create_t: String,
    pub access_t: String,
    pub modify_t: String,
}

impl FileListElem {
    /// Row metadata for a transfer the server did not describe.
    pub fn from_request(req: &TransferRequest) -> Self {
        let modified = chrono::DateTime::from_timestamp_millis(req.modified_time as i64)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        Self {
            name: req.name.clone(),
            size: human_size(req.size),
            create_t: modified.clone(),
            access_t: modified.clone(),
            modify_t: modified,
        }
    }
}

/// Render a byte count the way the file list does.
pub fn human_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes < KB {
        format!("{}b", bytes)
    } else if bytes < MB {
        format!("{:.1}Kb", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.3}Mb", bytes as f64 / MB as f64)
    } else {
        format!("{:.5}Gb", bytes as f64 / GB as f64)
    }
}

/// Per-path view settings of the file list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileListPathConfig {
    pub order_by: String,
    pub order_asc: bool,
    pub columns: Vec<String>,
}

/// User settings, sent with every heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    pub id: i32,
    pub theme: String,
    pub filelist_config: HashMap<String, FileListPathConfig>,
    pub web_worker_num: i32,
}

impl Default for UserConfig {
    fn default() -> Self {
        let columns: Vec<String> = ["name", "size", "create_t", "modify_t", "access_t"]
            .into_iter()
            .map(String::from)
            .collect();
        Self {
            id: 0,
            theme: "dark".to_string(),
            filelist_config: HashMap::from([(
                "/".to_string(),
                FileListPathConfig {
                    order_by: columns[0].clone(),
                    order_asc: true,
                    columns,
                },
            )]),
            web_worker_num: 4,
        }
    }
}

/// Server-side statistics returned with a heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardInfo {
    pub online_user: u64,
    pub online_client: u64,
    pub left_storage: u64,
    pub user_max_storage: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartBeat {
    pub config: UserConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard: Option<DashboardInfo>,
}

/// Server verdict on a [`TransferRequest`], broadcast to every session of the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSendable {
    /// Present iff the upload was granted.
    #[serde(default)]
    pub file_elem: Option<FileListElem>,
    #[serde(default)]
    pub req: Option<TransferRequest>,
    pub hashval: ContentId,
    /// Session that announced the upload.
    pub user_ctx_hash: String,
}

impl FileSendable {
    pub fn granted(&self) -> bool {
        self.file_elem.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileResponseStatus {
    Ok,
    /// Every slice is stored; sent by the uploader, echoed by the server.
    Finish,
    Resend,
    Fatalerr,
}

/// Per-range acknowledgement for a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileResponse {
    pub name: String,
    pub file_hash: ContentId,
    pub status: FileResponseStatus,
    pub range: SliceRange,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(size: u64, slice_size: u64) -> TransferRequest {
        TransferRequest {
            owner: "alice".into(),
            name: "a.bin".into(),
            size,
            slice_size,
            modified_time: 0,
            content_id: ContentId::from_bytes([1; 32]),
        }
    }

    #[test]
    fn test_slice_count() {
        assert_eq!(request(100_000, 40960).slice_count(), 3);
        assert_eq!(request(81920, 40960).slice_count(), 2);
        assert_eq!(request(1, 40960).slice_count(), 1);
        assert_eq!(request(0, 40960).slice_count(), 0);
    }

    #[test]
    fn test_slice_count_overflow() {
        let max = request(u32::MAX as u64, 1);
        assert_eq!(max.checked_slice_count(), Some(u32::MAX));

        let over = request((1 << 32) + 4, 1);
        assert_eq!(over.checked_slice_count(), None);
        assert_eq!(over.slice_count(), u32::MAX);
    }

    #[test]
    fn test_request_wire_names() {
        let json = serde_json::to_value(request(5, 2)).unwrap();
        assert_eq!(json["username"], "alice");
        assert_eq!(json["last_modified_t"], 0);
        assert!(json["file_hash"].is_string());
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512b");
        assert_eq!(human_size(1536), "1.5Kb");
        assert_eq!(human_size(3 * 1024 * 1024), "3.000Mb");
        assert_eq!(human_size(2 * 1024 * 1024 * 1024), "2.00000Gb");
    }

    #[test]
    fn test_slice_range() {
        let r = SliceRange::new(2, 5);
        assert_eq!(r.len(), 3);
        assert!(r.contains(2) && r.contains(4) && !r.contains(5));
        assert!(SliceRange::new(3, 3).is_empty());
        assert_eq!(SliceRange::single(7), SliceRange::new(7, 8));
    }
}
