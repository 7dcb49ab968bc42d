use serde::{Deserialize, Serialize};

/// Identifies a version of a file's content: its hash, modification time and size. This is what
///  distinguishes two otherwise identical requests for the same path.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub md5: String,
    pub last_modified: u64,
    pub file_size: u64,
}

impl FileDescriptor {
    pub fn new(md5: impl Into<String>, last_modified: u64, file_size: u64) -> FileDescriptor {
        FileDescriptor {
            md5: md5.into(),
            last_modified,
            file_size,
        }
    }

    /// The compact JSON form, which is part of message summaries. Field order is fixed by the
    ///  struct definition, so equal descriptors always produce identical strings.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_default()
    }
}
