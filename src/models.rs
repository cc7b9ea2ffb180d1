use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry of a remote directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Server-side href of the entry, as returned in the multistatus response
    pub path: String,
    /// Decoded last path segment
    pub name: String,
    pub size: i64,
    pub mime_type: String,
    pub last_modified: Option<DateTime<Utc>>,
    /// Opaque entity tag, quotes included
    pub etag: String,
    pub is_directory: bool,
}

/// Result of listing a container: its entries plus the server's clock at the
/// time of the listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryListing {
    pub files: Vec<FileInfo>,
    /// Taken from the response `Date` header, used by callers to detect skew
    pub server_date: DateTime<Utc>,
}

impl DirectoryListing {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<&FileInfo> {
        self.files.iter().find(|f| f.name == name)
    }
}

/// What `recover_interrupted_replace` found and did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// No aside artifact was present
    Clean,
    /// The new content had already been published; the aside copy was deleted
    Finished,
    /// The destination was missing; the aside copy was moved back
    RolledBack,
}
