//! Provider-independent description of a remote entry.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Kind of a remote entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Folder,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Folder => "folder",
        }
    }
}

/// Metadata for a remote file or folder.
///
/// Built by a provider from a raw backend response and handed to the caller.
/// Fields are public for reading; the `with_*` methods exist so providers can
/// assemble a value in one expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Identifier of the provider that produced this entry.
    pub provider: String,
    /// File or folder.
    pub kind: EntryKind,
    /// Display name.
    pub name: String,
    /// Size in bytes, if the backend reports one.
    pub size: Option<u64>,
    /// Path of the entry within the provider.
    pub path: String,
    /// Last modification time, if the backend reports one.
    pub modified: Option<DateTime<Utc>>,
    /// Backend-specific extras.
    pub extra: Map<String, Value>,
}

impl Metadata {
    /// Metadata for a file.
    pub fn file(provider: impl Into<String>, name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(EntryKind::File, provider, name, path)
    }

    /// Metadata for a folder.
    pub fn folder(provider: impl Into<String>, name: impl Into<String>, path: impl Into<String>) -> Self {
        Self::new(EntryKind::Folder, provider, name, path)
    }

    fn new(
        kind: EntryKind,
        provider: impl Into<String>,
        name: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            kind,
            name: name.into(),
            size: None,
            path: path.into(),
            modified: None,
            extra: Map::new(),
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = Some(modified);
        self
    }

    /// Add one backend-specific entry to `extra`.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn is_folder(&self) -> bool {
        self.kind == EntryKind::Folder
    }

    /// Fixed-shape record exposed to callers.
    ///
    /// Every key is always present. Missing size or modification time are
    /// emitted as `null`, and `extra` as an empty object.
    pub fn serialized(&self) -> Value {
        json!({
            "provider": self.provider,
            "kind": self.kind.as_str(),
            "name": self.name,
            "size": self.size,
            "path": self.path,
            "modified": self
                .modified
                .map(|m| m.to_rfc3339_opts(SecondsFormat::Secs, true)),
            "extra": Value::Object(self.extra.clone()),
        })
    }
}

/// Result of a metadata lookup: one entry, or the children of a folder.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataResponse {
    Entry(Metadata),
    Listing(Vec<Metadata>),
}

impl MetadataResponse {
    /// The single entry, if this is not a listing.
    pub fn into_entry(self) -> Option<Metadata> {
        match self {
            MetadataResponse::Entry(m) => Some(m),
            MetadataResponse::Listing(_) => None,
        }
    }

    pub fn serialized(&self) -> Value {
        match self {
            MetadataResponse::Entry(m) => m.serialized(),
            MetadataResponse::Listing(entries) => {
                Value::Array(entries.iter().map(Metadata::serialized).collect())
            }
        }
    }
}
