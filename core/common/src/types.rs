//! Common types used throughout unistore.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Per-call option bag handed to a provider operation.
///
/// Keys are backend-specific; the transfer layer passes them through
/// untouched.
pub type Options = Map<String, Value>;

/// Opaque authentication or identity payload of a provider instance.
pub type Credentials = Map<String, Value>;

/// Look up a required string option.
pub fn require_str<'a>(options: &'a Options, key: &str) -> crate::Result<&'a str> {
    options
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| crate::Error::InvalidInput(format!("Missing string option '{}'", key)))
}

/// Look up an optional string option.
pub fn optional_str<'a>(options: &'a Options, key: &str) -> Option<&'a str> {
    options.get(key).and_then(Value::as_str)
}

/// A slash-separated path within a provider, independent of the backend's
/// own addressing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemotePath {
    components: Vec<String>,
}

impl RemotePath {
    /// Create a root path.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Parse a path string.
    ///
    /// Leading, trailing and repeated separators are ignored; `.` and `..`
    /// components are rejected.
    pub fn parse(path: &str) -> crate::Result<Self> {
        let mut components = Vec::new();
        for comp in path.split('/').filter(|c| !c.is_empty()) {
            if comp == "." || comp == ".." || comp.contains('\\') {
                return Err(crate::Error::InvalidInput(format!(
                    "Invalid path component '{}' in '{}'",
                    comp, path
                )));
            }
            components.push(comp.to_string());
        }
        Ok(Self { components })
    }

    /// Parse the `path` entry of an option bag.
    pub fn from_options(options: &Options) -> crate::Result<Self> {
        Self::parse(require_str(options, "path")?)
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self { components })
        }
    }

    /// Last component, if any.
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Join this path with a child component.
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        if child.is_empty() || child.contains('/') || child.contains('\\') {
            return Err(crate::Error::InvalidInput(format!(
                "Invalid child component '{}'",
                child
            )));
        }
        let mut components = self.components.clone();
        components.push(child.to_string());
        Ok(Self { components })
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Whether `self` is `other` or lies beneath it.
    pub fn starts_with(&self, other: &RemotePath) -> bool {
        self.components.starts_with(&other.components)
    }

    pub fn to_string_path(&self) -> String {
        format!("/{}", self.components.join("/"))
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_path())
    }
}
