//! Common types shared across unistore crates.
//!
//! This crate holds the error type every provider operation returns, the
//! option and credential bags, and the provider-independent `Metadata`
//! value.

pub mod error;
pub mod metadata;
pub mod types;

pub use error::{Error, ProviderErrorKind, Result};
pub use metadata::{EntryKind, Metadata, MetadataResponse};
pub use types::{optional_str, require_str, Credentials, Options, RemotePath};
