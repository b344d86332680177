//! Storage provider abstraction for unistore.
//!
//! This crate provides one trait-based contract over heterogeneous remote
//! storage backends (Google Drive, local filesystem, in-memory), a registry
//! resolving a backend identifier to a constructor, the HTTP request
//! executor backends build on, and the copy/move orchestration that prefers
//! backend-native transfers and falls back to streaming.
//!
//! # Design Principles
//! - Provider isolation: callers never see backend APIs or credentials
//! - Async operations: every network or disk call is an await point
//! - Streaming: bytes flow from `download` into `upload` without buffering
//! - Decline vs failure: `Error::NotSupported` from a native transfer is a
//!   fallback signal, every other error aborts the operation

pub mod config;
pub mod gdrive;
pub mod local;
pub mod memory;
pub mod provider;
pub mod registry;
pub mod request;
pub mod transfer;
pub mod urls;

pub use config::{EndpointConfig, EndpointsConfig};
pub use gdrive::GDriveProvider;
pub use local::LocalProvider;
pub use memory::MemoryProvider;
pub use provider::{ByteStream, StorageProvider};
pub use registry::{create_default_registry, ProviderFactory, ProviderRegistry};
pub use request::{
    HttpRequest, HttpResponse, RequestBody, RequestExecutor, RequestOptions, ReqwestTransport,
    Transport,
};
pub use urls::build_url;

pub use unistore_common::{
    Credentials, EntryKind, Error, Metadata, MetadataResponse, Options, ProviderErrorKind,
    RemotePath, Result,
};
