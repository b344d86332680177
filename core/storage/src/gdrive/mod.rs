//! Google Drive storage provider.
//!
//! This module provides a storage backend using the Drive v3 API with:
//! - Bearer-token authentication through the request executor
//! - Streaming multipart uploads
//! - Server-side copy and parent-swap moves within one Drive root

pub mod client;
pub mod provider;

pub use client::{DriveClient, DriveFile, DRIVE_API_BASE, DRIVE_UPLOAD_BASE};
pub use provider::GDriveProvider;
