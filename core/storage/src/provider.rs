//! Storage provider trait definition.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::any::Any;
use std::pin::Pin;

use unistore_common::{Credentials, Error, Metadata, MetadataResponse, Options, Result};

use crate::transfer;

/// Byte stream type for upload/download operations.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Storage provider trait for different backends.
///
/// A provider instance addresses one account or resource root, described by
/// its identity payload. All operations take a backend-specific option bag.
///
/// Native ("intra") transfers are negotiated in two steps: `can_intra_copy`
/// / `can_intra_move` answer whether a native path toward another provider
/// is plausible, and `intra_copy` / `intra_move` may still decline with
/// `Error::NotSupported` once the full options are known. `copy` and `move_to`
/// handle the decline by falling back to `download` + `upload`.
#[async_trait]
pub trait StorageProvider: Send + Sync + 'static {
    /// Registry identifier of the backend (e.g. "gdrive", "local").
    fn name(&self) -> &str;

    /// Identity payload locating the account or resource root.
    fn identity(&self) -> &Credentials;

    /// Concrete type access for endpoint comparison.
    fn as_any(&self) -> &dyn Any;

    /// Whether `other` addresses the same place as `self`.
    ///
    /// Same concrete type and equal identity. Authentication is not
    /// considered: two instances with different credentials for the same
    /// account are still the same endpoint.
    fn is_same_endpoint(&self, other: &dyn StorageProvider) -> bool {
        self.as_any().type_id() == other.as_any().type_id() && self.identity() == other.identity()
    }

    /// Open a stream over the entry's content.
    ///
    /// # Errors
    /// - `NotFound` if the entry does not exist
    async fn download(&self, options: &Options) -> Result<ByteStream>;

    /// Write `stream` to the entry described by `options`.
    ///
    /// # Errors
    /// - Backend rejection (quota, validation) as a provider error
    async fn upload(&self, stream: ByteStream, options: &Options) -> Result<Metadata>;

    /// Delete an entry. Deleting a missing entry may fail.
    async fn delete(&self, options: &Options) -> Result<()>;

    /// Describe an entry, or list a folder's children.
    async fn metadata(&self, options: &Options) -> Result<MetadataResponse>;

    fn can_intra_copy(&self, _other: &dyn StorageProvider) -> bool {
        false
    }

    fn can_intra_move(&self, _other: &dyn StorageProvider) -> bool {
        false
    }

    /// Backend-native copy toward `dest`.
    ///
    /// Declines with `Error::NotSupported` unless overridden.
    async fn intra_copy(
        &self,
        _dest: &dyn StorageProvider,
        _source_options: &Options,
        _dest_options: &Options,
    ) -> Result<Metadata> {
        Err(Error::NotSupported(format!(
            "{} has no native copy",
            self.name()
        )))
    }

    /// Backend-native move toward `dest`.
    ///
    /// The default runs `intra_copy` and then deletes the source. A failed
    /// delete is reported as `Error::PartialMove`; the destination copy is
    /// left in place.
    async fn intra_move(
        &self,
        dest: &dyn StorageProvider,
        source_options: &Options,
        dest_options: &Options,
    ) -> Result<Metadata> {
        let metadata = self.intra_copy(dest, source_options, dest_options).await?;
        match self.delete(source_options).await {
            Ok(()) => Ok(metadata),
            Err(e) => Err(Error::partial_move(metadata, e)),
        }
    }

    /// Copy an entry to `dest`, natively if possible.
    async fn copy(
        &self,
        dest: &dyn StorageProvider,
        source_options: &Options,
        dest_options: &Options,
    ) -> Result<Metadata> {
        transfer::copy(self, dest, source_options, dest_options).await
    }

    /// Move an entry to `dest`, natively if possible.
    async fn move_to(
        &self,
        dest: &dyn StorageProvider,
        source_options: &Options,
        dest_options: &Options,
    ) -> Result<Metadata> {
        transfer::move_to(self, dest, source_options, dest_options).await
    }
}

impl PartialEq for dyn StorageProvider {
    fn eq(&self, other: &Self) -> bool {
        self.is_same_endpoint(other)
    }
}

impl std::fmt::Debug for dyn StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageProvider")
            .field("name", &self.name())
            .field("identity", self.identity())
            .finish()
    }
}
