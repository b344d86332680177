//! Google Drive storage provider implementation.

use async_trait::async_trait;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use unistore_common::{
    optional_str, require_str, Credentials, Error, Metadata, MetadataResponse, Options, Result,
};

use crate::provider::{ByteStream, StorageProvider};
use crate::request::{RequestExecutor, ReqwestTransport, Transport};

use super::client::{DriveClient, DriveFile, DRIVE_API_BASE, DRIVE_UPLOAD_BASE};

const NAME: &str = "gdrive";

/// Google Drive storage provider.
///
/// Entries are addressed by Drive file ID through the `id` option. Uploads
/// take `name` and an optional `parent` folder ID, defaulting to the
/// identity's root folder.
///
/// # Credentials
/// - auth `token`: OAuth2 access token sent as a bearer header
/// - identity `folder`: root folder ID (default `root`)
/// - identity `api_url` / `upload_url`: API base overrides
pub struct GDriveProvider {
    identity: Credentials,
    root_id: String,
    client: DriveClient,
}

impl GDriveProvider {
    /// Create a provider backed by a fresh HTTP client.
    pub fn from_credentials(auth: Credentials, identity: Credentials) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new()?);
        Self::with_transport(auth, identity, transport)
    }

    /// Create a provider sending its requests through `transport`.
    ///
    /// # Errors
    /// - `Config` if an API base URL is malformed
    pub fn with_transport(
        auth: Credentials,
        mut identity: Credentials,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let root_id = optional_str(&identity, "folder").unwrap_or("root").to_string();
        let api_url = optional_str(&identity, "api_url")
            .unwrap_or(DRIVE_API_BASE)
            .to_string();
        let upload_url = optional_str(&identity, "upload_url")
            .unwrap_or(DRIVE_UPLOAD_BASE)
            .to_string();

        for base in [&api_url, &upload_url] {
            Url::parse(base)
                .map_err(|e| Error::Config(format!("Invalid Drive URL '{}': {}", base, e)))?;
        }

        // An absent token drops the header rather than sending an empty one.
        let bearer = optional_str(&auth, "token").map(|token| format!("Bearer {}", token));
        let executor =
            RequestExecutor::new(transport, api_url).with_default_header("Authorization", bearer);

        identity.insert("folder".to_string(), Value::String(root_id.clone()));

        Ok(Self {
            identity,
            root_id,
            client: DriveClient::new(executor, upload_url),
        })
    }

    /// Root folder ID this provider is scoped to.
    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    fn downcast(dest: &dyn StorageProvider) -> Result<&GDriveProvider> {
        dest.as_any()
            .downcast_ref::<GDriveProvider>()
            .ok_or_else(|| Error::NotSupported(format!("Cannot transfer natively to {}", dest.name())))
    }

    /// Destination `(parent, name)` for a native transfer of `source`.
    ///
    /// Drive copy and move always create or relocate an entry; replacing
    /// an existing file by ID has to go through an upload.
    fn transfer_target<'a>(
        dest: &'a GDriveProvider,
        source: &'a DriveFile,
        dest_options: &'a Options,
    ) -> Result<(&'a str, &'a str)> {
        if optional_str(dest_options, "id").is_some() {
            return Err(Error::NotSupported(
                "Drive cannot overwrite an existing file natively".to_string(),
            ));
        }
        let parent = optional_str(dest_options, "parent").unwrap_or(&dest.root_id);
        let name = optional_str(dest_options, "name").unwrap_or(&source.name);
        Ok((parent, name))
    }
}

fn to_metadata(file: DriveFile) -> Metadata {
    let path = format!("/{}", file.id);
    let mut metadata = if file.is_folder() {
        Metadata::folder(NAME, file.name.as_str(), path)
    } else {
        Metadata::file(NAME, file.name.as_str(), path)
    };

    if let Some(size) = file.size_bytes() {
        metadata = metadata.with_size(size);
    }
    if let Some(modified) = file.modified_time {
        metadata = metadata.with_modified(modified);
    }
    if let Some(md5) = file.md5_checksum {
        metadata = metadata.with_extra("md5Checksum", md5);
    }

    metadata
        .with_extra("id", file.id)
        .with_extra("mimeType", file.mime_type)
        .with_extra("parents", file.parents)
}

#[async_trait]
impl StorageProvider for GDriveProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn identity(&self) -> &Credentials {
        &self.identity
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn download(&self, options: &Options) -> Result<ByteStream> {
        let id = require_str(options, "id")?;
        self.client.download(id).await
    }

    async fn upload(&self, stream: ByteStream, options: &Options) -> Result<Metadata> {
        if let Some(id) = optional_str(options, "id") {
            return Ok(to_metadata(self.client.update(id, stream).await?));
        }

        let name = require_str(options, "name")?;
        let parent = optional_str(options, "parent").unwrap_or(&self.root_id);

        // Same name in the same folder updates instead of duplicating
        let file = match self.client.find_file(name, parent).await? {
            Some(existing) => {
                debug!(id = %existing.id, name, "updating existing Drive file");
                self.client.update(&existing.id, stream).await?
            }
            None => self.client.upload(name, parent, stream).await?,
        };

        Ok(to_metadata(file))
    }

    async fn delete(&self, options: &Options) -> Result<()> {
        let id = require_str(options, "id")?;
        if id == self.root_id {
            return Err(Error::InvalidInput("Cannot delete the root folder".to_string()));
        }
        self.client.delete(id).await
    }

    async fn metadata(&self, options: &Options) -> Result<MetadataResponse> {
        let id = optional_str(options, "id").unwrap_or(&self.root_id);
        let file = self.client.get_file(id).await?;

        if !file.is_folder() {
            return Ok(MetadataResponse::Entry(to_metadata(file)));
        }

        let mut children: Vec<Metadata> = self
            .client
            .list_folder(&file.id)
            .await?
            .into_iter()
            .map(to_metadata)
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(MetadataResponse::Listing(children))
    }

    fn can_intra_copy(&self, other: &dyn StorageProvider) -> bool {
        self.is_same_endpoint(other)
    }

    fn can_intra_move(&self, other: &dyn StorageProvider) -> bool {
        self.is_same_endpoint(other)
    }

    async fn intra_copy(
        &self,
        dest: &dyn StorageProvider,
        source_options: &Options,
        dest_options: &Options,
    ) -> Result<Metadata> {
        let dest = Self::downcast(dest)?;
        let id = require_str(source_options, "id")?;
        let source = self.client.get_file(id).await?;

        if source.is_folder() {
            return Err(Error::NotSupported("Drive cannot copy folders natively".to_string()));
        }

        let (parent, name) = Self::transfer_target(dest, &source, dest_options)?;
        let copied = self.client.copy_file(&source.id, name, parent).await?;
        Ok(to_metadata(copied))
    }

    async fn intra_move(
        &self,
        dest: &dyn StorageProvider,
        source_options: &Options,
        dest_options: &Options,
    ) -> Result<Metadata> {
        let dest = Self::downcast(dest)?;
        let id = require_str(source_options, "id")?;
        if id == self.root_id {
            return Err(Error::InvalidInput("Cannot move the root folder".to_string()));
        }
        let source = self.client.get_file(id).await?;

        let (parent, name) = Self::transfer_target(dest, &source, dest_options)?;
        let moved = self
            .client
            .move_file(&source.id, name, parent, &source.parents)
            .await?;
        Ok(to_metadata(moved))
    }
}
