//! Local filesystem storage provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use serde_json::Value;
use std::any::Any;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use unistore_common::{Credentials, Error, Metadata, MetadataResponse, Options, RemotePath, Result};

use crate::provider::{ByteStream, StorageProvider};

const NAME: &str = "local";

/// Local filesystem storage provider.
///
/// Every instance is rooted at a directory; option paths are resolved
/// beneath it. Native transfers are offered toward any other local provider,
/// since both sides share the host filesystem.
pub struct LocalProvider {
    identity: Credentials,
    root: PathBuf,
}

impl LocalProvider {
    /// Create a new local provider with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied creating the root
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let root_str = root
            .to_str()
            .ok_or_else(|| Error::InvalidInput(format!("Root {:?} is not valid UTF-8", root)))?;

        let mut identity = Credentials::new();
        identity.insert("root".to_string(), Value::String(root_str.to_string()));

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { identity, root })
    }

    /// Create a provider from an identity payload carrying `root`.
    pub fn from_identity(identity: Credentials) -> Result<Self> {
        let root = identity
            .get("root")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidInput("Local provider requires 'root' path".to_string()))?;
        Self::new(root)
    }

    fn to_fs_path(&self, path: &RemotePath) -> PathBuf {
        let mut fs_path = self.root.clone();
        for component in path.components() {
            fs_path.push(component);
        }
        fs_path
    }

    fn create_metadata(&self, path: &RemotePath, fs_meta: &std::fs::Metadata) -> Metadata {
        let name = path.name().unwrap_or("/");
        let metadata = if fs_meta.is_dir() {
            Metadata::folder(NAME, name, path.to_string_path())
        } else {
            Metadata::file(NAME, name, path.to_string_path()).with_size(fs_meta.len())
        };

        match fs_meta.modified() {
            Ok(modified) => metadata.with_modified(DateTime::<Utc>::from(modified)),
            Err(_) => metadata,
        }
    }

    async fn stat(&self, path: &RemotePath) -> Result<(PathBuf, std::fs::Metadata)> {
        let fs_path = self.to_fs_path(path);
        let fs_meta = fs::metadata(&fs_path)
            .await
            .map_err(|e| not_found_or(e, path))?;
        Ok((fs_path, fs_meta))
    }

    fn downcast(dest: &dyn StorageProvider) -> Result<&LocalProvider> {
        dest.as_any()
            .downcast_ref::<LocalProvider>()
            .ok_or_else(|| Error::NotSupported(format!("Cannot transfer natively to {}", dest.name())))
    }

    /// Resolve and validate both ends of a native transfer.
    async fn transfer_paths(
        &self,
        dest: &LocalProvider,
        source_options: &Options,
        dest_options: &Options,
    ) -> Result<(PathBuf, PathBuf, RemotePath)> {
        let from = RemotePath::from_options(source_options)?;
        let to = RemotePath::from_options(dest_options)?;
        if from.is_root() || to.is_root() {
            return Err(Error::InvalidInput("Cannot transfer a root folder".to_string()));
        }

        let (from_path, _) = self.stat(&from).await?;
        let to_path = dest.to_fs_path(&to);
        if to_path.starts_with(&from_path) {
            return Err(Error::InvalidInput(format!("Cannot transfer {} into itself", from)));
        }
        if let Some(parent) = to_path.parent() {
            if !fs::try_exists(parent).await? {
                return Err(Error::NotFound(format!("Parent folder not found for {}", to)));
            }
        }
        Ok((from_path, to_path, to))
    }
}

fn not_found_or(e: io::Error, path: &RemotePath) -> Error {
    if e.kind() == io::ErrorKind::NotFound {
        Error::NotFound(format!("Path not found: {}", path))
    } else {
        Error::Io(e)
    }
}

/// A rename across filesystems cannot be done natively.
fn rename_error(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::CrossesDevices {
        Error::NotSupported(format!("Rename crosses devices: {}", e))
    } else {
        Error::Io(e)
    }
}

async fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    let mut pending = vec![(from.to_path_buf(), to.to_path_buf())];
    while let Some((src, dst)) = pending.pop() {
        fs::create_dir_all(&dst).await?;
        let mut entries = fs::read_dir(&src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = dst.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((entry.path(), target));
            } else {
                fs::copy(entry.path(), &target).await?;
            }
        }
    }
    Ok(())
}

#[async_trait]
impl StorageProvider for LocalProvider {
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
        let path = RemotePath::from_options(options)?;
        let (fs_path, fs_meta) = self.stat(&path).await?;

        if fs_meta.is_dir() {
            return Err(Error::InvalidInput(format!("Cannot download folder {}", path)));
        }

        let file = fs::File::open(&fs_path)
            .await
            .map_err(|e| not_found_or(e, &path))?;
        Ok(Box::pin(ReaderStream::new(file).map_err(Error::Io)))
    }

    async fn upload(&self, mut stream: ByteStream, options: &Options) -> Result<Metadata> {
        let path = RemotePath::from_options(options)?;
        if path.is_root() {
            return Err(Error::InvalidInput("Cannot upload to the root".to_string()));
        }
        let fs_path = self.to_fs_path(&path);

        if let Some(parent) = fs_path.parent() {
            if !fs::try_exists(parent).await? {
                return Err(Error::NotFound(format!("Parent folder not found for {}", path)));
            }
        }

        // Stage beside the target; an existing file is only replaced once
        // the whole stream has landed.
        let staging = fs_path.with_file_name(format!(
            ".{}.{}.part",
            path.name().unwrap_or("upload"),
            Uuid::new_v4().simple()
        ));

        let mut file = fs::File::create(&staging).await?;
        let written = async {
            while let Some(chunk) = stream.next().await {
                file.write_all(&chunk?).await?;
            }
            file.flush().await?;
            Ok::<(), Error>(())
        }
        .await;
        drop(file);

        let committed = match written {
            Ok(()) => fs::rename(&staging, &fs_path).await.map_err(Error::Io),
            Err(e) => Err(e),
        };
        if let Err(e) = committed {
            let _ = fs::remove_file(&staging).await;
            return Err(e);
        }

        let fs_meta = fs::metadata(&fs_path).await?;
        Ok(self.create_metadata(&path, &fs_meta))
    }

    async fn delete(&self, options: &Options) -> Result<()> {
        let path = RemotePath::from_options(options)?;
        if path.is_root() {
            return Err(Error::InvalidInput("Cannot delete the root".to_string()));
        }
        let (fs_path, fs_meta) = self.stat(&path).await?;

        if fs_meta.is_dir() {
            fs::remove_dir_all(&fs_path).await?;
        } else {
            fs::remove_file(&fs_path).await?;
        }
        Ok(())
    }

    async fn metadata(&self, options: &Options) -> Result<MetadataResponse> {
        let path = RemotePath::from_options(options)?;
        let (fs_path, fs_meta) = self.stat(&path).await?;

        if !fs_meta.is_dir() {
            return Ok(MetadataResponse::Entry(self.create_metadata(&path, &fs_meta)));
        }

        let mut results = Vec::new();
        let mut entries = fs::read_dir(&fs_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let child = path.join(&name)?;
            let child_meta = entry.metadata().await?;
            results.push(self.create_metadata(&child, &child_meta));
        }
        results.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(MetadataResponse::Listing(results))
    }

    fn can_intra_copy(&self, other: &dyn StorageProvider) -> bool {
        other.as_any().is::<LocalProvider>()
    }

    fn can_intra_move(&self, other: &dyn StorageProvider) -> bool {
        other.as_any().is::<LocalProvider>()
    }

    async fn intra_copy(
        &self,
        dest: &dyn StorageProvider,
        source_options: &Options,
        dest_options: &Options,
    ) -> Result<Metadata> {
        let dest = Self::downcast(dest)?;
        let (from_path, to_path, to) = self
            .transfer_paths(dest, source_options, dest_options)
            .await?;

        if fs::metadata(&from_path).await?.is_dir() {
            copy_tree(&from_path, &to_path).await?;
        } else {
            fs::copy(&from_path, &to_path).await?;
        }

        let fs_meta = fs::metadata(&to_path).await?;
        Ok(dest.create_metadata(&to, &fs_meta))
    }

    async fn intra_move(
        &self,
        dest: &dyn StorageProvider,
        source_options: &Options,
        dest_options: &Options,
    ) -> Result<Metadata> {
        let dest = Self::downcast(dest)?;
        let (from_path, to_path, to) = self
            .transfer_paths(dest, source_options, dest_options)
            .await?;

        fs::rename(&from_path, &to_path).await.map_err(rename_error)?;

        let fs_meta = fs::metadata(&to_path).await?;
        Ok(dest.create_metadata(&to, &fs_meta))
    }
}
