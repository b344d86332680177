//! In-memory storage provider.
//!
//! Entries live in a bucket shared by every provider instance whose identity
//! names that bucket, so two equal endpoints really see the same data.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::{stream, StreamExt};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use uuid::Uuid;

use unistore_common::{
    Credentials, Error, Metadata, MetadataResponse, Options, RemotePath, Result,
};

use crate::provider::{ByteStream, StorageProvider};

const NAME: &str = "memory";

/// In-memory storage entry.
#[derive(Debug, Clone)]
enum Entry {
    File { data: Bytes, metadata: Metadata },
    Folder { metadata: Metadata },
}

impl Entry {
    fn metadata(&self) -> &Metadata {
        match self {
            Entry::File { metadata, .. } | Entry::Folder { metadata } => metadata,
        }
    }

    /// Same entry re-homed at `path`.
    fn relocated(&self, path: &RemotePath) -> Entry {
        let mut entry = self.clone();
        let metadata = match &mut entry {
            Entry::File { metadata, .. } | Entry::Folder { metadata } => metadata,
        };
        metadata.name = path.name().unwrap_or("/").to_string();
        metadata.path = path.to_string_path();
        metadata.modified = Some(Utc::now());
        entry
    }
}

type Store = Arc<RwLock<HashMap<String, Entry>>>;

fn new_store() -> Store {
    let mut entries = HashMap::new();
    entries.insert(
        "/".to_string(),
        Entry::Folder {
            metadata: Metadata::folder(NAME, "/", "/").with_modified(Utc::now()),
        },
    );
    Arc::new(RwLock::new(entries))
}

/// Named in-memory stores, shared across the providers built from one
/// registry.
///
/// Only weak handles are kept: a bucket is freed once its last provider is
/// dropped.
#[derive(Clone, Default)]
pub struct MemoryBuckets {
    buckets: Arc<Mutex<HashMap<String, Weak<RwLock<HashMap<String, Entry>>>>>>,
}

impl MemoryBuckets {
    fn get_or_create(&self, name: &str) -> Store {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(store) = buckets.get(name).and_then(Weak::upgrade) {
            return store;
        }

        buckets.retain(|_, store| store.strong_count() > 0);
        let store = new_store();
        buckets.insert(name.to_string(), Arc::downgrade(&store));
        store
    }
}

/// In-memory storage provider.
///
/// Useful for testing and development. Data lives as long as any provider
/// over the bucket does.
pub struct MemoryProvider {
    identity: Credentials,
    storage: Store,
}

impl MemoryProvider {
    /// Create a provider over a fresh, private bucket.
    pub fn new() -> Self {
        let mut identity = Credentials::new();
        identity.insert("bucket".to_string(), Value::String(Uuid::new_v4().to_string()));
        Self {
            identity,
            storage: new_store(),
        }
    }

    /// Create a provider over the bucket named by the identity key `bucket`.
    ///
    /// Without a `bucket` key a fresh private bucket is allocated.
    pub fn from_identity(buckets: &MemoryBuckets, mut identity: Credentials) -> Result<Self> {
        let bucket = match identity.get("bucket") {
            Some(Value::String(name)) if !name.is_empty() => name.clone(),
            Some(_) => {
                return Err(Error::InvalidInput(
                    "Memory provider 'bucket' must be a non-empty string".to_string(),
                ))
            }
            None => {
                // Private bucket, not tracked.
                let name = Uuid::new_v4().to_string();
                identity.insert("bucket".to_string(), Value::String(name));
                return Ok(Self {
                    identity,
                    storage: new_store(),
                });
            }
        };

        Ok(Self {
            storage: buckets.get_or_create(&bucket),
            identity,
        })
    }

    /// Create a folder, including missing parents.
    pub fn create_folder(&self, path: &RemotePath) -> Result<Metadata> {
        let mut storage = self.write();
        let mut current = RemotePath::root();
        for component in path.components() {
            current = current.join(component)?;
            let key = current.to_string_path();
            match storage.get(&key) {
                Some(Entry::Folder { .. }) => continue,
                Some(Entry::File { .. }) => {
                    return Err(Error::InvalidInput(format!("{} is a file", current)));
                }
                None => {
                    let metadata = Metadata::folder(NAME, component.as_str(), key.as_str())
                        .with_modified(Utc::now());
                    storage.insert(key, Entry::Folder { metadata });
                }
            }
        }
        storage
            .get(&path.to_string_path())
            .map(|entry| entry.metadata().clone())
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.storage.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.storage.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_parent(storage: &HashMap<String, Entry>, path: &RemotePath) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::InvalidInput("Cannot write to the root".to_string()))?;
        match storage.get(&parent.to_string_path()) {
            Some(Entry::Folder { .. }) => Ok(()),
            Some(Entry::File { .. }) => Err(Error::InvalidInput(format!("Parent {} is a file", parent))),
            None => Err(Error::NotFound(format!("Parent folder not found: {}", parent))),
        }
    }

    /// Keys of `path` and everything beneath it.
    fn subtree_keys(storage: &HashMap<String, Entry>, path: &RemotePath) -> Vec<String> {
        storage
            .keys()
            .filter(|key| {
                RemotePath::parse(key)
                    .map(|p| p.starts_with(path))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Copy the subtree at `from` into `dest_storage` at `to`, replacing
    /// whatever was there. Returns the metadata of the new top entry.
    fn copy_subtree(
        source: &HashMap<String, Entry>,
        dest_storage: &mut HashMap<String, Entry>,
        from: &RemotePath,
        to: &RemotePath,
    ) -> Result<Metadata> {
        let entries: Vec<(RemotePath, Entry)> = Self::subtree_keys(source, from)
            .into_iter()
            .filter_map(|key| {
                let path = RemotePath::parse(&key).ok()?;
                let entry = source.get(&key)?.clone();
                Some((path, entry))
            })
            .collect();
        if entries.is_empty() {
            return Err(Error::NotFound(format!("Source not found: {}", from)));
        }

        for key in Self::subtree_keys(dest_storage, to) {
            dest_storage.remove(&key);
        }

        let mut top = None;
        for (path, entry) in entries {
            let mut target = to.clone();
            for component in &path.components()[from.components().len()..] {
                target = target.join(component)?;
            }
            let relocated = entry.relocated(&target);
            if target == *to {
                top = Some(relocated.metadata().clone());
            }
            dest_storage.insert(target.to_string_path(), relocated);
        }

        top.ok_or_else(|| Error::NotFound(format!("Source not found: {}", from)))
    }

    fn downcast(dest: &dyn StorageProvider) -> Result<&MemoryProvider> {
        dest.as_any()
            .downcast_ref::<MemoryProvider>()
            .ok_or_else(|| Error::NotSupported(format!("Cannot copy natively to {}", dest.name())))
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageProvider for MemoryProvider {
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
        let storage = self.read();

        match storage.get(&path.to_string_path()) {
            Some(Entry::File { data, .. }) => {
                let data = data.clone();
                Ok(Box::pin(stream::once(async move { Ok(data) })))
            }
            Some(Entry::Folder { .. }) => {
                Err(Error::InvalidInput(format!("Cannot download folder {}", path)))
            }
            None => Err(Error::NotFound(format!("File not found: {}", path))),
        }
    }

    async fn upload(&self, mut stream: ByteStream, options: &Options) -> Result<Metadata> {
        let path = RemotePath::from_options(options)?;

        let mut data = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk?);
        }
        let data = data.freeze();

        let mut storage = self.write();
        Self::check_parent(&storage, &path)?;
        let key = path.to_string_path();
        if let Some(Entry::Folder { .. }) = storage.get(&key) {
            return Err(Error::InvalidInput(format!("{} is a folder", path)));
        }

        let metadata = Metadata::file(NAME, path.name().unwrap_or("/"), key.as_str())
            .with_size(data.len() as u64)
            .with_modified(Utc::now())
            .with_extra("etag", Uuid::new_v4().to_string());

        storage.insert(
            key,
            Entry::File {
                data,
                metadata: metadata.clone(),
            },
        );

        Ok(metadata)
    }

    async fn delete(&self, options: &Options) -> Result<()> {
        let path = RemotePath::from_options(options)?;
        if path.is_root() {
            return Err(Error::InvalidInput("Cannot delete the root".to_string()));
        }

        let mut storage = self.write();
        if !storage.contains_key(&path.to_string_path()) {
            return Err(Error::NotFound(format!("Path not found: {}", path)));
        }
        for key in Self::subtree_keys(&storage, &path) {
            storage.remove(&key);
        }
        Ok(())
    }

    async fn metadata(&self, options: &Options) -> Result<MetadataResponse> {
        let path = RemotePath::from_options(options)?;
        let storage = self.read();

        match storage.get(&path.to_string_path()) {
            Some(Entry::File { metadata, .. }) => Ok(MetadataResponse::Entry(metadata.clone())),
            Some(Entry::Folder { .. }) => {
                let depth = path.components().len() + 1;
                let mut children: Vec<Metadata> = storage
                    .iter()
                    .filter_map(|(key, entry)| {
                        let child = RemotePath::parse(key).ok()?;
                        (child.components().len() == depth && child.starts_with(&path))
                            .then(|| entry.metadata().clone())
                    })
                    .collect();
                children.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(MetadataResponse::Listing(children))
            }
            None => Err(Error::NotFound(format!("Path not found: {}", path))),
        }
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
        let from = RemotePath::from_options(source_options)?;
        let to = RemotePath::from_options(dest_options)?;
        if to.starts_with(&from) {
            return Err(Error::InvalidInput(format!("Cannot copy {} into itself", from)));
        }

        let source = self.read().clone();
        let mut dest_storage = dest.write();
        Self::check_parent(&dest_storage, &to)?;
        Self::copy_subtree(&source, &mut dest_storage, &from, &to)
    }

    async fn intra_move(
        &self,
        dest: &dyn StorageProvider,
        source_options: &Options,
        dest_options: &Options,
    ) -> Result<Metadata> {
        let dest = Self::downcast(dest)?;
        if !Arc::ptr_eq(&self.storage, &dest.storage) {
            return Err(Error::NotSupported(
                "Native move needs a shared bucket".to_string(),
            ));
        }

        let from = RemotePath::from_options(source_options)?;
        let to = RemotePath::from_options(dest_options)?;
        if from.is_root() || to.starts_with(&from) {
            return Err(Error::InvalidInput(format!("Cannot move {} into {}", from, to)));
        }

        // Single lock: the move is atomic within the bucket.
        let mut storage = self.write();
        Self::check_parent(&storage, &to)?;
        let snapshot = storage.clone();
        let metadata = Self::copy_subtree(&snapshot, &mut storage, &from, &to)?;
        for key in Self::subtree_keys(&snapshot, &from) {
            storage.remove(&key);
        }
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn opts(path: &str) -> Options {
        json!({ "path": path }).as_object().unwrap().clone()
    }

    fn bytes(data: &'static [u8]) -> ByteStream {
        Box::pin(stream::iter(vec![Ok(Bytes::from_static(data))]))
    }

    async fn read_all(provider: &MemoryProvider, path: &str) -> Vec<u8> {
        let mut stream = provider.download(&opts(path)).await.unwrap();
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    fn shared_pair() -> (MemoryProvider, MemoryProvider) {
        let buckets = MemoryBuckets::default();
        let identity = json!({"bucket": "shared"}).as_object().unwrap().clone();
        (
            MemoryProvider::from_identity(&buckets, identity.clone()).unwrap(),
            MemoryProvider::from_identity(&buckets, identity).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_upload_download() {
        let provider = MemoryProvider::new();
        let metadata = provider.upload(bytes(b"Hello, World!"), &opts("/test.txt")).await.unwrap();

        assert_eq!(metadata.size, Some(13));
        assert_eq!(metadata.name, "test.txt");
        assert_eq!(read_all(&provider, "/test.txt").await, b"Hello, World!");
    }

    #[tokio::test]
    async fn test_upload_requires_parent() {
        let provider = MemoryProvider::new();
        let err = provider.upload(bytes(b"x"), &opts("/missing/a.txt")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_download_missing_is_not_found() {
        let provider = MemoryProvider::new();
        let err = provider.download(&opts("/nope")).await.err().unwrap();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_folder_is_recursive() {
        let provider = MemoryProvider::new();
        provider.create_folder(&RemotePath::parse("/dir/sub").unwrap()).unwrap();
        provider.upload(bytes(b"1"), &opts("/dir/sub/a.txt")).await.unwrap();

        provider.delete(&opts("/dir")).await.unwrap();

        assert!(provider.metadata(&opts("/dir/sub/a.txt")).await.is_err());
        assert!(provider.delete(&opts("/dir")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_metadata_lists_direct_children() {
        let provider = MemoryProvider::new();
        provider.create_folder(&RemotePath::parse("/dir/nested").unwrap()).unwrap();
        provider.upload(bytes(b"1"), &opts("/dir/b.txt")).await.unwrap();
        provider.upload(bytes(b"2"), &opts("/dir/nested/deep.txt")).await.unwrap();

        match provider.metadata(&opts("/dir")).await.unwrap() {
            MetadataResponse::Listing(children) => {
                let names: Vec<_> = children.iter().map(|m| m.name.as_str()).collect();
                assert_eq!(names, vec!["b.txt", "nested"]);
            }
            other => panic!("expected listing, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shared_bucket_sees_same_data() {
        let (a, b) = shared_pair();
        a.upload(bytes(b"shared"), &opts("/f.txt")).await.unwrap();

        assert!(a.is_same_endpoint(&b));
        assert_eq!(read_all(&b, "/f.txt").await, b"shared");
    }

    #[tokio::test]
    async fn test_intra_copy_folder() {
        let (a, b) = shared_pair();
        a.create_folder(&RemotePath::parse("/src/inner").unwrap()).unwrap();
        a.upload(bytes(b"x"), &opts("/src/inner/x.txt")).await.unwrap();

        assert!(a.can_intra_copy(&b));
        let metadata = a.intra_copy(&b, &opts("/src"), &opts("/dst")).await.unwrap();

        assert!(metadata.is_folder());
        assert_eq!(metadata.path, "/dst");
        assert_eq!(read_all(&b, "/dst/inner/x.txt").await, b"x");
        assert_eq!(read_all(&a, "/src/inner/x.txt").await, b"x");
    }

    #[tokio::test]
    async fn test_intra_move_is_rename() {
        let (a, b) = shared_pair();
        a.upload(bytes(b"data"), &opts("/old.txt")).await.unwrap();

        let metadata = a.move_to(&b, &opts("/old.txt"), &opts("/new.txt")).await.unwrap();

        assert_eq!(metadata.name, "new.txt");
        assert!(a.download(&opts("/old.txt")).await.err().unwrap().is_not_found());
        assert_eq!(read_all(&a, "/new.txt").await, b"data");
    }

    #[tokio::test]
    async fn test_move_into_itself_rejected() {
        let (a, b) = shared_pair();
        a.create_folder(&RemotePath::parse("/dir").unwrap()).unwrap();

        let err = a.move_to(&b, &opts("/dir"), &opts("/dir/child")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(a.metadata(&opts("/dir")).await.is_ok());
    }

    #[tokio::test]
    async fn test_copy_between_buckets_streams() {
        let a = MemoryProvider::new();
        let b = MemoryProvider::new();
        a.upload(bytes(b"payload"), &opts("/a.txt")).await.unwrap();

        assert!(!a.can_intra_copy(&b));
        let metadata = a.copy(&b, &opts("/a.txt"), &opts("/b.txt")).await.unwrap();

        assert_eq!(metadata.size, Some(7));
        assert_eq!(read_all(&b, "/b.txt").await, b"payload");
        assert_eq!(read_all(&a, "/a.txt").await, b"payload");
    }

    #[test]
    fn test_dropped_buckets_are_released() {
        let buckets = MemoryBuckets::default();
        for _ in 0..100 {
            drop(MemoryProvider::from_identity(&buckets, Credentials::new()).unwrap());
        }
        for i in 0..100 {
            let identity = json!({ "bucket": format!("b{}", i) }).as_object().unwrap().clone();
            drop(MemoryProvider::from_identity(&buckets, identity).unwrap());
        }

        let live = MemoryProvider::from_identity(
            &buckets,
            json!({ "bucket": "kept" }).as_object().unwrap().clone(),
        )
        .unwrap();
        let retained = buckets.buckets.lock().unwrap();
        assert_eq!(retained.len(), 1);
        assert!(retained.contains_key("kept"));
        drop(retained);
        drop(live);
    }

    #[tokio::test]
    async fn test_move_between_separate_stores_falls_back() {
        // Equal identities from two tables: same endpoint, different stores.
        let identity = json!({ "bucket": "twin" }).as_object().unwrap().clone();
        let a = MemoryProvider::from_identity(&MemoryBuckets::default(), identity.clone()).unwrap();
        let b = MemoryProvider::from_identity(&MemoryBuckets::default(), identity).unwrap();
        a.upload(bytes(b"moving"), &opts("/m.txt")).await.unwrap();

        assert!(a.can_intra_move(&b));
        let declined = a.intra_move(&b, &opts("/m.txt"), &opts("/n.txt")).await.unwrap_err();
        assert!(declined.is_not_supported());

        let metadata = a.move_to(&b, &opts("/m.txt"), &opts("/n.txt")).await.unwrap();

        assert_eq!(metadata.size, Some(6));
        assert_eq!(read_all(&b, "/n.txt").await, b"moving");
        assert!(a.download(&opts("/m.txt")).await.err().unwrap().is_not_found());
    }
}
