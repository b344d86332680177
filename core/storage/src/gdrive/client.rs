//! Google Drive API client.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use unistore_common::{Error, ProviderErrorKind, Result};

use crate::provider::ByteStream;
use crate::request::{RequestBody, RequestExecutor, RequestOptions};
use crate::urls::build_url;

/// Google Drive API base URL.
pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
/// Google Drive upload API base URL.
pub const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const FIELDS: &str = "id,name,mimeType,size,modifiedTime,parents,md5Checksum,trashed";

/// Google Drive file metadata from API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    /// File size in bytes (only for files, not folders).
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub modified_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub md5_checksum: Option<String>,
    #[serde(default)]
    pub trashed: bool,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME
    }

    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_ref().and_then(|s| s.parse().ok())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListResponse {
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Escape a value for a single-quoted Drive query literal.
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// A 404 from Drive means the entry is absent.
fn not_found(e: Error, id: &str) -> Error {
    match e {
        Error::Provider { status: 404, .. } => Error::NotFound(format!("Drive file not found: {}", id)),
        other => other,
    }
}

/// Google Drive API client.
pub struct DriveClient {
    executor: RequestExecutor,
    upload_base: String,
}

impl DriveClient {
    /// Create a client. `executor` is rooted at the Drive API base URL.
    pub fn new(executor: RequestExecutor, upload_base: impl Into<String>) -> Self {
        Self {
            executor,
            upload_base: upload_base.into(),
        }
    }

    /// Get file metadata by ID.
    pub async fn get_file(&self, file_id: &str) -> Result<DriveFile> {
        let url = self.executor.build_url(&["files", file_id], &[("fields", FIELDS)])?;
        let response = self
            .executor
            .make_request(
                Method::GET,
                url,
                RequestOptions::new()
                    .expects([200])
                    .throws(ProviderErrorKind::Metadata),
            )
            .await
            .map_err(|e| not_found(e, file_id))?;
        response.json().await
    }

    /// List files in a folder, following pagination.
    pub async fn list_folder(&self, folder_id: &str) -> Result<Vec<DriveFile>> {
        let query = format!("'{}' in parents and trashed = false", escape_query(folder_id));
        let fields = format!("files({}),nextPageToken", FIELDS);
        let mut all_files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("q", query.as_str()),
                ("fields", fields.as_str()),
                ("pageSize", "1000"),
            ];
            if let Some(token) = &page_token {
                params.push(("pageToken", token.as_str()));
            }

            let url = self.executor.build_url(&["files"], &params)?;
            let response = self
                .executor
                .make_request(
                    Method::GET,
                    url,
                    RequestOptions::new()
                        .expects([200])
                        .throws(ProviderErrorKind::Metadata),
                )
                .await
                .map_err(|e| not_found(e, folder_id))?;

            let list: FileListResponse = response.json().await?;
            all_files.extend(list.files);

            match list.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(all_files)
    }

    /// Find a file by name in a folder.
    pub async fn find_file(&self, name: &str, parent_id: &str) -> Result<Option<DriveFile>> {
        let query = format!(
            "name = '{}' and '{}' in parents and trashed = false",
            escape_query(name),
            escape_query(parent_id)
        );
        let fields = format!("files({})", FIELDS);
        let url = self.executor.build_url(
            &["files"],
            &[("q", query.as_str()), ("fields", fields.as_str()), ("pageSize", "1")],
        )?;

        let response = self
            .executor
            .make_request(
                Method::GET,
                url,
                RequestOptions::new()
                    .expects([200])
                    .throws(ProviderErrorKind::Metadata),
            )
            .await?;

        let list: FileListResponse = response.json().await?;
        Ok(list.files.into_iter().next())
    }

    /// Stream file content.
    pub async fn download(&self, file_id: &str) -> Result<ByteStream> {
        let url = self.executor.build_url(&["files", file_id], &[("alt", "media")])?;
        let response = self
            .executor
            .make_request(
                Method::GET,
                url,
                RequestOptions::new()
                    .expects([200])
                    .throws(ProviderErrorKind::Download),
            )
            .await
            .map_err(|e| not_found(e, file_id))?;
        Ok(response.into_stream())
    }

    /// Create a file from a stream with a single multipart request.
    ///
    /// The metadata part is written first and the content is streamed
    /// straight through; nothing is buffered.
    pub async fn upload(&self, name: &str, parent_id: &str, data: ByteStream) -> Result<DriveFile> {
        let url = build_url(
            &self.upload_base,
            &["files"],
            &[("uploadType", "multipart"), ("fields", FIELDS)],
        )?;

        let metadata = serde_json::json!({
            "name": name,
            "parents": [parent_id]
        });
        let boundary = format!("unistore-{}", Uuid::new_v4().simple());
        let head = format!(
            "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{m}\r\n--{b}\r\nContent-Type: application/octet-stream\r\n\r\n",
            b = boundary,
            m = metadata
        );
        let tail = format!("\r\n--{}--", boundary);

        let body: ByteStream = Box::pin(
            stream::iter([Ok(Bytes::from(head))])
                .chain(data)
                .chain(stream::iter([Ok(Bytes::from(tail))])),
        );

        let response = self
            .executor
            .make_request(
                Method::POST,
                url,
                RequestOptions::new()
                    .header("Content-Type", format!("multipart/related; boundary={}", boundary))
                    .body(RequestBody::Stream(body))
                    .expects([200])
                    .throws(ProviderErrorKind::Upload),
            )
            .await?;
        response.json().await
    }

    /// Replace the content of an existing file.
    pub async fn update(&self, file_id: &str, data: ByteStream) -> Result<DriveFile> {
        let url = build_url(
            &self.upload_base,
            &["files", file_id],
            &[("uploadType", "media"), ("fields", FIELDS)],
        )?;

        let response = self
            .executor
            .make_request(
                Method::PATCH,
                url,
                RequestOptions::new()
                    .header("Content-Type", "application/octet-stream")
                    .body(RequestBody::Stream(data))
                    .expects([200])
                    .throws(ProviderErrorKind::Upload),
            )
            .await
            .map_err(|e| not_found(e, file_id))?;
        response.json().await
    }

    pub async fn delete(&self, file_id: &str) -> Result<()> {
        let url = self.executor.build_url(&["files", file_id], &[])?;
        self.executor
            .make_request(
                Method::DELETE,
                url,
                RequestOptions::new()
                    .expects([200, 204])
                    .throws(ProviderErrorKind::Delete),
            )
            .await
            .map_err(|e| not_found(e, file_id))?;
        Ok(())
    }

    /// Server-side copy of a file into `parent_id`.
    pub async fn copy_file(&self, file_id: &str, new_name: &str, parent_id: &str) -> Result<DriveFile> {
        let url = self
            .executor
            .build_url(&["files", file_id, "copy"], &[("fields", FIELDS)])?;

        let response = self
            .executor
            .make_request(
                Method::POST,
                url,
                RequestOptions::new()
                    .json(serde_json::json!({
                        "name": new_name,
                        "parents": [parent_id]
                    }))
                    .expects([200])
                    .throws(ProviderErrorKind::Copy),
            )
            .await
            .map_err(|e| not_found(e, file_id))?;
        response.json().await
    }

    /// Rename and reparent a file in one request.
    pub async fn move_file(
        &self,
        file_id: &str,
        new_name: &str,
        new_parent: &str,
        old_parents: &[String],
    ) -> Result<DriveFile> {
        let remove = old_parents.join(",");
        let mut params = vec![("fields", FIELDS), ("addParents", new_parent)];
        if !remove.is_empty() {
            params.push(("removeParents", remove.as_str()));
        }
        let url = self.executor.build_url(&["files", file_id], &params)?;

        let response = self
            .executor
            .make_request(
                Method::PATCH,
                url,
                RequestOptions::new()
                    .json(serde_json::json!({ "name": new_name }))
                    .expects([200])
                    .throws(ProviderErrorKind::Move),
            )
            .await
            .map_err(|e| not_found(e, file_id))?;
        response.json().await
    }
}
