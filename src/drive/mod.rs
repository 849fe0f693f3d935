//! Name-to-id resolution and content transfer against a SharePoint drive.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::graph::client::with_select;
use crate::graph::models::{Drive, DriveItem, FileModificationInfo, NewFolder};
use crate::graph::{
    AuthMiddleware, Authenticator, Clock, GraphError, GraphHttpClient, GraphResult,
    LoggingMiddleware, Pipeline, ReqwestTransport, SystemClock, Transport,
};

pub mod descriptors;
pub mod paths;

pub use descriptors::{
    ExportedMessage, FileDownloadDescriptor, FileModificationRequest, FileUploadDescriptor,
    FolderDescriptor,
};

use paths::{encode_path, format_path, join_path, normalize_directory, segments};

/// Largest file sent with a single PUT. Bigger files need an upload session.
pub const SIMPLE_UPLOAD_LIMIT_BYTES: u64 = 250 * 1024 * 1024;

#[derive(Clone)]
pub struct DriveClient {
    http: GraphHttpClient,
    hostname: String,
}

impl DriveClient {
    pub fn new(http: GraphHttpClient, hostname: impl Into<String>) -> Self {
        Self {
            http,
            hostname: hostname.into(),
        }
    }

    /// Client over the network transport with the configured timeout.
    pub fn connect(config: &Config) -> GraphResult<Self> {
        let transport = Arc::new(ReqwestTransport::new(config.request_timeout)?);
        Self::connect_with(config, transport, Arc::new(SystemClock))
    }

    /// Wires authenticator and middleware over `transport`. Auth runs first so
    /// the request logger sees the final outbound request.
    pub fn connect_with(
        config: &Config,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> GraphResult<Self> {
        let authenticator = Authenticator::with_token_url(
            transport.clone(),
            config.credentials.clone(),
            clock,
            &config.token_url(),
        )?;
        let pipeline = Pipeline::new(transport)
            .with(AuthMiddleware::new(Arc::new(authenticator)))
            .with(LoggingMiddleware::new(
                config.request_logging,
                config.separate_request_log,
            ));
        let http = GraphHttpClient::new(Arc::new(pipeline), config.graph_api_base.clone());
        Ok(Self::new(http, config.hostname.clone()))
    }

    pub fn http(&self) -> &GraphHttpClient {
        &self.http
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn with_cancellation(&self, cancel: CancellationToken) -> Self {
        Self {
            http: self.http.with_cancellation(cancel),
            hostname: self.hostname.clone(),
        }
    }

    pub async fn site_id(&self, site_path: &str) -> GraphResult<String> {
        let endpoint = match normalize_directory(Some(site_path)) {
            Some(path) => format!("/sites/{}:{}", self.hostname, encode_path(&path)),
            None => format!("/sites/{}", self.hostname),
        };
        match self.http.get_field(&endpoint, "id").await {
            Err(GraphError::FieldNotFound(_)) => Err(GraphError::AppDataNotFound(format!(
                "site '{site_path}' on {}",
                self.hostname
            ))),
            other => other,
        }
    }

    pub async fn find_drive_id(
        &self,
        drive_name: &str,
        site_path: &str,
    ) -> GraphResult<Option<String>> {
        let site_id = self.site_id(site_path).await?;
        let drives: Vec<Drive> = self
            .http
            .get_paginated(&format!("/sites/{site_id}/drives"), &["id", "name"])
            .await?;
        Ok(drives
            .into_iter()
            .find(|drive| drive.name == drive_name)
            .map(|drive| drive.id))
    }

    pub async fn drive_id(&self, drive_name: &str, site_path: &str) -> GraphResult<String> {
        self.find_drive_id(drive_name, site_path)
            .await?
            .ok_or_else(|| {
                error!(drive_name, site_path, "drive was not found");
                GraphError::AppDataNotFound(format!("drive '{drive_name}' in site '{site_path}'"))
            })
    }

    pub async fn list_children(
        &self,
        drive_id: &str,
        path: Option<&str>,
    ) -> GraphResult<Vec<DriveItem>> {
        let endpoint = format!("/drives/{drive_id}/{}/children", format_path(path));
        self.http.get_paginated(&endpoint, &["name", "id"]).await
    }

    pub async fn find_item_id(
        &self,
        drive_id: &str,
        item_name: &str,
        path: Option<&str>,
    ) -> GraphResult<Option<String>> {
        Ok(self
            .list_children(drive_id, path)
            .await?
            .into_iter()
            .find(|item| item.name == item_name)
            .map(|item| item.id))
    }

    pub async fn item_id(
        &self,
        drive_id: &str,
        item_name: &str,
        path: Option<&str>,
    ) -> GraphResult<String> {
        self.find_item_id(drive_id, item_name, path)
            .await?
            .ok_or_else(|| {
                let location = normalize_directory(path).unwrap_or_else(|| "/".to_string());
                error!(item_name, location, "item was not found");
                GraphError::AppDataNotFound(format!("item '{item_name}' in '{location}'"))
            })
    }

    pub async fn folder_exists(
        &self,
        folder: &FolderDescriptor,
        drive_id: &str,
    ) -> GraphResult<bool> {
        let path = join_path(folder.directory.as_deref(), &folder.name);
        self.http
            .is_successful(&format!("/drives/{drive_id}/{}", format_path(Some(&path))))
            .await
    }

    pub async fn create_folder(
        &self,
        folder: &FolderDescriptor,
        drive_id: &str,
    ) -> GraphResult<String> {
        let endpoint = format!(
            "/drives/{drive_id}/{}/children",
            format_path(folder.directory.as_deref())
        );
        let response = self
            .http
            .post_json(&endpoint, &NewFolder::new(&folder.name))
            .await?;
        info!(
            folder = %join_path(folder.directory.as_deref(), &folder.name),
            "folder created"
        );
        Ok(response)
    }

    /// Walks `directory/name` root to leaf, checking every level and creating
    /// the missing ones in order. Returns the paths that were created.
    ///
    /// A `409 Conflict` on create means another caller made the folder
    /// between the existence check and the POST; that level counts as existing.
    pub async fn create_folder_recursively(
        &self,
        folder: &FolderDescriptor,
        drive_id: &str,
    ) -> GraphResult<Vec<String>> {
        let mut chain = segments(folder.directory.as_deref());
        chain.extend(segments(Some(&folder.name)));

        let mut parent: Option<String> = None;
        let mut created = Vec::new();
        for name in chain {
            let step = FolderDescriptor {
                name: name.clone(),
                directory: parent.clone(),
                ..folder.clone()
            };
            let path = join_path(parent.as_deref(), &name);

            if self.folder_exists(&step, drive_id).await? {
                debug!(folder = %path, "folder already exists");
            } else {
                debug!(folder = %path, "folder does not exist, creating");
                match self.create_folder(&step, drive_id).await {
                    Ok(_) => created.push(path.clone()),
                    Err(GraphError::RequestFailed { status: 409, .. }) => {
                        debug!(folder = %path, "folder was created concurrently");
                    }
                    Err(err) => return Err(err),
                }
            }
            parent = Some(path);
        }
        Ok(created)
    }

    /// Single-request upload into the folder `parent_id`.
    pub async fn upload_file(
        &self,
        upload: &FileUploadDescriptor,
        drive_id: &str,
        parent_id: &str,
    ) -> GraphResult<String> {
        let local_path = upload.local_path();
        let size = tokio::fs::metadata(&local_path)
            .await
            .inspect_err(|err| error!(path = %local_path.display(), %err, "cannot stat upload"))?
            .len();
        if size > SIMPLE_UPLOAD_LIMIT_BYTES {
            error!(
                path = %local_path.display(),
                size,
                limit = SIMPLE_UPLOAD_LIMIT_BYTES,
                "file is too large for a simple upload"
            );
            return Err(GraphError::UploadTooLarge {
                path: local_path.display().to_string(),
                size,
                limit: SIMPLE_UPLOAD_LIMIT_BYTES,
            });
        }

        let content = tokio::fs::read(&local_path).await?;
        let endpoint = format!(
            "/drives/{drive_id}/items/{parent_id}:/{}:/content",
            urlencoding::encode(&upload.file_name)
        );
        let response = self.http.put_bytes(&endpoint, content).await?;
        info!(
            file = %upload.file_name,
            directory = %upload.upload_directory,
            size,
            "file uploaded"
        );
        Ok(response)
    }

    /// Streams the item's content into `destination`, replacing any existing
    /// file. A partially written file is removed on failure.
    pub async fn download_file(
        &self,
        download: &FileDownloadDescriptor,
        destination: &Path,
        drive_id: &str,
        item_id: &str,
    ) -> GraphResult<u64> {
        let stream = self
            .http
            .get_stream(&format!("/drives/{drive_id}/items/{item_id}/content"))
            .await?;

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = File::create(destination).await?;

        match write_stream(stream, &mut file, self.http.cancellation()).await {
            Ok(written) => {
                info!(
                    file = %download.file_name,
                    destination = %destination.display(),
                    bytes = written,
                    "file downloaded"
                );
                Ok(written)
            }
            Err(err) => {
                error!(destination = %destination.display(), %err, "download failed");
                drop(file);
                if let Err(remove_err) = tokio::fs::remove_file(destination).await {
                    debug!(%remove_err, "cannot remove partial download");
                }
                Err(err)
            }
        }
    }

    pub async fn file_modification_info(
        &self,
        request: &FileModificationRequest,
    ) -> GraphResult<FileModificationInfo> {
        let drive_id = self
            .drive_id(&request.drive_name, &request.site_path)
            .await?;
        let item_id = self
            .item_id(&drive_id, &request.file_name, request.directory.as_deref())
            .await?;
        self.http
            .get_json(&with_select(
                &format!("/drives/{drive_id}/items/{item_id}"),
                &["id", "name", "lastModifiedDateTime", "size"],
            ))
            .await
    }
}

async fn write_stream(
    mut stream: BoxStream<'static, GraphResult<Bytes>>,
    file: &mut File,
    cancel: &CancellationToken,
) -> GraphResult<u64> {
    let mut written = 0u64;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GraphError::Cancelled),
            next = stream.next() => next,
        };
        let Some(chunk) = next else {
            break;
        };
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}
