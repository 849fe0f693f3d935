//! Descriptor-level operations: every call resolves its drive by name, then
//! delegates to [`DriveClient`].

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{AllowListLocation, Config};
use crate::drive::paths::{file_name_with_suffix, split_parent};
use crate::drive::{
    DriveClient, ExportedMessage, FileDownloadDescriptor, FileUploadDescriptor, FolderDescriptor,
};
use crate::graph::{GraphError, GraphResult};

pub mod senders;
pub mod watcher;

pub use senders::{AllowedSenders, AnySender, SenderDirectory};
pub use watcher::{AllowListWatcher, WatchOutcome};

/// Allow-list shared between the archiver and the watcher that refreshes it.
pub type SharedSenders = Arc<RwLock<Box<dyn AllowedSenders>>>;

pub fn shared_senders(senders: impl AllowedSenders + 'static) -> SharedSenders {
    let senders: Box<dyn AllowedSenders> = Box::new(senders);
    Arc::new(RwLock::new(senders))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveOptions {
    pub drive_name: String,
    pub site_path: String,
    pub emails_folder_name: String,
    pub overwrite_downloads: bool,
    pub log_graph_responses: bool,
}

impl ArchiveOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            drive_name: config.drive_name.clone(),
            site_path: config.site_path.clone(),
            emails_folder_name: config.emails_folder_name.clone(),
            overwrite_downloads: config.overwrite_downloads,
            log_graph_responses: config.log_graph_responses,
        }
    }
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            drive_name: "Documents".to_string(),
            site_path: "/".to_string(),
            emails_folder_name: "Emails".to_string(),
            overwrite_downloads: false,
            log_graph_responses: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub file_name: String,
    pub upload_directory: String,
    pub created_folders: Vec<String>,
    pub item_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadReport {
    pub path: PathBuf,
    pub skipped: bool,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveReport {
    pub sender: String,
    pub sender_folder: String,
    #[serde(flatten)]
    pub upload: UploadReport,
}

#[derive(Clone)]
pub struct Archiver {
    drive: DriveClient,
    senders: SharedSenders,
    options: ArchiveOptions,
}

impl Archiver {
    pub fn new(drive: DriveClient, senders: SharedSenders, options: ArchiveOptions) -> Self {
        Self {
            drive,
            senders,
            options,
        }
    }

    pub fn drive(&self) -> &DriveClient {
        &self.drive
    }

    pub fn senders(&self) -> &SharedSenders {
        &self.senders
    }

    pub fn options(&self) -> &ArchiveOptions {
        &self.options
    }

    /// Folder descriptor on the default drive for a `/a/b` style path.
    pub fn folder(&self, path: &str) -> GraphResult<FolderDescriptor> {
        let (directory, name) = split_parent(&format!("/{}", path.trim().trim_start_matches('/')))
            .ok_or_else(|| GraphError::Config(format!("'{path}' does not name a folder")))?;
        Ok(FolderDescriptor::new(
            name,
            directory,
            self.options.drive_name.clone(),
            self.options.site_path.clone(),
        ))
    }

    pub async fn folder_exists(&self, folder: &FolderDescriptor) -> GraphResult<bool> {
        let drive_id = self
            .drive
            .drive_id(&folder.drive_name, &folder.site_path)
            .await?;
        self.drive.folder_exists(folder, &drive_id).await
    }

    pub async fn create_folder(&self, folder: &FolderDescriptor) -> GraphResult<String> {
        let drive_id = self
            .drive
            .drive_id(&folder.drive_name, &folder.site_path)
            .await?;
        let response = self.drive.create_folder(folder, &drive_id).await?;
        self.log_response("create folder", &response);
        Ok(response)
    }

    pub async fn create_folder_recursively(
        &self,
        folder: &FolderDescriptor,
    ) -> GraphResult<Vec<String>> {
        let drive_id = self
            .drive
            .drive_id(&folder.drive_name, &folder.site_path)
            .await?;
        self.drive.create_folder_recursively(folder, &drive_id).await
    }

    /// Uploads into `upload_directory`, creating any missing folders on the
    /// way.
    pub async fn upload_file(&self, upload: &FileUploadDescriptor) -> GraphResult<UploadReport> {
        let (parent_directory, parent_name) = split_parent(&upload.upload_directory)
            .ok_or_else(|| {
                GraphError::Config(format!(
                    "upload directory '{}' must be a '/' separated path",
                    upload.upload_directory
                ))
            })?;

        let drive_id = self
            .drive
            .drive_id(&upload.drive_name, &upload.site_path)
            .await?;
        let parent = FolderDescriptor::new(
            parent_name.clone(),
            parent_directory.clone(),
            upload.drive_name.clone(),
            upload.site_path.clone(),
        );
        let created_folders = self
            .drive
            .create_folder_recursively(&parent, &drive_id)
            .await?;
        let parent_id = self
            .drive
            .item_id(&drive_id, &parent_name, parent_directory.as_deref())
            .await?;

        let response = self.drive.upload_file(upload, &drive_id, &parent_id).await?;
        self.log_response("upload", &response);

        Ok(UploadReport {
            file_name: upload.file_name.clone(),
            upload_directory: upload.upload_directory.clone(),
            created_folders,
            item_id: response_field(&response, "id"),
        })
    }

    /// Existing destinations are kept unless the descriptor or the options ask
    /// for a fresh copy.
    pub async fn download_file(
        &self,
        download: &FileDownloadDescriptor,
    ) -> GraphResult<DownloadReport> {
        let path = download.destination_path();
        let exists = tokio::fs::try_exists(&path).await?;
        if exists && !download.always_download && !self.options.overwrite_downloads {
            info!(path = %path.display(), "destination exists, skipping download");
            return Ok(DownloadReport {
                path,
                skipped: true,
                bytes: 0,
            });
        }

        let drive_id = self
            .drive
            .drive_id(&download.drive_name, &download.site_path)
            .await?;
        let item_id = self
            .drive
            .item_id(&drive_id, &download.file_name, download.download_path.as_deref())
            .await?;
        let bytes = self
            .drive
            .download_file(download, &path, &drive_id, &item_id)
            .await?;

        Ok(DownloadReport {
            path,
            skipped: false,
            bytes,
        })
    }

    /// Files an exported message under `/<sender folder>/<emails folder>`.
    pub async fn archive_export(&self, export: &ExportedMessage) -> GraphResult<ArchiveReport> {
        let sender_folder = {
            let senders = self.senders.read().unwrap_or_else(PoisonError::into_inner);
            senders.sender_folder(&export.sender_address)
        };
        let Some(sender_folder) = sender_folder else {
            warn!(sender = %export.sender_address, "sender is not on the allow-list");
            return Err(GraphError::AppDataNotFound(format!(
                "sender '{}' in the allowed senders list",
                export.sender_address
            )));
        };

        let upload = FileUploadDescriptor {
            file_name: export.file_name.clone(),
            local_directory: export.file_directory.clone(),
            upload_directory: format!(
                "/{}/{}",
                sender_folder.trim_matches('/'),
                self.options.emails_folder_name.trim_matches('/')
            ),
            drive_name: self.options.drive_name.clone(),
            site_path: self.options.site_path.clone(),
        };
        debug!(
            sender = %export.sender_address,
            directory = %upload.upload_directory,
            "archiving exported message"
        );
        let upload = self.upload_file(&upload).await?;

        Ok(ArchiveReport {
            sender: export.sender_address.clone(),
            sender_folder,
            upload,
        })
    }

    fn log_response(&self, operation: &str, body: &str) {
        if !self.options.log_graph_responses {
            return;
        }
        match serde_json::from_str::<Value>(body) {
            Ok(json) => {
                let pretty = serde_json::to_string_pretty(&json).unwrap_or_else(|_| body.to_string());
                info!(operation, response = %pretty, "graph response");
            }
            Err(_) => info!(operation, response = body, "graph response"),
        }
    }
}

/// Download descriptor for the allow-list file, saved under a suffixed name
/// so an open copy is never overwritten in place.
pub fn allow_list_download(
    location: &AllowListLocation,
    download_dir: PathBuf,
    copied_file_suffix: &str,
) -> FileDownloadDescriptor {
    FileDownloadDescriptor {
        file_name: location.file_name.clone(),
        destination_file_name: Some(file_name_with_suffix(
            &location.file_name,
            copied_file_suffix,
        )),
        destination_folder: download_dir,
        download_path: location.directory.clone(),
        drive_name: location.drive_name.clone(),
        site_path: location.site_path.clone(),
        always_download: true,
    }
}

fn response_field(body: &str, key: &str) -> Option<String> {
    serde_json::from_str::<Value>(body)
        .ok()?
        .get(key)?
        .as_str()
        .map(str::to_string)
}
