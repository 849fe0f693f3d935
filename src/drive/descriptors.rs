use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A folder to check or create. `directory` is `None` for folders directly
/// under the drive root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderDescriptor {
    pub name: String,
    pub directory: Option<String>,
    pub drive_name: String,
    pub site_path: String,
}

impl FolderDescriptor {
    pub fn new(
        name: impl Into<String>,
        directory: Option<String>,
        drive_name: impl Into<String>,
        site_path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            directory,
            drive_name: drive_name.into(),
            site_path: site_path.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUploadDescriptor {
    pub file_name: String,
    pub local_directory: PathBuf,
    /// Remote folder the file lands in, e.g. `/ClientA/Emails`.
    pub upload_directory: String,
    pub drive_name: String,
    pub site_path: String,
}

impl FileUploadDescriptor {
    pub fn local_path(&self) -> PathBuf {
        self.local_directory.join(&self.file_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDownloadDescriptor {
    pub file_name: String,
    pub destination_file_name: Option<String>,
    pub destination_folder: PathBuf,
    /// Remote folder holding the file; `None` for the drive root.
    pub download_path: Option<String>,
    pub drive_name: String,
    pub site_path: String,
    pub always_download: bool,
}

impl FileDownloadDescriptor {
    pub fn destination_path(&self) -> PathBuf {
        self.destination_folder.join(
            self.destination_file_name
                .as_deref()
                .unwrap_or(&self.file_name),
        )
    }

    pub fn modification_request(&self) -> FileModificationRequest {
        FileModificationRequest {
            file_name: self.file_name.clone(),
            directory: self.download_path.clone(),
            drive_name: self.drive_name.clone(),
            site_path: self.site_path.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileModificationRequest {
    pub file_name: String,
    pub directory: Option<String>,
    pub drive_name: String,
    pub site_path: String,
}

/// A message already exported to a local document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedMessage {
    pub file_name: String,
    pub file_directory: PathBuf,
    pub sender_address: String,
}
