pub mod json;
pub mod table;

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::archive::{ArchiveReport, DownloadReport, UploadReport, WatchOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Table
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExistsReport {
    pub path: String,
    pub exists: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FolderReport {
    pub path: String,
    /// Folders created by this call, root first.
    pub created: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchReport {
    pub file: String,
    pub outcome: WatchOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

pub fn format_exists(format: OutputFormat, report: &ExistsReport) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_exists(report)),
        OutputFormat::Json => json::format_report(report),
    }
}

pub fn format_folder(format: OutputFormat, report: &FolderReport) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_folder(report)),
        OutputFormat::Json => json::format_report(report),
    }
}

pub fn format_upload(format: OutputFormat, report: &UploadReport) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_upload(report)),
        OutputFormat::Json => json::format_report(report),
    }
}

pub fn format_download(format: OutputFormat, report: &DownloadReport) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_download(report)),
        OutputFormat::Json => json::format_report(report),
    }
}

pub fn format_archive(format: OutputFormat, report: &ArchiveReport) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_archive(report)),
        OutputFormat::Json => json::format_report(report),
    }
}

pub fn format_watch(format: OutputFormat, report: &WatchReport) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_watch(report)),
        OutputFormat::Json => json::format_report(report),
    }
}
