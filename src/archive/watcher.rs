use std::sync::PoisonError;
use std::time::Duration;

use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::archive::senders::SenderDirectory;
use crate::archive::Archiver;
use crate::drive::FileDownloadDescriptor;
use crate::graph::models::FileModificationInfo;
use crate::graph::{GraphError, GraphResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchOutcome {
    Changed,
    Unchanged,
}

/// Keeps the local allow-list in step with its copy in the drive.
pub struct AllowListWatcher {
    archiver: Archiver,
    download: FileDownloadDescriptor,
    last_seen: Option<FileModificationInfo>,
}

impl AllowListWatcher {
    pub fn new(archiver: Archiver, download: FileDownloadDescriptor) -> Self {
        Self {
            archiver,
            download: FileDownloadDescriptor {
                always_download: true,
                ..download
            },
            last_seen: None,
        }
    }

    pub fn last_seen(&self) -> Option<&FileModificationInfo> {
        self.last_seen.as_ref()
    }

    /// Records the current remote state without downloading.
    pub async fn prime(&mut self) -> GraphResult<FileModificationInfo> {
        let info = self.current_info().await?;
        self.last_seen = Some(info.clone());
        Ok(info)
    }

    /// Downloads and reloads the allow-list when any field of the remote
    /// modification info changed since the last check. The first check
    /// always downloads.
    pub async fn check(&mut self) -> GraphResult<WatchOutcome> {
        let info = self.current_info().await?;
        if self.last_seen.as_ref() == Some(&info) {
            return Ok(WatchOutcome::Unchanged);
        }

        let report = self.archiver.download_file(&self.download).await?;
        let senders = SenderDirectory::read(&report.path).await?;
        {
            let mut shared = self
                .archiver
                .senders()
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            *shared = Box::new(senders);
        }
        info!(
            file = %self.download.file_name,
            modified = ?info.last_modified_date_time,
            "allow-list changed, reloaded senders"
        );
        self.last_seen = Some(info);
        Ok(WatchOutcome::Changed)
    }

    /// Polls until `cancel` fires. Failed checks are logged and retried on
    /// the next tick.
    pub async fn run(&mut self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.check().await {
                Ok(WatchOutcome::Changed) => {}
                Ok(WatchOutcome::Unchanged) => debug!("allow-list unchanged"),
                Err(GraphError::Cancelled) => break,
                Err(err) => warn!(%err, "allow-list check failed"),
            }
        }
        info!("allow-list watcher stopped");
    }

    async fn current_info(&self) -> GraphResult<FileModificationInfo> {
        let info = self
            .archiver
            .drive()
            .file_modification_info(&self.download.modification_request())
            .await?;
        if info.last_modified_date_time.is_none() {
            warn!(file = %self.download.file_name, "response has no lastModifiedDateTime");
            return Err(GraphError::MalformedResponse(
                "the attribute 'lastModifiedDateTime' was not found in the response".to_string(),
            ));
        }
        Ok(info)
    }
}
