use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "sharedrop",
    version,
    about = "Archive exported mail into SharePoint drives"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output structured JSON
    #[arg(long, global = true)]
    json: bool,

    /// Site path, e.g. /teams/Engineering (overrides SHAREDROP_SITE_PATH)
    #[arg(long, global = true)]
    site: Option<String>,

    /// Drive name (overrides SHAREDROP_DRIVE_NAME)
    #[arg(long, global = true)]
    drive: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Check whether a folder exists
    Exists { path: String },
    /// Create a folder
    Mkdir(MkdirArgs),
    /// Upload a local file into a remote folder
    Upload(UploadArgs),
    /// Download a remote file
    Download(DownloadArgs),
    /// File an exported message under its sender's folder
    Archive(ArchiveArgs),
    /// Download the sender allow-list and keep it in sync
    WatchSenders,
}

#[derive(Debug, Args)]
struct MkdirArgs {
    path: String,
    /// Create missing parent folders too
    #[arg(long, default_value_t = false)]
    recursive: bool,
}

#[derive(Debug, Args)]
struct UploadArgs {
    file: PathBuf,
    remote_dir: String,
}

#[derive(Debug, Args)]
struct DownloadArgs {
    remote_path: String,
    /// Destination folder (defaults to SHAREDROP_DOWNLOAD_DIR)
    #[arg(long)]
    dest: Option<PathBuf>,
    /// Replace an existing local file
    #[arg(long, default_value_t = false)]
    force: bool,
}

#[derive(Debug, Args)]
struct ArchiveArgs {
    file: PathBuf,
    /// Sender address of the exported message
    #[arg(long)]
    sender: String,
    /// Local allow-list file; the configured remote list is used otherwise
    #[arg(long, env = "SHAREDROP_SENDERS_FILE")]
    senders_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    commands::dispatch(cli).await
}

mod commands {
    use std::path::{Path, PathBuf};

    use anyhow::{anyhow, Context, Result};
    use tokio_util::sync::CancellationToken;
    use tracing::info;

    use sharedrop::archive::{
        allow_list_download, shared_senders, AllowListWatcher, AnySender, ArchiveOptions,
        Archiver, SenderDirectory,
    };
    use sharedrop::config::Config;
    use sharedrop::drive::paths::{normalize_directory, split_parent};
    use sharedrop::drive::{
        DriveClient, ExportedMessage, FileDownloadDescriptor, FileUploadDescriptor,
    };
    use sharedrop::output::{
        self, ExistsReport, FolderReport, OutputFormat, WatchReport,
    };

    use super::{ArchiveArgs, Cli, Commands, DownloadArgs, MkdirArgs, UploadArgs};

    pub async fn dispatch(cli: Cli) -> Result<()> {
        let config = load_config(&cli)?;
        let format = OutputFormat::from_json_flag(cli.json);

        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, cancelling");
                on_signal.cancel();
            }
        });

        let archiver = build_archiver(&config, cancel.clone())?;
        match cli.command {
            Commands::Exists { path } => handle_exists(&archiver, &path, format).await,
            Commands::Mkdir(args) => handle_mkdir(&archiver, args, format).await,
            Commands::Upload(args) => handle_upload(&archiver, args, format).await,
            Commands::Download(args) => handle_download(&archiver, &config, args, format).await,
            Commands::Archive(args) => handle_archive(&archiver, &config, args, format).await,
            Commands::WatchSenders => handle_watch(archiver, &config, cancel, format).await,
        }
    }

    fn load_config(cli: &Cli) -> Result<Config> {
        let mut config = Config::from_env().context("load SHAREDROP_* configuration")?;
        if let Some(site) = &cli.site {
            config.site_path = site.clone();
        }
        if let Some(drive) = &cli.drive {
            config.drive_name = drive.clone();
        }
        Ok(config)
    }

    fn build_archiver(config: &Config, cancel: CancellationToken) -> Result<Archiver> {
        let drive = DriveClient::connect(config)
            .context("build Microsoft Graph client")?
            .with_cancellation(cancel);
        Ok(Archiver::new(
            drive,
            shared_senders(AnySender::new()),
            ArchiveOptions::from_config(config),
        ))
    }

    async fn handle_exists(archiver: &Archiver, path: &str, format: OutputFormat) -> Result<()> {
        let folder = archiver.folder(path)?;
        let exists = archiver
            .folder_exists(&folder)
            .await
            .with_context(|| format!("check folder {path}"))?;
        let report = ExistsReport {
            path: display_path(path),
            exists,
        };
        println!("{}", output::format_exists(format, &report)?);
        Ok(())
    }

    async fn handle_mkdir(archiver: &Archiver, args: MkdirArgs, format: OutputFormat) -> Result<()> {
        let folder = archiver.folder(&args.path)?;
        let created = if args.recursive {
            archiver
                .create_folder_recursively(&folder)
                .await
                .with_context(|| format!("create folder chain {}", args.path))?
        } else {
            archiver
                .create_folder(&folder)
                .await
                .with_context(|| format!("create folder {}", args.path))?;
            vec![display_path(&args.path)]
        };
        let report = FolderReport {
            path: display_path(&args.path),
            created,
        };
        println!("{}", output::format_folder(format, &report)?);
        Ok(())
    }

    async fn handle_upload(archiver: &Archiver, args: UploadArgs, format: OutputFormat) -> Result<()> {
        let (local_directory, file_name) = split_local_file(&args.file)?;
        let upload_directory = normalize_directory(Some(&args.remote_dir))
            .ok_or_else(|| anyhow!("remote directory must name a folder below the drive root"))?;
        let options = archiver.options();
        let upload = FileUploadDescriptor {
            file_name,
            local_directory,
            upload_directory,
            drive_name: options.drive_name.clone(),
            site_path: options.site_path.clone(),
        };

        let report = archiver
            .upload_file(&upload)
            .await
            .with_context(|| format!("upload {}", args.file.display()))?;
        println!("{}", output::format_upload(format, &report)?);
        Ok(())
    }

    async fn handle_download(
        archiver: &Archiver,
        config: &Config,
        args: DownloadArgs,
        format: OutputFormat,
    ) -> Result<()> {
        let (download_path, file_name) = split_parent(&display_path(&args.remote_path))
            .ok_or_else(|| anyhow!("'{}' does not name a file", args.remote_path))?;
        let options = archiver.options();
        let download = FileDownloadDescriptor {
            file_name,
            destination_file_name: None,
            destination_folder: args.dest.unwrap_or_else(|| config.download_dir.clone()),
            download_path,
            drive_name: options.drive_name.clone(),
            site_path: options.site_path.clone(),
            always_download: args.force,
        };

        let report = archiver
            .download_file(&download)
            .await
            .with_context(|| format!("download {}", args.remote_path))?;
        println!("{}", output::format_download(format, &report)?);
        Ok(())
    }

    async fn handle_archive(
        archiver: &Archiver,
        config: &Config,
        args: ArchiveArgs,
        format: OutputFormat,
    ) -> Result<()> {
        if let Some(path) = &args.senders_file {
            let senders = SenderDirectory::read(path)
                .await
                .with_context(|| format!("load allowed senders from {}", path.display()))?;
            *archiver
                .senders()
                .write()
                .map_err(|_| anyhow!("allowed senders lock poisoned"))? = Box::new(senders);
        } else if let Some(location) = &config.allowed_senders {
            let download = allow_list_download(
                location,
                config.download_dir.clone(),
                &config.copied_file_suffix,
            );
            AllowListWatcher::new(archiver.clone(), download)
                .check()
                .await
                .context("download allowed senders list")?;
        }

        let (file_directory, file_name) = split_local_file(&args.file)?;
        let export = ExportedMessage {
            file_name,
            file_directory,
            sender_address: args.sender.clone(),
        };
        let report = archiver
            .archive_export(&export)
            .await
            .with_context(|| format!("archive {} from {}", args.file.display(), args.sender))?;
        println!("{}", output::format_archive(format, &report)?);
        Ok(())
    }

    async fn handle_watch(
        archiver: Archiver,
        config: &Config,
        cancel: CancellationToken,
        format: OutputFormat,
    ) -> Result<()> {
        let location = config
            .allowed_senders
            .as_ref()
            .ok_or_else(|| anyhow!("SHAREDROP_ALLOWED_SENDERS_FILE is not set"))?;
        let download =
            allow_list_download(location, config.download_dir.clone(), &config.copied_file_suffix);
        let local_path = download.destination_path();
        let mut watcher = AllowListWatcher::new(archiver, download);

        let outcome = watcher
            .check()
            .await
            .context("download allowed senders list")?;
        let report = WatchReport {
            file: location.file_name.clone(),
            outcome,
            last_modified: watcher.last_seen().and_then(|info| info.last_modified_date_time),
            local_path: Some(local_path),
        };
        println!("{}", output::format_watch(format, &report)?);

        info!(
            interval_secs = config.poll_interval.as_secs(),
            "watching allowed senders list"
        );
        watcher.run(config.poll_interval, cancel).await;
        Ok(())
    }

    fn split_local_file(path: &Path) -> Result<(PathBuf, String)> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("'{}' is not a file path", path.display()))?
            .to_string();
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Ok((directory, file_name))
    }

    fn display_path(path: &str) -> String {
        normalize_directory(Some(path)).unwrap_or_else(|| "/".to_string())
    }
}
