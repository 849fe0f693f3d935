//! Environment-sourced settings.
//!
//! Every key is read as `SHAREDROP_<NAME>`. Blank values count as unset.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::graph::{Credentials, GraphError, GraphResult, GRAPH_API_BASE, GRAPH_SCOPE};

pub const ENV_PREFIX: &str = "SHAREDROP_";

const DEFAULT_DRIVE_NAME: &str = "Documents";
const DEFAULT_SITE_PATH: &str = "/";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_EMAILS_FOLDER_NAME: &str = "Emails";
const DEFAULT_COPIED_FILE_SUFFIX: &str = " (Copy)";

/// Where the sender allow-list lives in the drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowListLocation {
    pub file_name: String,
    pub directory: Option<String>,
    pub site_path: String,
    pub drive_name: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,
    pub hostname: String,
    pub graph_api_base: String,
    pub token_url: Option<String>,
    pub drive_name: String,
    pub site_path: String,
    pub request_timeout: Duration,
    pub request_logging: bool,
    pub separate_request_log: bool,
    pub emails_folder_name: String,
    pub copied_file_suffix: String,
    pub overwrite_downloads: bool,
    pub log_graph_responses: bool,
    pub poll_interval: Duration,
    pub allowed_senders: Option<AllowListLocation>,
    pub download_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> GraphResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup; keys are passed with
    /// the `SHAREDROP_` prefix.
    pub fn from_lookup<F>(lookup: F) -> GraphResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let credentials = Credentials::new(
            env.required("TENANT_ID")?,
            env.required("CLIENT_ID")?,
            env.required("CLIENT_SECRET")?,
        )
        .with_scope(env.optional("SCOPE").unwrap_or_else(|| GRAPH_SCOPE.to_string()));

        let drive_name = env
            .optional("DRIVE_NAME")
            .unwrap_or_else(|| DEFAULT_DRIVE_NAME.to_string());
        let site_path = env
            .optional("SITE_PATH")
            .unwrap_or_else(|| DEFAULT_SITE_PATH.to_string());

        let allowed_senders = env
            .optional("ALLOWED_SENDERS_FILE")
            .map(|file_name| AllowListLocation {
                file_name,
                directory: env.optional("ALLOWED_SENDERS_DIRECTORY"),
                site_path: env
                    .optional("ALLOWED_SENDERS_SITE_PATH")
                    .unwrap_or_else(|| site_path.clone()),
                drive_name: env
                    .optional("ALLOWED_SENDERS_DRIVE_NAME")
                    .unwrap_or_else(|| drive_name.clone()),
            });

        let download_dir = match env.optional("DOWNLOAD_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::download_dir()
                .or_else(dirs::home_dir)
                .unwrap_or_else(std::env::temp_dir),
        };

        Ok(Self {
            credentials,
            hostname: env.required("HOSTNAME")?,
            graph_api_base: env
                .optional("GRAPH_API_BASE")
                .unwrap_or_else(|| GRAPH_API_BASE.to_string()),
            token_url: env.optional("GRAPH_TOKEN_URL"),
            drive_name,
            site_path,
            request_timeout: Duration::from_secs(
                env.parsed("REQUEST_TIMEOUT_SECS")?
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            request_logging: env.flag("REQUEST_LOGGING")?.unwrap_or(true),
            separate_request_log: env.flag("SEPARATE_REQUEST_LOG")?.unwrap_or(false),
            emails_folder_name: env
                .optional("EMAILS_FOLDER_NAME")
                .unwrap_or_else(|| DEFAULT_EMAILS_FOLDER_NAME.to_string()),
            copied_file_suffix: env
                .raw("COPIED_FILE_SUFFIX")
                .unwrap_or_else(|| DEFAULT_COPIED_FILE_SUFFIX.to_string()),
            overwrite_downloads: env.flag("OVERWRITE_DOWNLOADS")?.unwrap_or(false),
            log_graph_responses: env.flag("LOG_GRAPH_RESPONSES")?.unwrap_or(false),
            poll_interval: Duration::from_secs(
                env.parsed("POLL_INTERVAL_SECS")?
                    .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            ),
            allowed_senders,
            download_dir,
        })
    }

    pub fn token_url(&self) -> String {
        self.token_url
            .clone()
            .unwrap_or_else(|| self.credentials.default_token_url())
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn key(name: &str) -> String {
        format!("{ENV_PREFIX}{name}")
    }

    /// Untrimmed value; only an entirely empty string counts as unset.
    fn raw(&self, name: &str) -> Option<String> {
        (self.lookup)(&Self::key(name)).filter(|value| !value.is_empty())
    }

    fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(&Self::key(name))
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, name: &str) -> GraphResult<String> {
        self.optional(name).ok_or_else(|| {
            GraphError::Config(format!("missing required setting {}", Self::key(name)))
        })
    }

    fn parsed<T: FromStr>(&self, name: &str) -> GraphResult<Option<T>> {
        self.optional(name)
            .map(|value| {
                value.parse::<T>().map_err(|_| {
                    GraphError::Config(format!("{} has invalid value '{value}'", Self::key(name)))
                })
            })
            .transpose()
    }

    fn flag(&self, name: &str) -> GraphResult<Option<bool>> {
        self.optional(name)
            .map(|value| match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(GraphError::Config(format!(
                    "{} must be a boolean, got '{value}'",
                    Self::key(name)
                ))),
            })
            .transpose()
    }
}
