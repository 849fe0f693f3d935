use thiserror::Error;

pub mod auth;
pub mod client;
pub mod models;
pub mod pipeline;

pub use auth::{AccessToken, Authenticator, Clock, Credentials, ManualClock, SystemClock, TokenCache};
pub use client::GraphHttpClient;
pub use pipeline::{
    AuthMiddleware, GraphRequest, GraphResponse, LoggingMiddleware, Middleware, Next, Pipeline,
    ReqwestTransport, Transport,
};

pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";
pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

pub type GraphResult<T> = Result<T, GraphError>;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("request {method} {endpoint} failed with status code {status}. Reason: {reason}")]
    RequestFailed {
        method: String,
        endpoint: String,
        status: u16,
        reason: String,
    },

    #[error("{0} was not found")]
    AppDataNotFound(String),

    #[error("key '{0}' was not found in the response")]
    FieldNotFound(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("{path} is {size} bytes, above the {limit} byte simple upload limit")]
    UploadTooLarge { path: String, size: u64, limit: u64 },

    #[error("request cancelled")]
    Cancelled,

    #[error("{0}")]
    Config(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("json serialization: {0}")]
    Json(#[from] serde_json::Error),

    #[error("filesystem: {0}")]
    Io(#[from] std::io::Error),

    #[error("allow-list: {0}")]
    AllowList(#[from] csv::Error),
}

impl GraphError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::AppDataNotFound(_))
    }
}
