#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{TimeZone, Utc};
use reqwest::StatusCode;
use serde_json::{json, Value};

use sharedrop::archive::{shared_senders, ArchiveOptions, Archiver, SenderDirectory};
use sharedrop::config::Config;
use sharedrop::drive::DriveClient;
use sharedrop::graph::{GraphRequest, GraphResponse, GraphResult, ManualClock, Transport};

pub const TOKEN_URL: &str = "https://login.test/tenant-a/oauth2/v2.0/token";
pub const API_BASE: &str = "https://graph.test/v1.0";
pub const HOSTNAME: &str = "contoso.test";
pub const SITE_PATH: &str = "/teams/Eng";
pub const DRIVE_ID: &str = "d-docs";

#[derive(Debug, Clone)]
pub struct Seen {
    pub method: String,
    pub host: String,
    pub target: String,
    pub bearer: Option<String>,
}

#[derive(Debug, Clone)]
struct Item {
    id: String,
    parent: String,
    name: String,
    content: Option<Vec<u8>>,
}

#[derive(Default)]
struct DriveState {
    items: BTreeMap<String, Item>,
    next_id: usize,
    tokens_issued: usize,
}

/// In-memory Graph endpoint: one site with a `Documents` and a `Shared`
/// drive, a token endpoint, and a mutable folder tree in `Documents`.
#[derive(Default)]
pub struct FakeGraph {
    state: Mutex<DriveState>,
    seen: Mutex<Vec<Seen>>,
}

impl FakeGraph {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().expect("lock seen").clone()
    }

    pub fn token_requests(&self) -> usize {
        self.seen()
            .iter()
            .filter(|seen| seen.method == "POST" && seen.host == "login.test")
            .count()
    }

    /// Graph calls in order, formatted as `METHOD target`.
    pub fn graph_calls(&self) -> Vec<String> {
        self.seen()
            .iter()
            .filter(|seen| seen.host == "graph.test")
            .map(|seen| format!("{} {}", seen.method, seen.target))
            .collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.seen()
            .iter()
            .filter(|seen| seen.host == "graph.test" && seen.method == method)
            .count()
    }

    pub fn add_folder(&self, path: &str) -> String {
        let mut state = self.state.lock().expect("lock state");
        let (parent, name) = split(path);
        insert(&mut state, &parent, &name, None)
    }

    pub fn add_file(&self, path: &str, content: &[u8]) -> String {
        let mut state = self.state.lock().expect("lock state");
        let (parent, name) = split(path);
        insert(&mut state, &parent, &name, Some(content.to_vec()))
    }

    pub fn file_content(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().expect("lock state");
        state.items.get(path).and_then(|item| item.content.clone())
    }

    pub fn has(&self, path: &str) -> bool {
        self.state.lock().expect("lock state").items.contains_key(path)
    }

    fn issue_token(&self) -> GraphResponse {
        let mut state = self.state.lock().expect("lock state");
        state.tokens_issued += 1;
        let token = jwt(json!({
            "nbf": 1_700_000_000,
            "exp": 1_700_000_600,
            "roles": ["Sites.ReadWrite.All"],
            "seq": state.tokens_issued,
        }));
        respond(StatusCode::OK, json!({ "access_token": token, "token_type": "Bearer" }))
    }

    fn handle_graph(&self, request: &GraphRequest) -> GraphResponse {
        let path = urlencoding::decode(request.url.path())
            .map(|path| path.into_owned())
            .unwrap_or_else(|_| request.url.path().to_string());
        let path = path.strip_prefix("/v1.0").unwrap_or(&path).to_string();
        let method = request.method.as_str();

        if method == "GET" && path == format!("/sites/{HOSTNAME}:{SITE_PATH}") {
            return respond(StatusCode::OK, json!({ "id": "site-eng" }));
        }
        if method == "GET" && path == "/sites/site-eng/drives" {
            return respond(
                StatusCode::OK,
                json!({ "value": [
                    { "id": DRIVE_ID, "name": "Documents" },
                    { "id": "d-shared", "name": "Shared" }
                ] }),
            );
        }

        let Some(rest) = path.strip_prefix(&format!("/drives/{DRIVE_ID}/")) else {
            return respond(StatusCode::NOT_FOUND, json!({ "error": { "code": "itemNotFound" } }));
        };

        let mut state = self.state.lock().expect("lock state");
        if let Some(item_part) = rest.strip_prefix("items/") {
            return handle_item(&mut state, method, item_part, request);
        }

        if let Some(address) = rest.strip_suffix("/children") {
            let Some(folder) = addressed(address) else {
                return respond(StatusCode::BAD_REQUEST, json!({}));
            };
            if folder != "/" && !state.items.contains_key(&folder) {
                return respond(StatusCode::NOT_FOUND, json!({}));
            }
            return match method {
                "GET" => {
                    let children: Vec<Value> = state
                        .items
                        .values()
                        .filter(|item| item.parent == folder)
                        .map(|item| json!({ "name": item.name, "id": item.id }))
                        .collect();
                    respond(StatusCode::OK, json!({ "value": children }))
                }
                "POST" => {
                    let body: Value = request
                        .body
                        .as_deref()
                        .and_then(|body| serde_json::from_slice(body).ok())
                        .unwrap_or(Value::Null);
                    let name = body["name"].as_str().unwrap_or_default().to_string();
                    let id = insert(&mut state, &folder, &name, None);
                    respond(StatusCode::CREATED, json!({ "id": id, "name": name }))
                }
                _ => respond(StatusCode::METHOD_NOT_ALLOWED, json!({})),
            };
        }

        match (method, addressed(rest)) {
            ("GET", Some(folder)) if folder == "/" || state.items.contains_key(&folder) => {
                respond(StatusCode::OK, json!({ "name": folder }))
            }
            _ => respond(StatusCode::NOT_FOUND, json!({})),
        }
    }
}

#[async_trait]
impl Transport for FakeGraph {
    async fn send(&self, request: GraphRequest) -> GraphResult<GraphResponse> {
        let host = request.url.host_str().unwrap_or_default().to_string();
        let target = match request.url.query() {
            Some(query) => format!("{}?{query}", request.url.path().trim_start_matches("/v1.0")),
            None => request.url.path().trim_start_matches("/v1.0").to_string(),
        };
        self.seen.lock().expect("lock seen").push(Seen {
            method: request.method.to_string(),
            host: host.clone(),
            target,
            bearer: request.bearer_token().map(str::to_string),
        });

        if host == "login.test" {
            return Ok(self.issue_token());
        }
        Ok(self.handle_graph(&request))
    }
}

fn handle_item(
    state: &mut DriveState,
    method: &str,
    item_part: &str,
    request: &GraphRequest,
) -> GraphResponse {
    // items/{id}:/{name}:/content
    if let Some((parent_id, rest)) = item_part.split_once(":/") {
        let Some(name) = rest.strip_suffix(":/content") else {
            return respond(StatusCode::BAD_REQUEST, json!({}));
        };
        let Some(parent) = state.items.values().find(|item| item.id == parent_id) else {
            return respond(StatusCode::NOT_FOUND, json!({}));
        };
        if method != "PUT" {
            return respond(StatusCode::METHOD_NOT_ALLOWED, json!({}));
        }
        let parent_path = path_of(parent);
        let content = request.body.as_deref().map(<[u8]>::to_vec).unwrap_or_default();
        let id = insert(state, &parent_path, name, Some(content));
        return respond(StatusCode::CREATED, json!({ "id": id, "name": name }));
    }

    // items/{id}/content
    if let Some(item_id) = item_part.strip_suffix("/content") {
        return match state.items.values().find(|item| item.id == item_id) {
            Some(Item {
                content: Some(content),
                ..
            }) => GraphResponse::new(StatusCode::OK, content.clone()),
            _ => respond(StatusCode::NOT_FOUND, json!({})),
        };
    }

    match state.items.values().find(|item| item.id == item_part) {
        Some(item) => respond(
            StatusCode::OK,
            json!({
                "id": item.id,
                "name": item.name,
                "lastModifiedDateTime": "2026-05-01T08:00:00Z",
                "size": item.content.as_ref().map(Vec::len).unwrap_or(0),
            }),
        ),
        None => respond(StatusCode::NOT_FOUND, json!({})),
    }
}

fn insert(state: &mut DriveState, parent: &str, name: &str, content: Option<Vec<u8>>) -> String {
    state.next_id += 1;
    let id = format!("item-{}", state.next_id);
    let path = if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    };
    state.items.insert(
        path,
        Item {
            id: id.clone(),
            parent: parent.to_string(),
            name: name.to_string(),
            content,
        },
    );
    id
}

fn path_of(item: &Item) -> String {
    if item.parent == "/" {
        format!("/{}", item.name)
    } else {
        format!("{}/{}", item.parent, item.name)
    }
}

fn split(path: &str) -> (String, String) {
    let trimmed = path.trim_matches('/');
    match trimmed.rsplit_once('/') {
        Some((parent, name)) => (format!("/{parent}"), name.to_string()),
        None => ("/".to_string(), trimmed.to_string()),
    }
}

/// `root` -> `/`, `root:/a/b:` -> `/a/b`.
fn addressed(segment: &str) -> Option<String> {
    if segment == "root" {
        return Some("/".to_string());
    }
    segment
        .strip_prefix("root:")
        .and_then(|rest| rest.strip_suffix(':'))
        .map(str::to_string)
}

fn respond(status: StatusCode, body: Value) -> GraphResponse {
    GraphResponse::new(status, body.to_string())
}

pub fn jwt(claims: Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}

pub fn config() -> Config {
    let values = [
        ("SHAREDROP_TENANT_ID", "tenant-a"),
        ("SHAREDROP_CLIENT_ID", "client-a"),
        ("SHAREDROP_CLIENT_SECRET", "secret-a"),
        ("SHAREDROP_HOSTNAME", HOSTNAME),
        ("SHAREDROP_GRAPH_API_BASE", API_BASE),
        ("SHAREDROP_GRAPH_TOKEN_URL", TOKEN_URL),
        ("SHAREDROP_SITE_PATH", SITE_PATH),
        ("SHAREDROP_DOWNLOAD_DIR", "/tmp/sharedrop-tests"),
    ];
    Config::from_lookup(|key| {
        values
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| value.to_string())
    })
    .expect("load test config")
}

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).single().expect("valid start time"),
    ))
}

pub fn drive_client(graph: Arc<FakeGraph>, clock: Arc<ManualClock>) -> DriveClient {
    DriveClient::connect_with(&config(), graph, clock).expect("connect drive client")
}

pub fn archiver(graph: Arc<FakeGraph>, senders: &str) -> Archiver {
    let config = config();
    Archiver::new(
        drive_client(graph, clock()),
        shared_senders(SenderDirectory::from_content(senders).expect("parse senders")),
        ArchiveOptions::from_config(&config),
    )
}
