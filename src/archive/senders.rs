use std::collections::HashMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{info, warn};

use crate::graph::{GraphError, GraphResult};

/// Decides which senders are archived and under which folder.
pub trait AllowedSenders: Send + Sync {
    fn is_allowed(&self, address: &str) -> bool;

    fn sender_folder(&self, address: &str) -> Option<String>;

    /// Known addresses, lowercased. Open-ended lists return nothing.
    fn addresses(&self) -> Vec<String>;

    fn reload(&mut self) -> GraphResult<()> {
        Ok(())
    }
}

/// Allow-list read from a comma- or tab-separated file.
///
/// The first row is a header. Each following row is
/// `folder, address, address, ...`; reading stops at the first row whose
/// folder cell is empty.
#[derive(Debug, Clone)]
pub struct SenderDirectory {
    path: PathBuf,
    folders_by_address: HashMap<String, String>,
}

impl SenderDirectory {
    pub fn load(path: impl Into<PathBuf>) -> GraphResult<Self> {
        let path = path.into();
        let folders_by_address = read_allow_list(&path)?;
        info!(
            path = %path.display(),
            senders = folders_by_address.len(),
            "allowed senders loaded"
        );
        Ok(Self {
            path,
            folders_by_address,
        })
    }

    /// Async counterpart of [`SenderDirectory::load`].
    pub async fn read(path: impl Into<PathBuf>) -> GraphResult<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await.map_err(|err| {
            warn!(path = %path.display(), %err, "cannot read allow-list");
            err
        })?;
        let folders_by_address = parse_allow_list(&content)?;
        info!(
            path = %path.display(),
            senders = folders_by_address.len(),
            "allowed senders loaded"
        );
        Ok(Self {
            path,
            folders_by_address,
        })
    }

    pub fn from_content(content: &str) -> GraphResult<Self> {
        Ok(Self {
            path: PathBuf::new(),
            folders_by_address: parse_allow_list(content)?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.folders_by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folders_by_address.is_empty()
    }
}

impl AllowedSenders for SenderDirectory {
    fn is_allowed(&self, address: &str) -> bool {
        self.folders_by_address.contains_key(&normalize_address(address))
    }

    fn sender_folder(&self, address: &str) -> Option<String> {
        self.folders_by_address
            .get(&normalize_address(address))
            .cloned()
    }

    fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.folders_by_address.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    fn reload(&mut self) -> GraphResult<()> {
        if self.path.as_os_str().is_empty() {
            return Err(GraphError::Config(
                "allow-list was not loaded from a file".to_string(),
            ));
        }
        self.folders_by_address = read_allow_list(&self.path)?;
        info!(
            path = %self.path.display(),
            senders = self.folders_by_address.len(),
            "allowed senders reloaded"
        );
        Ok(())
    }
}

/// Accepts any well-formed address and files it under the address itself.
#[derive(Debug, Clone)]
pub struct AnySender {
    pattern: Regex,
}

impl AnySender {
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("compile address regex"),
        }
    }
}

impl Default for AnySender {
    fn default() -> Self {
        Self::new()
    }
}

impl AllowedSenders for AnySender {
    fn is_allowed(&self, address: &str) -> bool {
        self.pattern.is_match(address.trim())
    }

    fn sender_folder(&self, address: &str) -> Option<String> {
        self.is_allowed(address)
            .then(|| address.trim().to_string())
    }

    fn addresses(&self) -> Vec<String> {
        Vec::new()
    }
}

fn read_allow_list(path: &Path) -> GraphResult<HashMap<String, String>> {
    let content = std::fs::read_to_string(path).map_err(|err| {
        warn!(path = %path.display(), %err, "cannot read allow-list");
        err
    })?;
    parse_allow_list(&content)
}

fn parse_allow_list(content: &str) -> GraphResult<HashMap<String, String>> {
    let content = content.trim_start_matches('\u{feff}');
    let delimiter = match content.lines().next() {
        Some(header) if header.contains('\t') => b'\t',
        _ => b',',
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let mut folders_by_address = HashMap::new();
    for record in reader.records() {
        let record = record?;
        let mut cells = record.iter();
        let folder = match cells.next() {
            Some(folder) if !folder.is_empty() => folder.to_string(),
            _ => break,
        };
        for address in cells.take_while(|cell| !cell.is_empty()) {
            folders_by_address.insert(normalize_address(address), folder.clone());
        }
    }
    Ok(folders_by_address)
}

fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}
