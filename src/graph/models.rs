use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One page of a collection response.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveItem {
    pub name: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drive {
    pub id: String,
    pub name: String,
}

/// Item metadata used to detect remote changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileModificationInfo {
    pub id: Option<String>,
    pub name: Option<String>,
    pub last_modified_date_time: Option<DateTime<Utc>>,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FolderFacet {}

/// Body of a "create child folder" request: `{"name": ..., "folder": {}}`.
#[derive(Debug, Clone, Serialize)]
pub struct NewFolder<'a> {
    pub name: &'a str,
    pub folder: FolderFacet,
}

impl<'a> NewFolder<'a> {
    pub fn new(name: &'a str) -> Self {
        Self {
            name,
            folder: FolderFacet::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{DriveItem, FileModificationInfo, NewFolder, Page};

    #[test]
    fn new_folder_serializes_minimal_payload() {
        let body = serde_json::to_value(NewFolder::new("Emails")).expect("serialize folder");
        assert_eq!(body, json!({ "name": "Emails", "folder": {} }));
    }

    #[test]
    fn page_reads_items_and_continuation() {
        let page: Page<DriveItem> = serde_json::from_value(json!({
            "value": [{ "name": "a", "id": "1", "size": 10 }],
            "@odata.nextLink": "https://graph.test/v1.0/next"
        }))
        .expect("decode page");
        assert_eq!(page.value, vec![DriveItem { name: "a".into(), id: "1".into() }]);
        assert_eq!(page.next_link.as_deref(), Some("https://graph.test/v1.0/next"));

        let empty: Page<DriveItem> = serde_json::from_value(json!({})).expect("decode empty");
        assert!(empty.value.is_empty());
        assert!(empty.next_link.is_none());
    }

    #[test]
    fn modification_info_reads_graph_timestamps() {
        let info: FileModificationInfo = serde_json::from_value(json!({
            "id": "item-1",
            "name": "senders.csv",
            "lastModifiedDateTime": "2026-03-04T10:15:00Z",
            "size": 512,
            "webUrl": "https://contoso.sharepoint.com/x"
        }))
        .expect("decode info");
        assert_eq!(info.name.as_deref(), Some("senders.csv"));
        assert_eq!(
            info.last_modified_date_time.map(|ts| ts.to_rfc3339()),
            Some("2026-03-04T10:15:00+00:00".to_string())
        );
    }
}
