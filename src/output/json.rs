use anyhow::Result;
use serde::Serialize;

pub fn format_report<T: Serialize + ?Sized>(report: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}
