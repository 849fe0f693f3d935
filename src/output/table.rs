use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::archive::{ArchiveReport, DownloadReport, UploadReport, WatchOutcome};
use crate::output::{ExistsReport, FolderReport, WatchReport};

const VALUE_WIDTH: usize = 72;

pub fn format_exists(report: &ExistsReport) -> String {
    format_pairs(&[
        ("Path", report.path.clone()),
        ("Exists", yes_no(report.exists).to_string()),
    ])
}

pub fn format_folder(report: &FolderReport) -> String {
    let mut out = format_pairs(&[
        ("Path", report.path.clone()),
        ("Created", report.created.len().to_string()),
    ]);
    if report.created.is_empty() {
        out.push_str("Folder already existed.\n");
    } else {
        for path in &report.created {
            out.push_str(&format!("  + {}\n", truncate_for_width(path, VALUE_WIDTH)));
        }
    }
    out
}

pub fn format_upload(report: &UploadReport) -> String {
    let mut out = format_pairs(&upload_pairs(report));
    for path in &report.created_folders {
        out.push_str(&format!("  + {}\n", truncate_for_width(path, VALUE_WIDTH)));
    }
    out
}

pub fn format_download(report: &DownloadReport) -> String {
    let status = if report.skipped {
        "skipped (already present)".to_string()
    } else {
        format!("{} bytes", report.bytes)
    };
    format_pairs(&[
        ("Path", report.path.display().to_string()),
        ("Download", status),
    ])
}

pub fn format_archive(report: &ArchiveReport) -> String {
    let mut pairs = vec![
        ("Sender", report.sender.clone()),
        ("Folder", report.sender_folder.clone()),
    ];
    pairs.extend(upload_pairs(&report.upload));
    format_pairs(&pairs)
}

pub fn format_watch(report: &WatchReport) -> String {
    let outcome = match report.outcome {
        WatchOutcome::Changed => "changed, reloaded",
        WatchOutcome::Unchanged => "unchanged",
    };
    let mut pairs = vec![("File", report.file.clone()), ("Status", outcome.to_string())];
    if let Some(modified) = report.last_modified {
        pairs.push(("Modified", modified.to_rfc3339()));
    }
    if let Some(path) = &report.local_path {
        pairs.push(("Local copy", path.display().to_string()));
    }
    format_pairs(&pairs)
}

fn upload_pairs(report: &UploadReport) -> Vec<(&'static str, String)> {
    vec![
        ("File", report.file_name.clone()),
        ("Directory", report.upload_directory.clone()),
        ("Item", report.item_id.clone().unwrap_or_else(|| "-".to_string())),
        ("New folders", report.created_folders.len().to_string()),
    ]
}

fn format_pairs(pairs: &[(&str, String)]) -> String {
    let key_width = pairs
        .iter()
        .map(|(key, _)| UnicodeWidthStr::width(*key))
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    for (key, value) in pairs {
        let padding = key_width - UnicodeWidthStr::width(*key);
        out.push_str(&format!(
            "{key}:{}  {}\n",
            " ".repeat(padding),
            truncate_for_width(value, VALUE_WIDTH)
        ));
    }
    out
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn truncate_for_width(value: &str, max_width: usize) -> String {
    if UnicodeWidthStr::width(value) <= max_width {
        return value.to_string();
    }

    if max_width <= 1 {
        return "…".to_string();
    }

    let mut out = String::new();
    let mut width = 0usize;
    for c in value.chars() {
        let cw = UnicodeWidthChar::width(c).unwrap_or(0);
        if width + cw + 1 > max_width {
            break;
        }
        out.push(c);
        width += cw;
    }
    out.push('…');
    out
}
