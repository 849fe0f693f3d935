/// Canonical `/a/b` form of a drive-relative directory; `None` for the root.
pub fn normalize_directory(directory: Option<&str>) -> Option<String> {
    let trimmed = directory?.trim().trim_matches('/');
    if trimmed.is_empty() {
        None
    } else {
        Some(format!("/{trimmed}"))
    }
}

/// Drive-relative addressing segment: `root` or `root:/a/b:`, with each
/// path segment percent-encoded.
pub fn format_path(path: Option<&str>) -> String {
    match normalize_directory(path) {
        Some(path) => format!("root:{}:", encode_path(&path)),
        None => "root".to_string(),
    }
}

/// Percent-encodes every segment of a `/`-separated path.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// `directory/name` as a normalized path.
pub fn join_path(directory: Option<&str>, name: &str) -> String {
    let name = name.trim().trim_matches('/');
    match normalize_directory(directory) {
        Some(directory) => format!("{directory}/{name}"),
        None => format!("/{name}"),
    }
}

/// Splits `/a/b/c` into (`Some("/a/b")`, `"c"`). `None` when the path has
/// no separator or no final segment.
pub fn split_parent(path: &str) -> Option<(Option<String>, String)> {
    let trimmed = path.trim().trim_end_matches('/');
    let (parent, name) = trimmed.rsplit_once('/')?;
    if name.is_empty() {
        return None;
    }
    Some((normalize_directory(Some(parent)), name.to_string()))
}

/// Path segments of a directory, root first.
pub fn segments(directory: Option<&str>) -> Vec<String> {
    directory
        .unwrap_or_default()
        .split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// `report.pdf` + ` (Copy)` -> `report (Copy).pdf`.
pub fn file_name_with_suffix(file_name: &str, suffix: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => format!("{stem}{suffix}.{extension}"),
        _ => format!("{file_name}{suffix}"),
    }
}
