//! File operation tools — safe, auditable file I/O constrained to the
//! project root.
//!
//! Paths are validated before any I/O: relative paths are resolved against
//! the project root and the resolved absolute path must remain inside it,
//! otherwise the operation fails with `path_outside_project`.

use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// `read_file` returns at most this many bytes of content.
pub const READ_CAP_BYTES: usize = 32 * 1024;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
pub struct ReadFileRequest {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WriteFileRequest {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditFileRequest {
    pub path: String,
    pub search: String,
    pub replace: String,
    #[serde(default)]
    pub replace_all: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListDirectoryRequest {
    #[serde(default = "default_dot")]
    pub path: String,
}

fn default_dot() -> String {
    ".".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Path validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate and resolve a requested path within the project root.
///
/// 1. Rejects absolute paths and raw `..` components up front.
/// 2. Joins onto the canonicalized project root.
/// 3. Canonicalizes the nearest existing ancestor for not-yet-created
///    targets and re-checks containment.
pub fn validate_path(project_root: &Path, requested: &str) -> Result<PathBuf, String> {
    let requested_path = Path::new(requested);
    if requested_path.is_absolute() {
        return Err(format!("path_outside_project: absolute path '{requested}'"));
    }

    for component in requested_path.components() {
        if matches!(component, Component::ParentDir) {
            return Err("path_outside_project: '..' components are not allowed".to_owned());
        }
    }

    let canonical_root = project_root
        .canonicalize()
        .map_err(|e| format!("cannot resolve project root '{}': {e}", project_root.display()))?;

    let candidate = canonical_root.join(requested_path);

    let resolved = if candidate.exists() {
        candidate
            .canonicalize()
            .map_err(|e| format!("cannot resolve path '{}': {e}", candidate.display()))?
    } else {
        // Walk up to the nearest existing ancestor, canonicalize it, then
        // re-append the missing tail.
        let mut existing = candidate.as_path();
        let mut tail: Vec<&std::ffi::OsStr> = Vec::new();
        loop {
            if existing.exists() {
                break;
            }
            match existing.parent() {
                Some(parent) => {
                    if let Some(name) = existing.file_name() {
                        tail.push(name);
                    }
                    existing = parent;
                }
                None => break,
            }
        }
        let mut resolved = existing
            .canonicalize()
            .map_err(|e| format!("cannot resolve ancestor of '{}': {e}", candidate.display()))?;
        for part in tail.into_iter().rev() {
            resolved.push(part);
        }
        resolved
    };

    if !resolved.starts_with(&canonical_root) {
        return Err(format!("path_outside_project: '{requested}' resolves outside the project root"));
    }

    Ok(resolved)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool implementations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Read file contents, capped at [`READ_CAP_BYTES`]. Truncation is made
/// explicit in the returned text.
pub async fn read_file(project_root: &Path, req: ReadFileRequest) -> Result<String, String> {
    let path = validate_path(project_root, &req.path)?;

    let bytes = fs::read(&path)
        .await
        .map_err(|e| format!("failed to read '{}': {e}", req.path))?;

    let total = bytes.len();
    if total <= READ_CAP_BYTES {
        return Ok(String::from_utf8_lossy(&bytes).into_owned());
    }

    // Back off to a UTF-8 boundary so the cut never splits a character.
    let mut cut = READ_CAP_BYTES;
    while cut > 0 && (bytes[cut] & 0xC0) == 0x80 {
        cut -= 1;
    }
    let mut out = String::from_utf8_lossy(&bytes[..cut]).into_owned();
    out.push_str(&format!(
        "\n[truncated: showing first {cut} of {total} bytes]"
    ));
    Ok(out)
}

/// Write/create a file atomically (write to a tmp sibling, then rename).
/// Parent directories are created as needed.
pub async fn write_file(project_root: &Path, req: WriteFileRequest) -> Result<String, String> {
    let path = validate_path(project_root, &req.path)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("failed to create parent directory: {e}"))?;
    }

    let tmp_name = format!(
        ".{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        uuid::Uuid::new_v4().as_simple()
    );
    let tmp_path = path.with_file_name(tmp_name);

    let mut file = fs::File::create(&tmp_path)
        .await
        .map_err(|e| format!("failed to create temp file: {e}"))?;
    file.write_all(req.content.as_bytes())
        .await
        .map_err(|e| format!("failed to write temp file: {e}"))?;
    file.flush()
        .await
        .map_err(|e| format!("failed to flush temp file: {e}"))?;
    file.sync_data()
        .await
        .map_err(|e| format!("failed to sync temp file: {e}"))?;
    drop(file);

    fs::rename(&tmp_path, &path).await.map_err(|e| {
        let tmp = tmp_path.clone();
        tokio::spawn(async move {
            let _ = fs::remove_file(&tmp).await;
        });
        format!("failed to rename temp file into place: {e}")
    })?;

    Ok(format!("Wrote {} bytes to {}", req.content.len(), req.path))
}

/// Replace a literal `search` string in a file. The search text must
/// appear; replaces the first match, or all when `replace_all` is set.
pub async fn edit_file(project_root: &Path, req: EditFileRequest) -> Result<String, String> {
    let path = validate_path(project_root, &req.path)?;

    let content = fs::read_to_string(&path)
        .await
        .map_err(|e| format!("failed to read '{}': {e}", req.path))?;

    if !content.contains(&req.search) {
        return Err(format!("search string not found in '{}'", req.path));
    }

    let (updated, count) = if req.replace_all {
        let count = content.matches(&req.search).count();
        (content.replace(&req.search, &req.replace), count)
    } else {
        (content.replacen(&req.search, &req.replace, 1), 1)
    };

    write_file(
        project_root,
        WriteFileRequest {
            path: req.path.clone(),
            content: updated,
        },
    )
    .await?;

    Ok(format!(
        "Replaced {count} occurrence(s) in {}",
        req.path
    ))
}

/// List a directory's entries with a trailing `/` on subdirectories,
/// sorted by name.
pub async fn list_directory(project_root: &Path, req: ListDirectoryRequest) -> Result<String, String> {
    let path = validate_path(project_root, &req.path)?;

    let mut read_dir = fs::read_dir(&path)
        .await
        .map_err(|e| format!("failed to read directory '{}': {e}", req.path))?;

    let mut entries: Vec<String> = Vec::new();
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| format!("failed to read directory entry: {e}"))?
    {
        let name = entry.file_name().to_string_lossy().to_string();
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        entries.push(if is_dir { format!("{name}/") } else { name });
    }
    entries.sort();

    if entries.is_empty() {
        return Ok(format!("{} is empty", req.path));
    }
    Ok(entries.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project() -> TempDir {
        TempDir::new().expect("failed to create temp dir")
    }

    #[test]
    fn validate_path_rejects_parent_traversal() {
        let ws = project();
        let result = validate_path(ws.path(), "../etc/passwd");
        assert!(result.unwrap_err().contains("path_outside_project"));
    }

    #[test]
    fn validate_path_rejects_absolute() {
        let ws = project();
        let result = validate_path(ws.path(), "/etc/passwd");
        assert!(result.unwrap_err().contains("path_outside_project"));
    }

    #[test]
    fn validate_path_accepts_nested_new_file() {
        let ws = project();
        std::fs::create_dir_all(ws.path().join("src")).unwrap();
        let result = validate_path(ws.path(), "src/new_file.rs");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn write_and_read_roundtrip() {
        let ws = project();
        write_file(
            ws.path(),
            WriteFileRequest {
                path: "hello.py".into(),
                content: "print('Hello')".into(),
            },
        )
        .await
        .unwrap();

        let content = read_file(ws.path(), ReadFileRequest { path: "hello.py".into() })
            .await
            .unwrap();
        assert_eq!(content, "print('Hello')");
    }

    #[tokio::test]
    async fn write_creates_parent_directories() {
        let ws = project();
        write_file(
            ws.path(),
            WriteFileRequest {
                path: "a/b/c.txt".into(),
                content: "deep".into(),
            },
        )
        .await
        .unwrap();
        assert!(ws.path().join("a/b/c.txt").exists());
    }

    #[tokio::test]
    async fn read_truncates_at_cap_with_marker() {
        let ws = project();
        let big = "x".repeat(READ_CAP_BYTES + 500);
        std::fs::write(ws.path().join("big.txt"), &big).unwrap();

        let content = read_file(ws.path(), ReadFileRequest { path: "big.txt".into() })
            .await
            .unwrap();
        assert!(content.contains("[truncated: showing first"));
        assert!(content.len() < big.len());
    }

    #[tokio::test]
    async fn edit_replaces_first_match_only() {
        let ws = project();
        std::fs::write(ws.path().join("f.txt"), "aaa bbb aaa").unwrap();

        edit_file(
            ws.path(),
            EditFileRequest {
                path: "f.txt".into(),
                search: "aaa".into(),
                replace: "ccc".into(),
                replace_all: false,
            },
        )
        .await
        .unwrap();

        let content = std::fs::read_to_string(ws.path().join("f.txt")).unwrap();
        assert_eq!(content, "ccc bbb aaa");
    }

    #[tokio::test]
    async fn edit_replace_all() {
        let ws = project();
        std::fs::write(ws.path().join("f.txt"), "aaa bbb aaa").unwrap();

        let msg = edit_file(
            ws.path(),
            EditFileRequest {
                path: "f.txt".into(),
                search: "aaa".into(),
                replace: "ccc".into(),
                replace_all: true,
            },
        )
        .await
        .unwrap();

        assert!(msg.contains("2 occurrence"));
        let content = std::fs::read_to_string(ws.path().join("f.txt")).unwrap();
        assert_eq!(content, "ccc bbb ccc");
    }

    #[tokio::test]
    async fn edit_missing_search_string_fails() {
        let ws = project();
        std::fs::write(ws.path().join("f.txt"), "hello").unwrap();

        let err = edit_file(
            ws.path(),
            EditFileRequest {
                path: "f.txt".into(),
                search: "absent".into(),
                replace: "x".into(),
                replace_all: false,
            },
        )
        .await
        .unwrap_err();
        assert!(err.contains("not found"));
    }

    #[tokio::test]
    async fn list_directory_marks_dirs() {
        let ws = project();
        std::fs::write(ws.path().join("a.txt"), "").unwrap();
        std::fs::create_dir(ws.path().join("sub")).unwrap();

        let listing = list_directory(ws.path(), ListDirectoryRequest { path: ".".into() })
            .await
            .unwrap();
        assert_eq!(listing, "a.txt\nsub/");
    }

    #[tokio::test]
    async fn write_outside_root_creates_nothing() {
        let ws = project();
        let err = write_file(
            ws.path(),
            WriteFileRequest {
                path: "../escape.txt".into(),
                content: "nope".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(err.contains("path_outside_project"));
        assert!(!ws.path().parent().unwrap().join("escape.txt").exists());
    }
}
