//! `search_code` and `glob_files` — bounded, read-only project queries.

use std::path::{Path, PathBuf};

use regex::RegexBuilder;
use serde::Deserialize;

/// `search_code` stops after this many matching lines.
pub const SEARCH_RESULT_CAP: usize = 200;

/// `glob_files` stops after this many entries.
pub const GLOB_RESULT_CAP: usize = 500;

/// Directories never descended into.
const SKIP_DIRS: &[&str] = &["node_modules", ".git"];

#[derive(Debug, Clone, Deserialize)]
pub struct SearchCodeRequest {
    pub pattern: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GlobFilesRequest {
    pub pattern: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tree walking
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Collect files under `root` depth-first, skipping [`SKIP_DIRS`].
/// Entries come back as root-relative paths, sorted.
fn collect_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if path.is_dir() {
                if !SKIP_DIRS.contains(&name.as_str()) {
                    stack.push(path);
                }
            } else if let Ok(rel) = path.strip_prefix(root) {
                files.push(rel.to_path_buf());
            }
        }
    }

    files.sort();
    files
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// search_code
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Case-insensitive regex search over the project tree. Binary and
/// unreadable files are skipped silently; output is capped at
/// [`SEARCH_RESULT_CAP`] lines of `path:line: text`.
pub async fn search_code(project_root: &Path, req: SearchCodeRequest) -> Result<String, String> {
    let regex = RegexBuilder::new(&req.pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| format!("invalid pattern: {e}"))?;

    let root = project_root.to_path_buf();
    let hits = tokio::task::spawn_blocking(move || {
        let mut hits: Vec<String> = Vec::new();
        'files: for rel in collect_files(&root) {
            let content = match std::fs::read(root.join(&rel)) {
                Ok(bytes) => bytes,
                Err(_) => continue,
            };
            // Binary sniff: a NUL byte in the first 1 KiB disqualifies.
            if content.iter().take(1024).any(|&b| b == 0) {
                continue;
            }
            let text = match String::from_utf8(content) {
                Ok(t) => t,
                Err(_) => continue,
            };
            for (line_no, line) in text.lines().enumerate() {
                if regex.is_match(line) {
                    hits.push(format!("{}:{}: {}", rel.display(), line_no + 1, line.trim_end()));
                    if hits.len() >= SEARCH_RESULT_CAP {
                        break 'files;
                    }
                }
            }
        }
        hits
    })
    .await
    .map_err(|e| format!("search task failed: {e}"))?;

    if hits.is_empty() {
        return Ok(format!("no matches for pattern '{}'", req.pattern));
    }

    let mut out = hits.join("\n");
    if hits.len() >= SEARCH_RESULT_CAP {
        out.push_str(&format!("\n[capped at {SEARCH_RESULT_CAP} matches]"));
    }
    Ok(out)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// glob_files
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Match project files against a glob pattern. `*` spans one path segment,
/// `**` any depth. Capped at [`GLOB_RESULT_CAP`] entries.
pub async fn glob_files(project_root: &Path, req: GlobFilesRequest) -> Result<String, String> {
    let pattern = glob::Pattern::new(&req.pattern)
        .map_err(|e| format!("invalid glob pattern: {e}"))?;
    let options = glob::MatchOptions {
        case_sensitive: true,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };

    let root = project_root.to_path_buf();
    let matches = tokio::task::spawn_blocking(move || {
        let mut matches: Vec<String> = Vec::new();
        for rel in collect_files(&root) {
            let rel_str = rel.to_string_lossy().replace('\\', "/");
            if pattern.matches_with(&rel_str, options) {
                matches.push(rel_str);
                if matches.len() >= GLOB_RESULT_CAP {
                    break;
                }
            }
        }
        matches
    })
    .await
    .map_err(|e| format!("glob task failed: {e}"))?;

    if matches.is_empty() {
        return Ok(format!("no files match '{}'", req.pattern));
    }

    let mut out = matches.join("\n");
    if matches.len() >= GLOB_RESULT_CAP {
        out.push_str(&format!("\n[capped at {GLOB_RESULT_CAP} entries]"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project() -> TempDir {
        let ws = TempDir::new().unwrap();
        std::fs::create_dir_all(ws.path().join("src/deep")).unwrap();
        std::fs::create_dir_all(ws.path().join("node_modules/pkg")).unwrap();
        std::fs::write(ws.path().join("src/main.rs"), "fn main() {\n    println!(\"Hi\");\n}\n").unwrap();
        std::fs::write(ws.path().join("src/deep/util.rs"), "pub fn helper() {}\n").unwrap();
        std::fs::write(ws.path().join("README.md"), "# Project\n").unwrap();
        std::fs::write(ws.path().join("node_modules/pkg/index.js"), "function main() {}\n").unwrap();
        std::fs::write(ws.path().join("blob.bin"), [0u8, 1, 2, 3, 0, 255]).unwrap();
        ws
    }

    #[tokio::test]
    async fn search_finds_matches_case_insensitively() {
        let ws = project();
        let out = search_code(ws.path(), SearchCodeRequest { pattern: "FN MAIN".into() })
            .await
            .unwrap();
        assert!(out.contains("src/main.rs:1"));
    }

    #[tokio::test]
    async fn search_skips_node_modules_and_binaries() {
        let ws = project();
        let out = search_code(ws.path(), SearchCodeRequest { pattern: "function|main".into() })
            .await
            .unwrap();
        assert!(!out.contains("node_modules"));
        assert!(!out.contains("blob.bin"));
    }

    #[tokio::test]
    async fn search_caps_at_limit() {
        let ws = TempDir::new().unwrap();
        let many_lines = "match me\n".repeat(SEARCH_RESULT_CAP + 50);
        std::fs::write(ws.path().join("big.txt"), many_lines).unwrap();

        let out = search_code(ws.path(), SearchCodeRequest { pattern: "match me".into() })
            .await
            .unwrap();
        assert_eq!(
            out.lines().filter(|l| l.contains("big.txt")).count(),
            SEARCH_RESULT_CAP
        );
        assert!(out.contains("[capped at 200 matches]"));
    }

    #[tokio::test]
    async fn search_invalid_pattern_errors() {
        let ws = project();
        let err = search_code(ws.path(), SearchCodeRequest { pattern: "(unclosed".into() })
            .await
            .unwrap_err();
        assert!(err.contains("invalid pattern"));
    }

    #[tokio::test]
    async fn glob_single_star_is_one_segment() {
        let ws = project();
        let out = glob_files(ws.path(), GlobFilesRequest { pattern: "src/*.rs".into() })
            .await
            .unwrap();
        assert!(out.contains("src/main.rs"));
        assert!(!out.contains("src/deep/util.rs"));
    }

    #[tokio::test]
    async fn glob_double_star_is_any_depth() {
        let ws = project();
        let out = glob_files(ws.path(), GlobFilesRequest { pattern: "**/*.rs".into() })
            .await
            .unwrap();
        assert!(out.contains("src/main.rs"));
        assert!(out.contains("src/deep/util.rs"));
    }

    #[tokio::test]
    async fn glob_no_matches_message() {
        let ws = project();
        let out = glob_files(ws.path(), GlobFilesRequest { pattern: "*.xyz".into() })
            .await
            .unwrap();
        assert!(out.contains("no files match"));
    }
}
