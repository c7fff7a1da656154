//! Repo map builder — a bounded textual inventory of the project that
//! seeds the initial prompt.
//!
//! One line per file: `path (size) - sym1, sym2, ...`, sorted by path and
//! truncated to a character budget.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

/// Files larger than this are listed without symbol extraction.
const MAX_SCAN_FILE_BYTES: u64 = 500 * 1024;

/// Only the head of each file is scanned for symbols.
const SCAN_HEAD_BYTES: usize = 2 * 1024;

/// At most this many symbols per file.
const MAX_SYMBOLS_PER_FILE: usize = 10;

/// Default character budget for the whole map.
pub const DEFAULT_MAP_BUDGET: usize = 3000;

/// Directories skipped during the walk.
const IGNORE_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "dist",
    "build",
    ".next",
    "out",
    "coverage",
    "__pycache__",
    ".cache",
    "target",
    "vendor",
    ".venv",
    "venv",
];

/// Extensions that never carry useful symbols.
const SKIP_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "ico", "svg", "woff", "woff2", "ttf", "eot",
    "zip", "tar", "gz", "bz2", "pdf", "lock", "min.js", "map", "wasm", "bin",
];

/// Language-agnostic top-level declaration patterns. Capture group 1 is
/// the symbol name.
const SYMBOL_PATTERNS: &[&str] = &[
    r"(?m)^export\s+(?:default\s+)?(?:async\s+)?(?:function|class|const|let|interface|type|enum)\s+([A-Za-z_$][\w$]*)",
    r"(?m)^(?:async\s+)?function\s+([A-Za-z_$][\w$]*)",
    r"(?m)^class\s+([A-Za-z_$][\w$]*)",
    r"(?m)^def\s+([A-Za-z_]\w*)",
    r"(?m)^(?:pub\s+)?(?:async\s+)?fn\s+([A-Za-z_]\w*)",
    r"(?m)^(?:pub\s+)?(?:struct|enum|trait)\s+([A-Za-z_]\w*)",
    r"(?m)^func\s+(?:\([^)]*\)\s+)?([A-Za-z_]\w*)",
    r"(?m)^(?:public|private|protected)?\s*(?:static\s+)?(?:final\s+)?class\s+([A-Za-z_]\w*)",
];

fn symbol_regexes() -> &'static Vec<Regex> {
    static REGEXES: OnceLock<Vec<Regex>> = OnceLock::new();
    REGEXES.get_or_init(|| {
        SYMBOL_PATTERNS
            .iter()
            .map(|p| Regex::new(p).unwrap_or_else(|e| panic!("invalid symbol pattern {p:?}: {e}")))
            .collect()
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Building
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the repo map with the default budget.
pub fn build_repo_map(project_root: &Path) -> String {
    build_repo_map_with_budget(project_root, DEFAULT_MAP_BUDGET)
}

/// Build the repo map, truncated to `budget` characters.
pub fn build_repo_map_with_budget(project_root: &Path, budget: usize) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut stack = vec![project_root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if path.is_dir() {
                if !IGNORE_DIRS.contains(&name.as_str()) && !name.starts_with('.') {
                    stack.push(path);
                }
                continue;
            }
            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            if should_skip_extension(&name) {
                continue;
            }
            let rel = match path.strip_prefix(project_root) {
                Ok(r) => r.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };
            let symbols = if meta.len() <= MAX_SCAN_FILE_BYTES {
                extract_symbols(&path)
            } else {
                Vec::new()
            };
            let line = if symbols.is_empty() {
                format!("{rel} ({})", human_size(meta.len()))
            } else {
                format!("{rel} ({}) - {}", human_size(meta.len()), symbols.join(", "))
            };
            lines.push(line);
        }
    }

    lines.sort();

    let mut out = String::new();
    for line in lines {
        if out.len() + line.len() + 1 > budget {
            out.push_str("[map truncated]");
            break;
        }
        out.push_str(&line);
        out.push('\n');
    }
    out
}

fn should_skip_extension(name: &str) -> bool {
    let lower = name.to_lowercase();
    SKIP_EXTENSIONS
        .iter()
        .any(|ext| lower.ends_with(&format!(".{ext}")))
}

fn extract_symbols(path: &Path) -> Vec<String> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(_) => return Vec::new(),
    };
    let head_len = bytes.len().min(SCAN_HEAD_BYTES);
    let head = String::from_utf8_lossy(&bytes[..head_len]);

    let mut symbols: Vec<String> = Vec::new();
    for re in symbol_regexes() {
        for cap in re.captures_iter(&head) {
            if let Some(name) = cap.get(1) {
                let name = name.as_str().to_string();
                if !symbols.contains(&name) {
                    symbols.push(name);
                }
                if symbols.len() >= MAX_SYMBOLS_PER_FILE {
                    return symbols;
                }
            }
        }
    }
    symbols
}

fn human_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes}B")
    } else if bytes < 1024 * 1024 {
        format!("{}KB", bytes / 1024)
    } else {
        format!("{}MB", bytes / (1024 * 1024))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn map_lists_files_with_symbols() {
        let ws = TempDir::new().unwrap();
        std::fs::create_dir_all(ws.path().join("src")).unwrap();
        std::fs::write(
            ws.path().join("src/app.ts"),
            "export function renderPage() {}\nexport class PageStore {}\n",
        )
        .unwrap();
        std::fs::write(ws.path().join("util.py"), "def parse_args():\n    pass\n").unwrap();

        let map = build_repo_map(ws.path());
        assert!(map.contains("src/app.ts"));
        assert!(map.contains("renderPage"));
        assert!(map.contains("PageStore"));
        assert!(map.contains("parse_args"));
    }

    #[test]
    fn map_skips_ignored_dirs_and_extensions() {
        let ws = TempDir::new().unwrap();
        std::fs::create_dir_all(ws.path().join("node_modules/dep")).unwrap();
        std::fs::write(ws.path().join("node_modules/dep/index.js"), "function x() {}").unwrap();
        std::fs::write(ws.path().join("logo.png"), [0u8; 10]).unwrap();
        std::fs::write(ws.path().join("main.rs"), "fn main() {}\n").unwrap();

        let map = build_repo_map(ws.path());
        assert!(!map.contains("node_modules"));
        assert!(!map.contains("logo.png"));
        assert!(map.contains("main.rs"));
    }

    #[test]
    fn map_respects_budget() {
        let ws = TempDir::new().unwrap();
        for i in 0..100 {
            std::fs::write(
                ws.path().join(format!("file_{i:03}.py")),
                "def handler():\n    pass\n",
            )
            .unwrap();
        }
        let map = build_repo_map_with_budget(ws.path(), 300);
        assert!(map.len() <= 300 + "[map truncated]".len());
        assert!(map.contains("[map truncated]"));
    }

    #[test]
    fn map_sorted_by_path() {
        let ws = TempDir::new().unwrap();
        std::fs::write(ws.path().join("zebra.py"), "def z():\n    pass\n").unwrap();
        std::fs::write(ws.path().join("alpha.py"), "def a():\n    pass\n").unwrap();

        let map = build_repo_map(ws.path());
        let alpha = map.find("alpha.py").unwrap();
        let zebra = map.find("zebra.py").unwrap();
        assert!(alpha < zebra);
    }

    #[test]
    fn symbol_cap_per_file() {
        let ws = TempDir::new().unwrap();
        let many: String = (0..20).map(|i| format!("def handler_{i}():\n    pass\n")).collect();
        std::fs::write(ws.path().join("many.py"), many).unwrap();

        let map = build_repo_map(ws.path());
        let line = map.lines().find(|l| l.contains("many.py")).unwrap();
        assert_eq!(line.matches("handler_").count(), 10);
    }

    #[test]
    fn empty_project_yields_empty_map() {
        let ws = TempDir::new().unwrap();
        assert!(build_repo_map(ws.path()).is_empty());
    }
}
