//! The tool executor and its collaborators.
//!
//! A fixed set of filesystem/process tools confined to a project root
//! ([`executor`]), the outcome validator that inspects each result
//! ([`validator`]), and the repo map builder that feeds the initial prompt
//! ([`repomap`]).
//!
//! Every tool returns `Result<String, String>`: the Ok string goes back to
//! the model verbatim, the Err string becomes an `Error: ...` tool result.
//! `ask_user` and `mcp__*` names are not executed here — the orchestrator
//! intercepts them before dispatch.

pub mod executor;
pub mod fs_ops;
pub mod git;
pub mod repomap;
pub mod run_cmd;
pub mod search;
pub mod validator;

pub use executor::ToolExecutor;

/// The closed set of tools with no side effects on the project tree.
/// These are safe to dispatch concurrently within one turn; adding a new
/// read-only tool means extending this list and nothing else.
pub const READ_ONLY_TOOLS: &[&str] = &["read_file", "search_code", "glob_files", "list_directory"];

/// True if the named tool may run concurrently with other read-only tools.
pub fn is_read_only(tool_name: &str) -> bool {
    READ_ONLY_TOOLS.contains(&tool_name)
}
