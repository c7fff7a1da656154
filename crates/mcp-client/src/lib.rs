//! MCP subprocess adapter.
//!
//! One long-lived child process per configured server, JSON-RPC 2.0 over
//! its stdin/stdout. The manager performs the initialize/initialized
//! handshake, discovers tools, and dispatches `mcp__<server>__<tool>`
//! invocations from the orchestrator.

pub mod manager;
pub mod protocol;
pub mod transport;

pub use manager::{McpError, McpManager, McpServerConfig};

/// Mangle a server id and tool name into the flat name advertised to the
/// model.
pub fn mangle_tool_name(server_id: &str, tool_name: &str) -> String {
    format!("mcp__{server_id}__{tool_name}")
}

/// Split a mangled name back into `(server_id, tool_name)`.
pub fn split_tool_name(mangled: &str) -> Option<(&str, &str)> {
    let rest = mangled.strip_prefix("mcp__")?;
    let sep = rest.find("__")?;
    Some((&rest[..sep], &rest[sep + 2..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mangle_roundtrip() {
        let mangled = mangle_tool_name("notes", "create_note");
        assert_eq!(mangled, "mcp__notes__create_note");
        assert_eq!(split_tool_name(&mangled), Some(("notes", "create_note")));
    }

    #[test]
    fn split_rejects_non_mcp_names() {
        assert_eq!(split_tool_name("read_file"), None);
        assert_eq!(split_tool_name("mcp__broken"), None);
    }

    #[test]
    fn split_keeps_double_underscores_in_tool_name() {
        assert_eq!(
            split_tool_name("mcp__srv__tool__with__parts"),
            Some(("srv", "tool__with__parts"))
        );
    }
}
