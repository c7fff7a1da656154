//! MCP manager — holds the server connections for one run and routes
//! mangled tool names to them.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::protocol::{self, McpToolDef, ToolCallResult, ToolsListResult};
use crate::transport::{StdioTransport, TransportError};
use crate::{mangle_tool_name, split_tool_name};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One MCP server to spawn for the run.
#[derive(Debug, Clone, Deserialize)]
pub struct McpServerConfig {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct McpServer {
    id: String,
    tools: Vec<McpToolDef>,
    transport: StdioTransport,
}

impl McpServer {
    /// Spawn the process, perform the initialize/initialized handshake,
    /// and discover tools.
    async fn initialize(config: &McpServerConfig) -> Result<Self, McpError> {
        let transport = StdioTransport::spawn(&config.command, &config.args, &config.env)
            .map_err(McpError::Transport)?;

        let init_params = serde_json::to_value(protocol::initialize_params())
            .map_err(|e| McpError::Protocol(format!("failed to serialize initialize params: {e}")))?;

        let resp = transport
            .send_request("initialize", Some(init_params))
            .await
            .map_err(McpError::Transport)?;
        if let Err(err) = resp.into_result() {
            return Err(McpError::Protocol(format!("initialize failed: {err}")));
        }

        transport
            .send_notification("notifications/initialized")
            .await
            .map_err(McpError::Transport)?;

        let tools_resp = transport
            .send_request("tools/list", None)
            .await
            .map_err(McpError::Transport)?;
        let tools = match tools_resp.into_result() {
            Ok(value) => serde_json::from_value::<ToolsListResult>(value)
                .map(|r| r.tools)
                .unwrap_or_else(|e| {
                    tracing::warn!(server_id = %config.id, error = %e, "failed to parse tools/list result");
                    Vec::new()
                }),
            Err(err) => {
                tracing::warn!(server_id = %config.id, error = %err, "tools/list returned error");
                Vec::new()
            }
        };

        tracing::info!(server_id = %config.id, tool_count = tools.len(), "MCP server initialized");

        Ok(Self {
            id: config.id.clone(),
            tools,
            transport,
        })
    }

    async fn call_tool(&self, tool_name: &str, input: Value) -> Result<ToolCallResult, McpError> {
        if !self.transport.is_alive() {
            return Err(McpError::ServerDown(self.id.clone()));
        }

        let params = serde_json::json!({ "name": tool_name, "arguments": input });
        let resp = self
            .transport
            .send_request("tools/call", Some(params))
            .await
            .map_err(McpError::Transport)?;

        let value = resp
            .into_result()
            .map_err(|err| McpError::Protocol(format!("tools/call failed: {err}")))?;
        serde_json::from_value(value)
            .map_err(|e| McpError::Protocol(format!("failed to parse tools/call result: {e}")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// All MCP server connections for one run. Destroyed when the run ends.
pub struct McpManager {
    servers: HashMap<String, McpServer>,
}

impl McpManager {
    pub fn empty() -> Self {
        Self {
            servers: HashMap::new(),
        }
    }

    /// Spawn and initialize every configured server. Servers that fail to
    /// come up are logged and skipped.
    pub async fn from_configs(configs: &[McpServerConfig]) -> Self {
        let mut servers = HashMap::new();
        for config in configs {
            match McpServer::initialize(config).await {
                Ok(server) => {
                    servers.insert(config.id.clone(), server);
                }
                Err(e) => {
                    tracing::warn!(server_id = %config.id, error = %e, "failed to initialize MCP server, skipping");
                }
            }
        }
        Self { servers }
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// All discovered tools under their mangled names, for the model's
    /// tool definition list.
    pub fn list_tools(&self) -> Vec<(String, McpToolDef)> {
        let mut tools: Vec<(String, McpToolDef)> = self
            .servers
            .values()
            .filter(|s| s.transport.is_alive())
            .flat_map(|server| {
                server
                    .tools
                    .iter()
                    .map(|tool| (mangle_tool_name(&server.id, &tool.name), tool.clone()))
            })
            .collect();
        tools.sort_by(|a, b| a.0.cmp(&b.0));
        tools
    }

    /// Invoke a tool by its mangled `mcp__<server>__<tool>` name.
    pub async fn invoke_tool(&self, mangled_name: &str, input: Value) -> Result<String, McpError> {
        let (server_id, tool_name) = split_tool_name(mangled_name)
            .ok_or_else(|| McpError::BadToolName(mangled_name.to_string()))?;

        let server = self
            .servers
            .get(server_id)
            .ok_or_else(|| McpError::ServerNotFound(server_id.to_string()))?;

        let result = server.call_tool(tool_name, input).await?;
        if result.is_error {
            return Err(McpError::ToolFailed(result.joined_text()));
        }
        Ok(result.joined_text())
    }

    /// Gracefully shut down every server.
    pub async fn shutdown(&self) {
        let futs: Vec<_> = self.servers.values().map(|s| s.transport.shutdown()).collect();
        futures_util::future::join_all(futs).await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("MCP transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("not an MCP tool name: {0}")]
    BadToolName(String),

    #[error("MCP server not found: {0}")]
    ServerNotFound(String),

    #[error("MCP server is down: {0}")]
    ServerDown(String),

    #[error("MCP tool failed: {0}")]
    ToolFailed(String),
}

impl From<McpError> for aa_domain::error::Error {
    fn from(e: McpError) -> Self {
        aa_domain::error::Error::Other(e.to_string())
    }
}
