//! MCP tool surface for Sidekick: tool handlers and the stdio JSON-RPC server.

pub mod mcp_server_runtime;
pub mod tool_handlers;

pub use mcp_server_runtime::*;
pub use tool_handlers::*;
