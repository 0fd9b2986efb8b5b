//! Model Context Protocol (MCP) session for the agent tool bridge.

pub mod client;

pub use client::{McpHttpConnector, McpToolSession};
