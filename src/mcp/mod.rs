//! Model Context Protocol (MCP) server handling and JSON-RPC implementations
//!
//! Envelope validation, batching, error mapping, capability negotiation and
//! the method handlers behind `/mcp`.

pub mod capabilities;
pub mod context;
pub mod processor;
pub mod rpc;
pub mod server;
