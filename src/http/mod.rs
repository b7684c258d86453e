//! HTTP Transport layer for the Model Context Protocol
//!
//! Provides the external API routing: the `/mcp` listener, metadata endpoints
//! and the comments REST surface.

pub mod comments;
pub mod handlers;
