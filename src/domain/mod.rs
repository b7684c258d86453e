//! Planning artifacts and their MCP integrations
//!
//! Provides the requirements hierarchy, the inline-comment anchor engine and
//! the tools and resources exposed over the MCP protocol.

pub mod anchors;
pub mod model;
pub mod resources;
pub mod tools;
pub mod uri;
pub mod utils;
