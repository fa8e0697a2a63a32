//! astrbot-mcp: an MCP server for a running AstrBot instance
//!
//! The binary exposes each function in [`tools`] as an MCP tool over stdio.
//! The library is split the same way the server works:
//!
//! - [`config`]: settings from env vars and an optional TOML file
//! - [`client`]: the dashboard HTTP API, including SSE and uploads
//! - [`tools`]: one function per MCP tool, each returning a JSON object
//! - [`jsonpath`], [`logparse`], [`market`], [`message`]: the pure logic the
//!   tools are built from

pub mod client;
pub mod config;
pub mod error;
pub mod jsonpath;
pub mod logging;
pub mod logparse;
pub mod market;
pub mod message;
pub mod tools;

pub use client::AstrBotClient;
pub use config::Settings;
pub use error::ApiError;
