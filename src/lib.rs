//! davhttpd - HTTP/1.x request/response engine for a WebDAV/CalDAV-style server
//!
//! This crate implements the per-connection transaction loop of a collection
//! access server: request parsing, body framing, conditional requests,
//! authentication negotiation and dispatch to per-namespace method handlers.

pub mod config;
pub mod http;

pub use config::{ServerConfig, ServerConfigBuilder};
