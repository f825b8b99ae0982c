//! knowledge-mcp: MCP server for knowledge search, analytics and health
//!
//! This library exposes a knowledge base to AI assistants through the Model
//! Context Protocol. The protocol layer never implements business logic
//! itself; it delegates to collaborator services.
//!
//! # Architecture
//!
//! - **Tools**: search within or across collections, compare collections,
//!   catalog-wide summaries, component health and usage analytics
//! - **Resources**: `resource://` addressed catalogs, documents and system
//!   snapshots, with change subscriptions
//! - **Transports**: newline-delimited stdio for a single local client, or
//!   HTTP with server-sent events for many concurrent clients
//!
//! # Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`error`]: Error types
//! - [`mcp`]: MCP protocol implementation
//! - [`services`]: Collaborator contracts and in-memory backends

pub mod config;
pub mod error;
pub mod mcp;
pub mod services;
