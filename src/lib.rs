//! # clireconcile - Reconciliation Engine for CLI-Managed Network Devices
//!
//! `clireconcile` converges the configuration of routers, switches and
//! firewalls that only speak an interactive command line. Callers describe
//! device state as a tree of typed nodes; per-vendor handlers contribute a
//! text-extraction rule (reading) and a command-rendering rule (writing);
//! the engine does the rest.
//!
//! ## Features
//!
//! - **Handler Registry**: Path patterns with wildcard keys, applicability
//!   checks, composite dispatch and build-time validated ordering
//! - **Change Planning**: Minimal ordered create/update/delete operations
//!   between two snapshots, deletes children-first and writes parents-first
//! - **Ordered Execution**: One command batch at a time over a single
//!   session, framed in config mode, halting at the first failure
//! - **Read Caching**: Each pass issues a given query at most once
//! - **Text Extraction and Templates**: Line and block scanners for show
//!   output; a small template language for command rendering
//! - **Recording/Replay**: Capture sessions to JSONL and replay them offline
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use clireconcile::config::EngineConfig;
//! use clireconcile::handler::{CommandBatch, Handler, WriteContext, Writer};
//! use clireconcile::error::HandlerError;
//! use clireconcile::path::NodePath;
//! use clireconcile::registry::{Registration, Registry};
//! use clireconcile::session::Engine;
//! use clireconcile::snapshot::{ConfigNode, Snapshot};
//!
//! struct Hostname;
//!
//! impl Writer for Hostname {
//!     fn create(&self, _: &NodePath, after: &ConfigNode, _: &WriteContext<'_>)
//!         -> Result<CommandBatch, HandlerError> {
//!         Ok(CommandBatch::from_iter([format!("hostname {}", after.get_str("name").unwrap_or_default())]))
//!     }
//!
//!     fn delete(&self, _: &NodePath, _: &ConfigNode, _: &WriteContext<'_>)
//!         -> Result<CommandBatch, HandlerError> {
//!         Ok(CommandBatch::from_iter(["no hostname"]))
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Registry::builder()
//!         .add(Registration::structural("system", "/system"))
//!         .add(Registration::new("hostname", "/system/hostname", Handler::Write(Arc::new(Hostname))))
//!         .build()?;
//!     let engine = Engine::new(Arc::new(registry), EngineConfig::for_profile("cisco"))?;
//!
//!     let after = Snapshot::new().with("/system/hostname".parse()?, ConfigNode::leaf().with("name", "edge-1"));
//!     for batch in engine.preview(&Snapshot::new(), &after)? {
//!         println!("{}", batch.lines.join("\n"));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`registry::Registry`] - Maps node paths to handler bindings
//! - [`session::Engine`] / [`session::Transaction`] - Plans and executes passes
//! - [`session::ReadCache`] - Per-pass read memo
//! - [`extract`] / [`template`] - Reading and writing helpers for handlers
//! - [`error`] - Error types for passes, handlers and registry construction
//! - [`config`] - Device profiles and engine settings

pub mod check;
pub mod config;
pub mod error;
pub mod extract;
pub mod handler;
pub mod path;
pub mod registry;
pub mod session;
pub mod snapshot;
pub mod template;
