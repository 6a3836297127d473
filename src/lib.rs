//! A standalone Debug Adapter Protocol (DAP) backend.
//!
//! This crate is a language-agnostic debugging control plane: it frames DAP messages
//! over a duplex byte stream, supervises an adapter child process, drives the DAP
//! launch/configuration handshake, tracks session state, and maintains an authoritative
//! breakpoint set reconciled with the adapter. Callers interact with a single
//! [`backend::DebugBackend`] handle and never see DAP request/response plumbing.
//!
//! # Quick start
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::path::Path;
//! use debugmcp_dap::backend::DebugBackend;
//! use debugmcp_dap::config::ConfigLoader;
//! use debugmcp_dap::types::RequestKind;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config_path = ConfigLoader::search_upward(Path::new(".")).expect("no config file found");
//! let loader = ConfigLoader::load(&config_path)?;
//!
//! let backend = DebugBackend::new(loader.config().adapters.clone());
//! let script = Path::new("script.py");
//! let cfg = loader.provide_debug_config(script, Path::new("."));
//! assert_eq!(cfg.request, RequestKind::Launch);
//!
//! if backend.start_debugging(Path::new("."), cfg).await {
//!     backend.step_over().await?;
//!     backend.stop_debugging().await;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`codec`]: Content-Length message framing over any `AsyncRead`/`AsyncWrite` pair.
//! - [`protocol`]: DAP wire types (requests, responses, events, and their bodies).
//! - [`client`]: sequence numbering, request/response correlation, and typed request
//!   wrappers built on the codec.
//! - [`supervisor`]: spawns and supervises the adapter child process and its stdio.
//! - [`tracker`]: the authoritative in-memory session state machine and output buffer.
//! - [`backend`]: orchestrates the above into the uniform contract callers use.
//! - [`config`]: loads and validates the JSON configuration file and derives
//!   per-file debug configurations from it.
//! - [`types`]: portable types exchanged across the backend boundary, decoupled from
//!   the DAP wire encoding.
//! - [`error`]: the [`error::DapError`] enum returned by fallible operations.
//!
//! This crate never initializes a global `tracing` subscriber — that is left to the
//! binary that embeds it.

pub mod backend;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod protocol;
pub mod supervisor;
pub mod tracker;
pub mod types;

pub use backend::DebugBackend;
pub use config::ConfigLoader;
pub use error::DapError;
