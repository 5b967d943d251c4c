//! wasmtime-backed guests.
//!
//! Loads a module compiled for wasip1, resolves the calling-convention
//! exports (`memory`, `Alloc`, `Free`, `Handle` by default) and serves
//! requests through a pool of instances.
//!
//! ## Security Model
//!
//! - **Memory isolation**: each instance has its own linear memory, bounded by `max_memory`
//! - **Deny-by-default**: stdio, filesystem and environment need explicit grants
//! - **Bounded calls**: optional fuel per guest call and an epoch deadline per call
//! - **Recycling**: an instance that faulted, trapped or overran is replaced, never resumed
//!
//! ## Usage
//!
//! ```rust,ignore
//! use wasigate::wasm::{Gateway, GatewayConfig};
//! use wasigate::Request;
//!
//! let gateway = Gateway::new(GatewayConfig::new("handler.wasm").pool_size(4))?;
//! let response = gateway.handle(&Request::builder("GET", "/").build())?;
//! println!("{} {}", response.status(), response.status_text());
//! ```

mod config;
mod gateway;
mod runtime;

pub use config::{ExportNames, GatewayConfig, WasiCapabilities, DEFAULT_LISTEN_PORT};
pub use gateway::Gateway;
pub use runtime::{GuestInstance, GuestModule, WasmSandbox};
