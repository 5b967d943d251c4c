//! # wasigate
//!
//! Host side of a request/response boundary with a WebAssembly guest.
//!
//! A host request is serialised to HTTP/1.1-style text, copied into guest
//! linear memory through the guest's own allocator, dispatched to the guest's
//! handler, and the handler's reply is copied out and parsed back into a
//! structured response. Both buffers are released through the guest before
//! the cycle ends.
//!
//! ## Calling convention
//!
//! | Export | Signature | Role |
//! |--------|-----------|------|
//! | `memory` | linear memory | shared byte space |
//! | `Alloc` | `(len: i32) -> i32` | reserve `len` bytes, return the offset |
//! | `Free` | `(ptr: i32, len: i32)` | release a region |
//! | `Handle` | `(ptr: i32, len: i32) -> i64` | handle a request, return `len << 32 \| ptr` |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wasigate::wasm::{Gateway, GatewayConfig};
//! use wasigate::Request;
//!
//! let gateway = Gateway::new(GatewayConfig::new("handler.wasm"))?;
//! let request = Request::builder("POST", "/echo")
//!     .header("Content-Type", "text/plain")
//!     .body("hello")
//!     .build();
//! let response = gateway.handle(&request)?;
//! assert_eq!(response.status(), 200);
//! ```
//!
//! ## Features
//!
//! - `wasm` - wasmtime-backed guests, module loading and instance pooling (default)
//!
//! Without `wasm` the codec, bridge, dispatch and pool still work against any
//! [`GuestExports`] implementation.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod adapter;
pub mod bridge;
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod guest;
pub mod message;
pub mod pool;
pub mod stats;

#[cfg(feature = "wasm")]
pub mod wasm;

#[cfg(test)]
mod testing;

// Re-export main types
pub use adapter::{handle, run_cycle};
pub use bridge::{BoundaryBuffer, MemoryBridge};
pub use codec::{decode, decode_response, encode_request, Decoded};
pub use dispatch::{dispatch, PackedResult};
pub use error::{BoundaryError, MemoryOp, Result};
pub use guest::GuestExports;
pub use message::{Headers, Request, RequestBuilder, Response};
pub use pool::{GuestFactory, InstancePool, PoolMetrics};
pub use stats::CycleStats;

#[cfg(feature = "wasm")]
pub use wasm::{Gateway, GatewayConfig, WasiCapabilities, WasmSandbox};
