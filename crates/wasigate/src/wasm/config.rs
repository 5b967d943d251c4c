//! Configuration for the wasmtime-backed gateway.

use crate::error::{BoundaryError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// WASI capability grants for guests built against wasip1.
///
/// Following the deny-by-default security model, all capabilities
/// start disabled and must be explicitly enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WasiCapabilities {
    /// Allow access to stdin
    pub stdin: bool,

    /// Allow access to stdout
    pub stdout: bool,

    /// Allow access to stderr
    pub stderr: bool,

    /// Directories to pre-open for filesystem access (read-only)
    pub preopened_dirs_ro: Vec<PathBuf>,

    /// Directories to pre-open for filesystem access (read-write)
    pub preopened_dirs_rw: Vec<PathBuf>,

    /// Environment variables to expose
    pub env_vars: Vec<(String, String)>,

    /// Command-line arguments to pass
    pub args: Vec<String>,
}

impl WasiCapabilities {
    /// Create capabilities with nothing allowed (maximum isolation)
    pub fn none() -> Self {
        Self::default()
    }

    /// Let the guest write diagnostics to the host's stdout and stderr
    pub fn logging() -> Self {
        Self {
            stdout: true,
            stderr: true,
            ..Default::default()
        }
    }

    /// Create capabilities with stdio allowed
    pub fn with_stdio() -> Self {
        Self {
            stdin: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        }
    }

    /// Builder: enable stdout
    pub fn stdout(mut self, allow: bool) -> Self {
        self.stdout = allow;
        self
    }

    /// Builder: enable stderr
    pub fn stderr(mut self, allow: bool) -> Self {
        self.stderr = allow;
        self
    }

    /// Builder: add read-only directory
    pub fn preopened_dir_ro(mut self, path: impl Into<PathBuf>) -> Self {
        self.preopened_dirs_ro.push(path.into());
        self
    }

    /// Builder: add read-write directory
    pub fn preopened_dir_rw(mut self, path: impl Into<PathBuf>) -> Self {
        self.preopened_dirs_rw.push(path.into());
        self
    }

    /// Builder: add environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    /// Builder: add command-line argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Names of the guest exports the calling convention relies on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportNames {
    /// Linear memory
    pub memory: String,
    /// `(len: i32) -> i32`
    pub allocate: String,
    /// `(ptr: i32, len: i32)`
    pub free: String,
    /// `(ptr: i32, len: i32) -> i64`
    pub dispatch: String,
}

impl Default for ExportNames {
    fn default() -> Self {
        Self {
            memory: "memory".to_string(),
            allocate: "Alloc".to_string(),
            free: "Free".to_string(),
            dispatch: "Handle".to_string(),
        }
    }
}

impl ExportNames {
    /// Function exports, in the order they are resolved
    pub fn functions(&self) -> [&str; 3] {
        [
            self.allocate.as_str(),
            self.free.as_str(),
            self.dispatch.as_str(),
        ]
    }
}

/// Setup-time configuration for a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Where to load the guest module from (`.wasm` or `.wat`)
    pub guest_module: PathBuf,

    /// Port for the surrounding server
    pub listen_port: u16,

    /// Whether the guest's init routine may terminate the host when it exits
    pub terminate_on_return: bool,

    /// Export names of the calling convention
    pub exports: ExportNames,

    /// Number of independent guest instances
    pub pool_size: usize,

    /// WASI capability configuration
    pub capabilities: WasiCapabilities,

    /// Maximum linear memory per instance in bytes (default = 256MB)
    pub max_memory: usize,

    /// Fuel granted to each guest call
    pub fuel_limit: Option<u64>,

    /// Deadline for a single guest call, enforced by recycling the instance
    pub dispatch_timeout_ms: Option<u64>,

    /// Cranelift optimization level (0-3)
    pub optimization_level: u8,

    /// wasmtime cache configuration file
    pub cache_path: Option<PathBuf>,
}

/// Default port of the surrounding server.
pub const DEFAULT_LISTEN_PORT: u16 = 8000;

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            guest_module: PathBuf::new(),
            listen_port: DEFAULT_LISTEN_PORT,
            terminate_on_return: false,
            exports: ExportNames::default(),
            pool_size: 1,
            capabilities: WasiCapabilities::none(),
            max_memory: 256 * 1024 * 1024, // 256 MB
            fuel_limit: None,
            dispatch_timeout_ms: None,
            optimization_level: 2,
            cache_path: None,
        }
    }
}

impl GatewayConfig {
    /// Config for a guest module with defaults for everything else
    pub fn new(guest_module: impl Into<PathBuf>) -> Self {
        Self {
            guest_module: guest_module.into(),
            ..Default::default()
        }
    }

    /// Create config for development/debugging
    pub fn development(guest_module: impl Into<PathBuf>) -> Self {
        Self {
            capabilities: WasiCapabilities::with_stdio(),
            optimization_level: 0, // Faster compilation
            ..Self::new(guest_module)
        }
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| {
            BoundaryError::ConfigError(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Reject option values the runtime cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(BoundaryError::ConfigError(
                "pool_size must be at least 1".to_string(),
            ));
        }
        if self.dispatch_timeout_ms == Some(0) {
            return Err(BoundaryError::ConfigError(
                "dispatch_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Builder: set listen port
    pub fn listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    /// Builder: allow the init routine to terminate the host
    pub fn terminate_on_return(mut self, allow: bool) -> Self {
        self.terminate_on_return = allow;
        self
    }

    /// Builder: set export names
    pub fn exports(mut self, exports: ExportNames) -> Self {
        self.exports = exports;
        self
    }

    /// Builder: set number of instances
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Builder: set capabilities
    pub fn capabilities(mut self, caps: WasiCapabilities) -> Self {
        self.capabilities = caps;
        self
    }

    /// Builder: set max memory
    pub fn max_memory(mut self, bytes: usize) -> Self {
        self.max_memory = bytes;
        self
    }

    /// Builder: set fuel limit
    pub fn fuel_limit(mut self, fuel: u64) -> Self {
        self.fuel_limit = Some(fuel);
        self
    }

    /// Builder: set per-call deadline
    pub fn dispatch_timeout_ms(mut self, ms: u64) -> Self {
        self.dispatch_timeout_ms = Some(ms);
        self
    }

    /// Builder: set optimization level
    pub fn optimize(mut self, level: u8) -> Self {
        self.optimization_level = level.min(3);
        self
    }

    /// Builder: set cache path
    pub fn cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }
}
