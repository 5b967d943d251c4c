//! Gateway: a compiled guest module served through an instance pool.

use super::config::GatewayConfig;
use super::runtime::{GuestInstance, GuestModule, WasmSandbox};
use crate::error::{BoundaryError, Result};
use crate::message::{Request, Response};
use crate::pool::InstancePool;

use std::sync::Arc;
use tracing::info;

/// Serves requests by dispatching them into pooled guest instances.
pub struct Gateway {
    pool: Arc<InstancePool<GuestInstance>>,
    config: GatewayConfig,
}

impl Gateway {
    /// Compile `config.guest_module` and instantiate the pool.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        if config.guest_module.as_os_str().is_empty() {
            return Err(BoundaryError::ConfigError(
                "guest_module is not set".to_string(),
            ));
        }
        let sandbox = WasmSandbox::new(config.clone())?;
        let module = sandbox.load_module(&config.guest_module)?;
        Self::assemble(sandbox, module, config)
    }

    /// Build a gateway from an in-memory module (binary or text format).
    pub fn from_module_bytes(config: GatewayConfig, name: &str, bytes: &[u8]) -> Result<Self> {
        let sandbox = WasmSandbox::new(config.clone())?;
        let module = sandbox.load_module_bytes(name, bytes)?;
        Self::assemble(sandbox, module, config)
    }

    fn assemble(sandbox: WasmSandbox, module: GuestModule, config: GatewayConfig) -> Result<Self> {
        let missing = module.missing_exports(&config.exports);
        if let Some(name) = missing.into_iter().next() {
            return Err(BoundaryError::MissingExport(name));
        }

        info!(
            module = module.name(),
            pool_size = config.pool_size,
            fuel = ?config.fuel_limit,
            timeout_ms = ?config.dispatch_timeout_ms,
            "gateway starting"
        );

        let sandbox = Arc::new(sandbox);
        let module = Arc::new(module);
        let pool = InstancePool::new(config.pool_size, move || sandbox.instantiate(&module))?;

        Ok(Self {
            pool: Arc::new(pool),
            config,
        })
    }

    /// Run one request through a free guest instance.
    pub fn handle(&self, request: &Request) -> Result<Response> {
        self.pool.handle(request)
    }

    /// Run one request from async code without blocking the executor.
    pub async fn handle_async(&self, request: Request) -> Result<Response> {
        self.pool.clone().handle_async(request).await
    }

    /// The underlying instance pool.
    pub fn pool(&self) -> &InstancePool<GuestInstance> {
        &self.pool
    }

    /// The configuration the gateway was built with.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}
