//! WASM runtime implementation using wasmtime.
//!
//! Uses wasmtime-wasi preview1 so guests compiled for wasip1 (Go's
//! `GOOS=wasip1`, Rust's `wasm32-wasip1`) link without changes.

use super::config::{ExportNames, GatewayConfig, WasiCapabilities};
use crate::error::{BoundaryError, MemoryOp, Result};
use crate::guest::GuestExports;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};
use wasmtime::*;

/// Interval between epoch increments when deadlines are enabled.
const EPOCH_TICK_MS: u64 = 5;

/// Reactor initialisation export.
const INIT_EXPORT: &str = "_initialize";
/// Command entry export, used when there is no reactor init.
const START_EXPORT: &str = "_start";

/// Host state for the WASM store, containing WASI preview1 context.
pub struct WasmHostState {
    preview1: wasmtime_wasi::preview1::WasiP1Ctx,
    limits: StoreLimits,
}

impl WasmHostState {
    /// Get the preview1 context.
    fn preview1(&mut self) -> &mut wasmtime_wasi::preview1::WasiP1Ctx {
        &mut self.preview1
    }
}

/// Background thread advancing the engine epoch.
struct EpochTicker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EpochTicker {
    fn start(engine: Engine) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = std::thread::Builder::new()
            .name("wasigate-epoch".to_string())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_millis(EPOCH_TICK_MS));
                    engine.increment_epoch();
                }
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Compiles guest modules and instantiates them under one configuration.
pub struct WasmSandbox {
    engine: Engine,
    config: GatewayConfig,
    _ticker: Option<EpochTicker>,
}

/// A compiled guest module.
pub struct GuestModule {
    module: Module,
    name: String,
}

/// An instantiated guest with its calling-convention exports resolved.
pub struct GuestInstance {
    store: Store<WasmHostState>,
    instance: Instance,
    memory: Memory,
    alloc: TypedFunc<i32, i32>,
    free: TypedFunc<(i32, i32), ()>,
    dispatch: TypedFunc<(i32, i32), i64>,
    fuel_limit: Option<u64>,
    deadline: Option<(u64, u64)>,
}

impl WasmSandbox {
    /// Create a new sandbox with the given configuration.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        config.validate()?;
        let mut engine_config = Config::new();

        // Configure optimization
        engine_config.cranelift_opt_level(match config.optimization_level {
            0 => OptLevel::None,
            1 | 2 => OptLevel::Speed,
            _ => OptLevel::SpeedAndSize,
        });

        // Enable fuel metering if configured
        if config.fuel_limit.is_some() {
            engine_config.consume_fuel(true);
        }

        // Deadlines are epoch-based
        if config.dispatch_timeout_ms.is_some() {
            engine_config.epoch_interruption(true);
        }

        // Configure caching if path provided
        if let Some(ref cache_path) = config.cache_path {
            if let Err(e) = engine_config.cache_config_load(cache_path) {
                warn!("Failed to load cache config: {}", e);
            }
        }

        let engine = Engine::new(&engine_config)
            .map_err(|e| BoundaryError::WasmError(format!("engine creation failed: {}", e)))?;

        let ticker = match config.dispatch_timeout_ms {
            Some(_) => Some(EpochTicker::start(engine.clone())?),
            None => None,
        };

        Ok(Self {
            engine,
            config,
            _ticker: ticker,
        })
    }

    /// Load a guest module from a file (binary or text format).
    pub fn load_module(&self, path: impl AsRef<Path>) -> Result<GuestModule> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        let module = Module::from_file(&self.engine, path)
            .map_err(|e| BoundaryError::WasmError(format!("module load failed: {}", e)))?;

        debug!(module = %name, path = %path.display(), "guest module compiled");
        Ok(GuestModule { module, name })
    }

    /// Load a guest module from bytes (binary or text format).
    pub fn load_module_bytes(&self, name: &str, bytes: &[u8]) -> Result<GuestModule> {
        let module = Module::new(&self.engine, bytes)
            .map_err(|e| BoundaryError::WasmError(format!("module creation failed: {}", e)))?;

        Ok(GuestModule {
            module,
            name: name.to_string(),
        })
    }

    /// Instantiate a module, resolve its exports and run its init routine.
    pub fn instantiate(&self, module: &GuestModule) -> Result<GuestInstance> {
        let host_state = self.build_host_state(&self.config.capabilities)?;
        let mut store = Store::new(&self.engine, host_state);

        // Configure resource limits via the stored limiter
        store.limiter(|state| &mut state.limits);

        // Create linker and add WASI preview1 functions
        let mut linker: Linker<WasmHostState> = Linker::new(&self.engine);
        wasmtime_wasi::preview1::add_to_linker_sync(&mut linker, |state| state.preview1())
            .map_err(|e| BoundaryError::WasmError(format!("WASI link failed: {}", e)))?;

        let deadline = self
            .config
            .dispatch_timeout_ms
            .map(|ms| (ms.div_ceil(EPOCH_TICK_MS).max(1), ms));
        if let Some((ticks, _)) = deadline {
            // instantiation runs the start section, which needs a deadline too
            store.set_epoch_deadline(ticks);
        }
        if let Some(fuel) = self.config.fuel_limit {
            store
                .set_fuel(fuel)
                .map_err(|e| BoundaryError::WasmError(format!("fuel setup failed: {}", e)))?;
        }

        let instance = linker
            .instantiate(&mut store, &module.module)
            .map_err(|e| BoundaryError::WasmError(format!("instantiation failed: {}", e)))?;

        let exports = &self.config.exports;
        let memory = instance
            .get_memory(&mut store, &exports.memory)
            .ok_or_else(|| BoundaryError::MissingExport(exports.memory.clone()))?;
        let alloc = typed_export::<i32, i32>(&instance, &mut store, &exports.allocate)?;
        let free = typed_export::<(i32, i32), ()>(&instance, &mut store, &exports.free)?;
        let dispatch = typed_export::<(i32, i32), i64>(&instance, &mut store, &exports.dispatch)?;

        let mut guest = GuestInstance {
            store,
            instance,
            memory,
            alloc,
            free,
            dispatch,
            fuel_limit: self.config.fuel_limit,
            deadline,
        };
        guest.run_init(&module.name, self.config.terminate_on_return)?;

        debug!(module = %module.name, memory = guest.memory.data_size(&guest.store), "guest instantiated");
        Ok(guest)
    }

    /// Build host state from capabilities.
    fn build_host_state(&self, caps: &WasiCapabilities) -> Result<WasmHostState> {
        let mut builder = wasmtime_wasi::WasiCtxBuilder::new();

        // Configure stdio
        if caps.stdin {
            builder.inherit_stdin();
        }
        if caps.stdout {
            builder.inherit_stdout();
        }
        if caps.stderr {
            builder.inherit_stderr();
        }

        // Add environment variables
        for (key, value) in &caps.env_vars {
            builder.env(key, value);
        }

        // Add arguments
        builder.args(&caps.args);

        // Add preopened directories (read-only)
        for dir in &caps.preopened_dirs_ro {
            builder
                .preopened_dir(
                    dir,
                    dir.to_string_lossy(),
                    wasmtime_wasi::DirPerms::READ,
                    wasmtime_wasi::FilePerms::READ,
                )
                .map_err(|e| {
                    BoundaryError::WasmError(format!("failed to open dir {:?}: {}", dir, e))
                })?;
        }

        // Add preopened directories (read-write)
        for dir in &caps.preopened_dirs_rw {
            builder
                .preopened_dir(
                    dir,
                    dir.to_string_lossy(),
                    wasmtime_wasi::DirPerms::all(),
                    wasmtime_wasi::FilePerms::all(),
                )
                .map_err(|e| {
                    BoundaryError::WasmError(format!("failed to open dir {:?}: {}", dir, e))
                })?;
        }

        // Build the preview2 context and wrap it for preview1 compatibility
        let preview1 = builder.build_p1();

        // Create resource limits
        let limits = StoreLimitsBuilder::new()
            .memory_size(self.config.max_memory)
            .build();

        Ok(WasmHostState { preview1, limits })
    }

    /// Get the configuration.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

impl GuestModule {
    /// Get the module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get exported function names.
    pub fn exports(&self) -> impl Iterator<Item = &str> {
        self.module.exports().filter_map(|e| {
            if matches!(e.ty(), ExternType::Func(_)) {
                Some(e.name())
            } else {
                None
            }
        })
    }

    /// Calling-convention exports this module lacks or exports with the
    /// wrong kind.
    pub fn missing_exports(&self, names: &ExportNames) -> Vec<String> {
        let has = |name: &str, want_memory: bool| {
            self.module.exports().any(|e| {
                e.name() == name
                    && if want_memory {
                        matches!(e.ty(), ExternType::Memory(_))
                    } else {
                        matches!(e.ty(), ExternType::Func(_))
                    }
            })
        };

        std::iter::once((names.memory.as_str(), true))
            .chain(names.functions().into_iter().map(|f| (f, false)))
            .filter(|(name, want_memory)| !has(name, *want_memory))
            .map(|(name, _)| name.to_string())
            .collect()
    }
}

impl GuestInstance {
    /// Call an auxiliary export that takes no arguments and returns an i32.
    pub fn call_i32(&mut self, name: &str) -> Result<i32> {
        let func = typed_export::<(), i32>(&self.instance, &mut self.store, name)?;
        self.arm()?;
        func.call(&mut self.store, ())
            .map_err(|e| self.call_error(name, e))
    }

    /// Remaining fuel (if fuel metering enabled).
    pub fn remaining_fuel(&self) -> Option<u64> {
        self.store.get_fuel().ok()
    }

    /// Run `_initialize`, or `_start` when there is no reactor init.
    fn run_init(&mut self, module: &str, terminate_on_return: bool) -> Result<()> {
        let entry = [INIT_EXPORT, START_EXPORT]
            .into_iter()
            .find(|name| self.instance.get_func(&mut self.store, name).is_some());
        let Some(entry) = entry else {
            return Ok(());
        };

        let func = typed_export::<(), ()>(&self.instance, &mut self.store, entry)?;
        self.arm()?;
        match func.call(&mut self.store, ()) {
            Ok(()) => Ok(()),
            Err(e) => match self.call_error(entry, e) {
                BoundaryError::GuestExit(code) if !terminate_on_return => {
                    warn!(module, entry, code, "guest init exited, keeping instance alive");
                    Ok(())
                }
                err => Err(err),
            },
        }
    }

    /// Reset per-call fuel and deadline.
    fn arm(&mut self) -> Result<()> {
        if let Some(fuel) = self.fuel_limit {
            self.store
                .set_fuel(fuel)
                .map_err(|e| BoundaryError::WasmError(format!("fuel setup failed: {}", e)))?;
        }
        if let Some((ticks, _)) = self.deadline {
            self.store.set_epoch_deadline(ticks);
        }
        Ok(())
    }

    /// Map a failed guest call onto the error taxonomy.
    fn call_error(&self, export: &str, err: Error) -> BoundaryError {
        if let Some(exit) = err.downcast_ref::<wasmtime_wasi::I32Exit>() {
            return BoundaryError::GuestExit(exit.0);
        }
        match err.downcast_ref::<Trap>() {
            Some(Trap::Interrupt) => {
                BoundaryError::DeadlineExceeded(self.deadline.map_or(0, |(_, ms)| ms))
            }
            Some(Trap::OutOfFuel) => BoundaryError::FuelExhausted,
            Some(trap) => BoundaryError::Trap(format!("{}: {}", export, trap)),
            None => BoundaryError::Trap(format!("{}: {:#}", export, err)),
        }
    }

    fn check_bounds(&self, op: MemoryOp, offset: u32, len: usize) -> Result<usize> {
        let memory_size = self.memory.data_size(&self.store);
        let start = offset as usize;
        match start.checked_add(len) {
            Some(end) if end <= memory_size => Ok(start),
            _ => Err(BoundaryError::BoundaryFault {
                op,
                ptr: offset,
                len: len as u32,
                memory_size,
            }),
        }
    }
}

impl GuestExports for GuestInstance {
    fn allocate(&mut self, len: u32) -> Result<u32> {
        self.arm()?;
        let ptr = self
            .alloc
            .call(&mut self.store, len as i32)
            .map_err(|e| self.call_error("allocate", e))?;
        Ok(ptr as u32)
    }

    fn free(&mut self, ptr: u32, len: u32) -> Result<()> {
        self.arm()?;
        self.free
            .call(&mut self.store, (ptr as i32, len as i32))
            .map_err(|e| self.call_error("free", e))
    }

    fn dispatch(&mut self, ptr: u32, len: u32) -> Result<u64> {
        self.arm()?;
        let packed = self
            .dispatch
            .call(&mut self.store, (ptr as i32, len as i32))
            .map_err(|e| self.call_error("dispatch", e))?;
        Ok(packed as u64)
    }

    fn memory_size(&mut self) -> usize {
        self.memory.data_size(&self.store)
    }

    /// Write bytes to guest memory at the given offset.
    fn write_memory(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        let start = self.check_bounds(MemoryOp::CopyIn, offset, data.len())?;
        let mem_data = self.memory.data_mut(&mut self.store);
        mem_data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Read bytes from guest memory at the given offset.
    fn read_memory(&mut self, offset: u32, len: u32) -> Result<Vec<u8>> {
        let start = self.check_bounds(MemoryOp::CopyOut, offset, len as usize)?;
        let mem_data = self.memory.data(&self.store);
        Ok(mem_data[start..start + len as usize].to_vec())
    }
}

/// Get a typed function export.
fn typed_export<P, R>(
    instance: &Instance,
    store: &mut Store<WasmHostState>,
    name: &str,
) -> Result<TypedFunc<P, R>>
where
    P: WasmParams,
    R: WasmResults,
{
    instance
        .get_typed_func::<P, R>(&mut *store, name)
        .map_err(|_| BoundaryError::MissingExport(name.to_string()))
}
