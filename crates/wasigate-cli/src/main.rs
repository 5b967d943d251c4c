//! wasigate Command-Line Interface
//!
//! This CLI provides tools for:
//! - Sending a single request through a guest module
//! - Checking a module against the calling convention
//! - Measuring dispatch cycle latency
//! - Printing the effective gateway configuration
//!
//! Nothing here listens on a socket; `listen_port` is carried for the
//! surrounding server.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};
use wasigate::wasm::{Gateway, GatewayConfig, WasmSandbox};
use wasigate::{BoundaryError, CycleStats, Request};

#[derive(Parser)]
#[command(name = "wasigate")]
#[command(author, version, about = "Drive request/response WebAssembly guests", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(flatten)]
    gateway: GatewayArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Options layered over the JSON config file.
#[derive(Args)]
struct GatewayArgs {
    /// JSON configuration file
    #[arg(short, long, env = "WASIGATE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Guest module (.wasm or .wat)
    #[arg(short, long, env = "WASIGATE_MODULE", global = true)]
    module: Option<PathBuf>,

    /// Port for the surrounding server
    #[arg(long, env = "WASIGATE_LISTEN_PORT", global = true)]
    listen_port: Option<u16>,

    /// Let the guest's init routine terminate the process
    #[arg(
        long,
        env = "WASIGATE_TERMINATE_ON_RETURN",
        global = true,
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    terminate_on_return: bool,

    /// Number of guest instances
    #[arg(long, env = "WASIGATE_POOL_SIZE", global = true)]
    pool_size: Option<usize>,

    /// Fuel granted to each guest call
    #[arg(long, env = "WASIGATE_FUEL", global = true)]
    fuel: Option<u64>,

    /// Deadline for each guest call in milliseconds
    #[arg(long, env = "WASIGATE_TIMEOUT_MS", global = true)]
    timeout_ms: Option<u64>,

    /// Maximum linear memory per instance in MiB
    #[arg(long, env = "WASIGATE_MAX_MEMORY_MB", global = true)]
    max_memory_mb: Option<usize>,

    /// Let the guest write to stdout and stderr
    #[arg(long, global = true)]
    guest_logs: bool,

    /// Directory the guest may read (repeatable)
    #[arg(long = "dir", global = true)]
    dirs_ro: Vec<PathBuf>,

    /// Directory the guest may read and write (repeatable)
    #[arg(long = "dir-rw", global = true)]
    dirs_rw: Vec<PathBuf>,

    /// wasmtime cache configuration file
    #[arg(long, env = "WASIGATE_CACHE_CONFIG", global = true)]
    cache_config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one request through the guest and print the response
    Invoke {
        /// Request method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Request path, optionally with a query string
        #[arg(default_value = "/")]
        path: String,

        /// Header in "Name: value" form (repeatable)
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Request body, or @file to read it from a file
        #[arg(short, long)]
        data: Option<String>,

        /// Print the status line and headers
        #[arg(short, long)]
        include: bool,
    },

    /// List module exports and check the calling convention
    Inspect,

    /// Measure dispatch cycle latency
    Bench {
        /// Number of cycles per thread
        #[arg(short, long, default_value = "1000")]
        iterations: usize,

        /// Concurrent callers
        #[arg(short, long, default_value = "1")]
        threads: usize,

        /// Request path
        #[arg(long, default_value = "/")]
        path: String,

        /// Request body size in bytes
        #[arg(long, default_value = "0")]
        body_size: usize,
    },

    /// Print the effective configuration as JSON
    Config,
}

impl GatewayArgs {
    fn resolve(&self) -> Result<GatewayConfig> {
        let mut config = match &self.config {
            Some(path) => GatewayConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => GatewayConfig::default(),
        };

        if let Some(module) = &self.module {
            config.guest_module = module.clone();
        }
        if let Some(port) = self.listen_port {
            config.listen_port = port;
        }
        if self.terminate_on_return {
            config.terminate_on_return = true;
        }
        if let Some(size) = self.pool_size {
            config.pool_size = size;
        }
        if let Some(fuel) = self.fuel {
            config.fuel_limit = Some(fuel);
        }
        if let Some(ms) = self.timeout_ms {
            config.dispatch_timeout_ms = Some(ms);
        }
        if let Some(mb) = self.max_memory_mb {
            let Some(bytes) = mb.checked_mul(1024 * 1024) else {
                bail!("--max-memory-mb {} is too large", mb);
            };
            config.max_memory = bytes;
        }
        if let Some(path) = &self.cache_config {
            config = config.cache(path);
        }

        let mut caps = std::mem::take(&mut config.capabilities);
        if self.guest_logs {
            caps = caps.stdout(true).stderr(true);
        }
        for dir in &self.dirs_ro {
            caps = caps.preopened_dir_ro(dir);
        }
        for dir in &self.dirs_rw {
            caps = caps.preopened_dir_rw(dir);
        }
        config.capabilities = caps;

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    let Some((name, value)) = raw.split_once(':') else {
        bail!("Header must be \"Name: value\", got {:?}", raw);
    };
    Ok((name.trim().to_string(), value.trim_start().to_string()))
}

fn read_body(data: Option<String>) -> Result<Vec<u8>> {
    match data {
        None => Ok(Vec::new()),
        Some(data) => match data.strip_prefix('@') {
            Some(path) => std::fs::read(path).with_context(|| format!("Failed to read body from {}", path)),
            None => Ok(data.into_bytes()),
        },
    }
}

fn build_request(method: &str, target: &str, headers: &[String], body: Vec<u8>) -> Result<Request> {
    let (path, query) = match target.find('?') {
        Some(i) => target.split_at(i),
        None => (target, ""),
    };

    let mut builder = Request::builder(method, path).query(query).body(body);
    for raw in headers {
        let (name, value) = parse_header(raw)?;
        builder = builder.header(name, value);
    }
    Ok(builder.build())
}

fn open_gateway(config: GatewayConfig) -> Result<Gateway> {
    let module = config.guest_module.display().to_string();
    Gateway::new(config).with_context(|| format!("Failed to start guest {}", module))
}

fn cmd_invoke(
    config: GatewayConfig,
    method: String,
    path: String,
    headers: Vec<String>,
    data: Option<String>,
    include: bool,
) -> Result<()> {
    let request = build_request(&method, &path, &headers, read_body(data)?)?;
    let gateway = open_gateway(config)?;

    let start = Instant::now();
    let response = gateway.handle(&request).context("Dispatch cycle failed")?;
    info!(
        status = response.status(),
        elapsed_us = start.elapsed().as_micros() as u64,
        "response received"
    );

    let mut out = std::io::stdout().lock();
    if include {
        writeln!(out, "{} {}", response.status(), response.status_text())?;
        for (name, value) in response.headers().iter() {
            writeln!(out, "{}: {}", name, value)?;
        }
        writeln!(out)?;
    }
    out.write_all(&response.into_body())?;
    out.flush()?;
    Ok(())
}

fn cmd_inspect(config: GatewayConfig) -> Result<()> {
    let sandbox = WasmSandbox::new(config.clone()).context("Failed to create runtime")?;
    let module = sandbox
        .load_module(&config.guest_module)
        .with_context(|| format!("Failed to load {}", config.guest_module.display()))?;

    println!("=== Guest Module: {} ===", module.name());
    println!("Function exports:");
    for name in module.exports() {
        println!("  {}", name);
    }

    let missing = module.missing_exports(&config.exports);
    if !missing.is_empty() {
        bail!("Module does not follow the calling convention, missing: {}", missing.join(", "));
    }
    println!(
        "Calling convention: ok (memory={}, allocate={}, free={}, dispatch={})",
        config.exports.memory, config.exports.allocate, config.exports.free, config.exports.dispatch
    );
    Ok(())
}

fn cmd_bench(config: GatewayConfig, iterations: usize, threads: usize, path: String, body_size: usize) -> Result<()> {
    let request = build_request("POST", &path, &[], vec![b'x'; body_size])?;
    let gateway = open_gateway(config)?;
    let threads = threads.max(1);

    println!("=== Dispatch Cycle Benchmark ===");
    println!("Instances: {}", gateway.pool().size());
    println!("Threads:   {}", threads);
    println!("Cycles:    {}", iterations * threads);

    let start = Instant::now();
    let per_thread: Vec<CycleStats> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                scope.spawn(|| {
                    let mut stats = CycleStats::new();
                    for _ in 0..iterations {
                        let t = Instant::now();
                        match gateway.handle(&request) {
                            Ok(_) => stats.record(t.elapsed().as_micros() as u64),
                            Err(e) => {
                                warn!("cycle failed: {}", e);
                                stats.record_failure();
                            }
                        }
                    }
                    stats
                })
            })
            .collect();
        handles.into_iter().filter_map(|h| h.join().ok()).collect()
    });
    let elapsed = start.elapsed();

    let mut stats = CycleStats::new();
    for thread_stats in per_thread {
        stats.merge(thread_stats);
    }
    let metrics = gateway.pool().metrics();

    println!("\nLatency:    {}", stats.summary());
    println!(
        "Throughput: {:.0} cycles/s",
        stats.count() as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    println!(
        "Pool:       cycles={} failures={} reinstantiations={}",
        metrics.cycles, metrics.failures, metrics.reinstantiations
    );
    Ok(())
}

fn cmd_config(config: GatewayConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config = cli.gateway.resolve()?;
    if !matches!(cli.command, Commands::Config) && config.guest_module.as_os_str().is_empty() {
        bail!("No guest module given (use --module or WASIGATE_MODULE)");
    }

    match cli.command {
        Commands::Invoke {
            method,
            path,
            headers,
            data,
            include,
        } => cmd_invoke(config, method, path, headers, data, include),

        Commands::Inspect => cmd_inspect(config),

        Commands::Bench {
            iterations,
            threads,
            path,
            body_size,
        } => cmd_bench(config, iterations, threads, path, body_size),

        Commands::Config => cmd_config(config),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Err(e) => match e.downcast_ref::<BoundaryError>() {
            Some(BoundaryError::GuestExit(code)) => {
                warn!("guest init exited with status {}, terminating", code);
                std::process::exit(*code);
            }
            _ => Err(e),
        },
        ok => ok,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_splits_query() {
        let headers = vec!["X-Id: 7".to_string(), "Accept:text/plain".to_string()];
        let request = build_request("GET", "/search?q=rust&n=2", &headers, Vec::new()).unwrap();
        assert_eq!(request.path(), "/search");
        assert_eq!(request.query(), "?q=rust&n=2");
        assert_eq!(request.headers().get("x-id"), Some("7"));
        assert_eq!(request.headers().get("accept"), Some("text/plain"));
    }

    #[test]
    fn test_parse_header_rejects_missing_colon() {
        assert!(parse_header("NoColonHere").is_err());
        assert_eq!(
            parse_header("Name:   spaced value ").unwrap(),
            ("Name".to_string(), "spaced value ".to_string())
        );
    }

    #[test]
    fn test_read_body_inline() {
        assert!(read_body(None).unwrap().is_empty());
        assert_eq!(read_body(Some("hello".to_string())).unwrap(), b"hello");
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::parse_from([
            "wasigate",
            "--module",
            "guest.wasm",
            "--pool-size",
            "4",
            "--timeout-ms",
            "100",
            "--guest-logs",
            "config",
        ]);
        let config = cli.gateway.resolve().unwrap();
        assert_eq!(config.guest_module, PathBuf::from("guest.wasm"));
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.dispatch_timeout_ms, Some(100));
        assert!(config.capabilities.stdout);
        assert!(config.capabilities.stderr);
        assert!(!config.capabilities.stdin);
    }

    #[test]
    fn test_capability_and_cache_flags() {
        let cli = Cli::parse_from([
            "wasigate",
            "--dir",
            "/srv/static",
            "--dir-rw",
            "/tmp/scratch",
            "--cache-config",
            "cache.toml",
            "config",
        ]);
        let config = cli.gateway.resolve().unwrap();
        assert_eq!(config.capabilities.preopened_dirs_ro, vec![PathBuf::from("/srv/static")]);
        assert_eq!(config.capabilities.preopened_dirs_rw, vec![PathBuf::from("/tmp/scratch")]);
        assert_eq!(config.cache_path, Some(PathBuf::from("cache.toml")));
        assert!(!config.capabilities.stdout);
    }

    #[test]
    fn test_terminate_on_return_env_accepts_boolish_values() {
        // the only test touching this variable
        for (raw, expected) in [("1", true), ("yes", true), ("true", true), ("0", false), ("off", false)] {
            std::env::set_var("WASIGATE_TERMINATE_ON_RETURN", raw);
            let parsed = Cli::try_parse_from(["wasigate", "config"]);
            std::env::remove_var("WASIGATE_TERMINATE_ON_RETURN");

            let config = parsed.unwrap().gateway.resolve().unwrap();
            assert_eq!(config.terminate_on_return, expected, "{}", raw);
        }
    }

    #[test]
    fn test_oversized_memory_rejected() {
        let huge = usize::MAX.to_string();
        let cli = Cli::parse_from(["wasigate", "--max-memory-mb", huge.as_str(), "config"]);
        let err = cli.gateway.resolve().unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        let cli = Cli::parse_from(["wasigate", "--pool-size", "0", "config"]);
        assert!(cli.gateway.resolve().is_err());
    }
}
