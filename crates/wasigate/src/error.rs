//! Error types for the boundary crate.

use thiserror::Error;

/// Which side of a cycle touched guest memory when a fault was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryOp {
    /// Host write of the encoded request.
    CopyIn,
    /// Host read of the guest's response.
    CopyOut,
}

impl std::fmt::Display for MemoryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryOp::CopyIn => f.write_str("copy-in"),
            MemoryOp::CopyOut => f.write_str("copy-out"),
        }
    }
}

/// Boundary error type
#[derive(Error, Debug)]
pub enum BoundaryError {
    /// A region addressed outside guest linear memory.
    ///
    /// Signals allocator or protocol corruption. Never recovered inside a cycle.
    #[error("boundary fault during {op}: region {ptr:#x}+{len} exceeds guest memory of {memory_size} bytes")]
    BoundaryFault {
        /// Operation that addressed the region
        op: MemoryOp,
        /// Start of the region in guest memory
        ptr: u32,
        /// Length of the region in bytes
        len: u32,
        /// Size of guest linear memory at the time of the access
        memory_size: usize,
    },

    /// Encoded request cannot be described by a 32-bit length
    #[error("request payload of {0} bytes exceeds the 32-bit boundary limit")]
    PayloadTooLarge(usize),

    /// The guest does not export something the calling convention needs
    #[error("guest export '{0}' not found or has the wrong type")]
    MissingExport(String),

    /// The guest trapped while running
    #[error("guest trapped: {0}")]
    Trap(String),

    /// The dispatch call overran its deadline and was interrupted
    #[error("dispatch exceeded its deadline of {0} ms")]
    DeadlineExceeded(u64),

    /// Fuel metering stopped the guest
    #[error("guest ran out of fuel")]
    FuelExhausted,

    /// The guest's entry routine asked to terminate the host
    #[error("guest exited with status {0}")]
    GuestExit(i32),

    /// WebAssembly runtime error (engine, module, linking, instantiation)
    #[error("WASM runtime error: {0}")]
    WasmError(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A blocking dispatch task could not be joined
    #[error("dispatch task failed: {0}")]
    TaskFailed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BoundaryError {
    /// Whether the guest instance that produced this error must be discarded.
    ///
    /// Everything raised during a cycle leaves the instance's allocator in an
    /// unknown state, so only setup errors keep it.
    pub fn poisons_instance(&self) -> bool {
        !matches!(
            self,
            BoundaryError::PayloadTooLarge(_) | BoundaryError::ConfigError(_)
        )
    }
}

/// Result type alias for boundary operations
pub type Result<T> = std::result::Result<T, BoundaryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_message_names_region() {
        let err = BoundaryError::BoundaryFault {
            op: MemoryOp::CopyOut,
            ptr: 0xffff_0000,
            len: 16,
            memory_size: 65536,
        };
        let msg = err.to_string();
        assert!(msg.contains("copy-out"));
        assert!(msg.contains("0xffff0000+16"));
        assert!(msg.contains("65536"));
    }

    #[test]
    fn test_poisons_instance() {
        assert!(BoundaryError::FuelExhausted.poisons_instance());
        assert!(BoundaryError::Trap("unreachable".into()).poisons_instance());
        assert!(!BoundaryError::PayloadTooLarge(1 << 33).poisons_instance());
    }
}
