//! Memory bridge: buffer lifecycle across the host/guest memory boundary.
//!
//! ## Cycle Order
//!
//! ```text
//! allocate(req) -> copy-in(req) -> dispatch -> copy-out(resp) -> free(req) -> free(resp)
//! ```
//!
//! [`BoundaryBuffer`] is neither `Copy` nor `Clone` and [`MemoryBridge::free`]
//! takes it by value, so a region cannot be read once it has been released.
//! Every region is checked against the current size of linear memory before
//! the host touches it; a region out of range is a
//! [`BoundaryFault`](BoundaryError::BoundaryFault).

use crate::error::{BoundaryError, MemoryOp, Result};
use crate::guest::GuestExports;
use tracing::trace;

/// A region of guest linear memory owned by the guest allocator.
#[derive(Debug, PartialEq, Eq)]
pub struct BoundaryBuffer {
    ptr: u32,
    len: u32,
}

impl BoundaryBuffer {
    pub(crate) fn from_raw(ptr: u32, len: u32) -> Self {
        Self { ptr, len }
    }

    /// Offset of the region in guest memory
    pub fn ptr(&self) -> u32 {
        self.ptr
    }

    /// Length of the region in bytes
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Whether the region is zero-length
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Host-side view of one guest's allocator and memory for a single cycle.
pub struct MemoryBridge<'g, G: ?Sized> {
    guest: &'g mut G,
}

impl<'g, G: GuestExports + ?Sized> MemoryBridge<'g, G> {
    /// Borrow a guest for the duration of a cycle
    pub fn new(guest: &'g mut G) -> Self {
        Self { guest }
    }

    /// Access the underlying guest, e.g. to dispatch between copy-in and copy-out
    pub fn guest(&mut self) -> &mut G {
        self.guest
    }

    /// Allocate a guest region for `data` and copy it in.
    pub fn stage(&mut self, data: &[u8]) -> Result<BoundaryBuffer> {
        let len = u32::try_from(data.len()).map_err(|_| BoundaryError::PayloadTooLarge(data.len()))?;

        let ptr = self.guest.allocate(len)?;
        trace!(ptr, len, "allocated request buffer");

        self.check_bounds(MemoryOp::CopyIn, ptr, len)?;
        self.guest.write_memory(ptr, data)?;

        Ok(BoundaryBuffer::from_raw(ptr, len))
    }

    /// Copy a region out into a host-owned buffer.
    ///
    /// The returned bytes do not alias guest memory and stay valid across any
    /// later guest call, including ones that grow memory.
    pub fn copy_out(&mut self, buffer: &BoundaryBuffer) -> Result<Vec<u8>> {
        self.check_bounds(MemoryOp::CopyOut, buffer.ptr, buffer.len)?;
        let bytes = self.guest.read_memory(buffer.ptr, buffer.len)?;
        trace!(ptr = buffer.ptr, len = buffer.len, "copied out buffer");
        Ok(bytes)
    }

    /// Release a region back to the guest allocator.
    pub fn free(&mut self, buffer: BoundaryBuffer) -> Result<()> {
        trace!(ptr = buffer.ptr, len = buffer.len, "freeing buffer");
        self.guest.free(buffer.ptr, buffer.len)
    }

    fn check_bounds(&mut self, op: MemoryOp, ptr: u32, len: u32) -> Result<()> {
        let memory_size = self.guest.memory_size();
        let end = u64::from(ptr) + u64::from(len);
        if end > memory_size as u64 {
            return Err(BoundaryError::BoundaryFault {
                op,
                ptr,
                len,
                memory_size,
            });
        }
        Ok(())
    }
}
