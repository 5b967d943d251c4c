//! The guest handle: everything the boundary needs from one guest instance.

use crate::error::Result;

/// Handle bundling a guest's linear memory accessor with its allocate, free
/// and dispatch exports.
///
/// One value of this type is one guest instance with one allocator. It is
/// passed into the adapter explicitly; nothing here is process-global, which
/// is what allows [`InstancePool`](crate::pool::InstancePool) to hold several.
///
/// `write_memory` and `read_memory` are host-side operations on linear memory,
/// not guest calls. Implementations may assume the region was already
/// bounds-checked by the [`MemoryBridge`](crate::bridge::MemoryBridge) against
/// [`memory_size`](GuestExports::memory_size), but must still refuse
/// out-of-range access rather than panic.
pub trait GuestExports {
    /// Ask the guest to allocate `len` bytes; returns the region's offset
    fn allocate(&mut self, len: u32) -> Result<u32>;

    /// Ask the guest to release a region previously returned by `allocate`
    /// or described by a dispatch result
    fn free(&mut self, ptr: u32, len: u32) -> Result<()>;

    /// Call the single guest entry point with a request region, returning the
    /// raw packed result
    fn dispatch(&mut self, ptr: u32, len: u32) -> Result<u64>;

    /// Current size of linear memory in bytes
    fn memory_size(&mut self) -> usize;

    /// Copy `data` into linear memory at `offset`
    fn write_memory(&mut self, offset: u32, data: &[u8]) -> Result<()>;

    /// Copy `len` bytes out of linear memory at `offset` into a host-owned buffer
    fn read_memory(&mut self, offset: u32, len: u32) -> Result<Vec<u8>>;
}
