//! Dispatch protocol: the single guest entry point and its packed result.
//!
//! The guest returns one `u64` describing the response region:
//!
//! ```text
//!  63                32 31                 0
//! +--------------------+--------------------+
//! |   length (u32)     |   pointer (u32)    |
//! +--------------------+--------------------+
//! ```
//!
//! The value is unpacked once, right after the call, into a
//! [`BoundaryBuffer`]. Responses are therefore limited to 4 GiB and guest
//! addressing to 32 bits.

use crate::bridge::BoundaryBuffer;
use crate::error::Result;
use crate::guest::GuestExports;
use tracing::debug;

const LOW_HALF: u64 = 0xFFFF_FFFF;

/// The raw 64-bit value returned by the guest's dispatch export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedResult(u64);

impl PackedResult {
    /// Wrap a raw value returned by the guest
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Pack a pointer and length the way a guest does
    pub fn pack(ptr: u32, len: u32) -> Self {
        Self(u64::from(len) << 32 | u64::from(ptr))
    }

    /// The raw value
    pub fn into_raw(self) -> u64 {
        self.0
    }

    /// Response pointer, the low half
    pub fn ptr(self) -> u32 {
        (self.0 & LOW_HALF) as u32
    }

    /// Response length, the high half
    pub fn len(self) -> u32 {
        ((self.0 >> 32) & LOW_HALF) as u32
    }

    /// Whether the described region is zero-length
    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// Unpack into the response region. The guest owns it until freed.
    pub fn into_buffer(self) -> BoundaryBuffer {
        BoundaryBuffer::from_raw(self.ptr(), self.len())
    }
}

/// Call the guest entry point with a staged request region.
///
/// Blocks until the guest returns. The request region is not released here;
/// freeing it stays with the caller. The returned region is freshly allocated
/// by the guest and must be copied out, then freed, by the caller.
pub fn dispatch<G: GuestExports + ?Sized>(
    guest: &mut G,
    request: &BoundaryBuffer,
) -> Result<BoundaryBuffer> {
    let packed = PackedResult::from_raw(guest.dispatch(request.ptr(), request.len())?);
    debug!(
        request_ptr = request.ptr(),
        request_len = request.len(),
        response_ptr = packed.ptr(),
        response_len = packed.len(),
        "dispatch returned"
    );
    Ok(packed.into_buffer())
}
