//! Boundary adapter: one structured request in, one structured response out.

use crate::bridge::MemoryBridge;
use crate::codec::{decode, encode_request};
use crate::dispatch::dispatch;
use crate::error::Result;
use crate::guest::GuestExports;
use crate::message::{Request, Response};

use std::time::Instant;
use tracing::{debug, warn};

/// Run one dispatch cycle for `request` against `guest`.
///
/// Always yields a [`Response`] for well-formed boundary traffic; a reply the
/// codec cannot parse becomes `502 Bad Gateway`. Errors are boundary faults
/// and runtime failures, after which the guest must not be reused.
///
/// The caller must hold exclusive access to `guest` for the whole call.
pub fn handle<G: GuestExports + ?Sized>(guest: &mut G, request: &Request) -> Result<Response> {
    let start = Instant::now();
    let payload = encode_request(request);
    let raw = run_cycle(guest, &payload)?;

    let decoded = decode(&raw);
    if decoded.is_malformed() {
        warn!(
            method = request.method(),
            path = request.path(),
            reply_len = raw.len(),
            "guest reply is not a valid response head, answering 502"
        );
    }
    let response = decoded.into_response();

    debug!(
        method = request.method(),
        path = request.path(),
        status = response.status(),
        elapsed_us = start.elapsed().as_micros() as u64,
        "cycle complete"
    );
    Ok(response)
}

/// The byte-level cycle: stage `payload`, dispatch, copy the reply out, then
/// free both regions.
///
/// The reply is copied out before either region is freed, and the returned
/// bytes are host-owned.
pub fn run_cycle<G: GuestExports + ?Sized>(guest: &mut G, payload: &[u8]) -> Result<Vec<u8>> {
    let mut bridge = MemoryBridge::new(guest);

    let request = bridge.stage(payload)?;
    let response = dispatch(bridge.guest(), &request)?;
    let raw = bridge.copy_out(&response)?;

    bridge.free(request)?;
    bridge.free(response)?;
    Ok(raw)
}
