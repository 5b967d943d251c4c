//! In-memory guest used by unit tests.
//!
//! Records every boundary operation and panics on use-after-free, double free
//! or mismatched lengths, so ordering mistakes fail loudly.

use crate::dispatch::PackedResult;
use crate::error::{BoundaryError, Result};
use crate::guest::GuestExports;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const MEMORY_SIZE: usize = 256 * 1024;
const HEAP_BASE: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    Allocate { ptr: u32, len: u32 },
    CopyIn { ptr: u32, len: u32 },
    Dispatch { ptr: u32, len: u32 },
    CopyOut { ptr: u32, len: u32 },
    Free { ptr: u32, len: u32 },
}

pub(crate) enum Reply {
    /// Bytes the guest writes into a fresh region of its own
    Bytes(Vec<u8>),
    /// A raw packed value returned as-is
    Packed(u64),
    /// The guest traps
    Trap,
}

type ReplyFn = Box<dyn FnMut(&[u8]) -> Reply + Send>;

pub(crate) struct FakeGuest {
    memory: Vec<u8>,
    next: u32,
    live: HashMap<u32, u32>,
    events: Vec<Event>,
    journal: Option<Arc<Mutex<Vec<Event>>>>,
    reply: ReplyFn,
    broken_allocator: bool,
    dispatch_delay: Option<Duration>,
}

impl FakeGuest {
    pub(crate) fn new(reply: impl FnMut(&[u8]) -> Reply + Send + 'static) -> Self {
        Self {
            memory: vec![0; MEMORY_SIZE],
            next: HEAP_BASE,
            live: HashMap::new(),
            events: Vec::new(),
            journal: None,
            reply: Box::new(reply),
            broken_allocator: false,
            dispatch_delay: None,
        }
    }

    /// Replies `200 OK` with the request bytes as body.
    pub(crate) fn echo() -> Self {
        Self::new(|request| {
            let mut reply = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\n".to_vec();
            reply.extend_from_slice(request);
            Reply::Bytes(reply)
        })
    }

    pub(crate) fn with_broken_allocator(mut self) -> Self {
        self.broken_allocator = true;
        self
    }

    pub(crate) fn with_journal(mut self, journal: Arc<Mutex<Vec<Event>>>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub(crate) fn with_dispatch_delay(mut self, delay: Duration) -> Self {
        self.dispatch_delay = Some(delay);
        self
    }

    pub(crate) fn events(&self) -> &[Event] {
        &self.events
    }

    pub(crate) fn live_allocations(&self) -> usize {
        self.live.len()
    }

    pub(crate) fn peek(&self, ptr: u32, len: u32) -> &[u8] {
        &self.memory[ptr as usize..(ptr + len) as usize]
    }

    /// Overwrite all of memory, as a later guest call reusing freed space would.
    pub(crate) fn scribble(&mut self) {
        self.memory.fill(0xAA);
    }

    fn record(&mut self, event: Event) {
        self.events.push(event);
        if let Some(journal) = &self.journal {
            journal.lock().unwrap().push(event);
        }
    }

    fn bump(&mut self, len: u32) -> u32 {
        let ptr = self.next;
        // keep regions 8-aligned like a real allocator
        self.next += (len + 7) & !7;
        assert!(self.next as usize <= self.memory.len(), "test heap exhausted");
        self.live.insert(ptr, len);
        ptr
    }

    fn assert_live(&self, ptr: u32, len: u32, what: &str) {
        if len == 0 {
            return;
        }
        let ok = self
            .live
            .iter()
            .any(|(&p, &l)| ptr >= p && ptr + len <= p + l);
        assert!(ok, "{} of region {}+{} that is not allocated", what, ptr, len);
    }
}

impl GuestExports for FakeGuest {
    fn allocate(&mut self, len: u32) -> Result<u32> {
        let ptr = if self.broken_allocator {
            (self.memory.len() - 1) as u32
        } else {
            self.bump(len)
        };
        self.record(Event::Allocate { ptr, len });
        Ok(ptr)
    }

    fn free(&mut self, ptr: u32, len: u32) -> Result<()> {
        match self.live.remove(&ptr) {
            Some(l) => assert_eq!(l, len, "free of {} with mismatched length", ptr),
            None => panic!("double free of {}", ptr),
        }
        self.record(Event::Free { ptr, len });
        Ok(())
    }

    fn dispatch(&mut self, ptr: u32, len: u32) -> Result<u64> {
        self.assert_live(ptr, len, "dispatch");
        self.record(Event::Dispatch { ptr, len });
        if let Some(delay) = self.dispatch_delay {
            std::thread::sleep(delay);
        }

        let request = self.peek(ptr, len).to_vec();
        match (self.reply)(&request) {
            Reply::Bytes(bytes) => {
                let out_len = bytes.len() as u32;
                let out = self.bump(out_len);
                self.memory[out as usize..(out + out_len) as usize].copy_from_slice(&bytes);
                Ok(PackedResult::pack(out, out_len).into_raw())
            }
            Reply::Packed(raw) => Ok(raw),
            Reply::Trap => Err(BoundaryError::Trap("unreachable executed".to_string())),
        }
    }

    fn memory_size(&mut self) -> usize {
        self.memory.len()
    }

    fn write_memory(&mut self, offset: u32, data: &[u8]) -> Result<()> {
        self.assert_live(offset, data.len() as u32, "copy-in");
        let start = offset as usize;
        self.memory[start..start + data.len()].copy_from_slice(data);
        self.record(Event::CopyIn {
            ptr: offset,
            len: data.len() as u32,
        });
        Ok(())
    }

    fn read_memory(&mut self, offset: u32, len: u32) -> Result<Vec<u8>> {
        self.assert_live(offset, len, "copy-out");
        let bytes = self.peek(offset, len).to_vec();
        self.record(Event::CopyOut { ptr: offset, len });
        Ok(bytes)
    }
}

/// Check that `events` is a sequence of whole, non-interleaved cycles.
pub(crate) fn assert_whole_cycles(events: &[Event]) {
    assert_eq!(events.len() % 6, 0, "partial cycle in {:?}", events);
    for cycle in events.chunks(6) {
        match cycle {
            [Event::Allocate { ptr: p, len: l }, Event::CopyIn { ptr: p2, len: l2 }, Event::Dispatch { ptr: p3, len: l3 }, Event::CopyOut { ptr: q, len: m }, Event::Free { ptr: p4, len: l4 }, Event::Free { ptr: q2, len: m2 }]
                if p == p2 && p == p3 && p == p4 && l == l2 && l == l3 && l == l4 && q == q2 && m == m2 => {}
            other => panic!("cycle out of order: {:?}", other),
        }
    }
}
