//! Per-thread transfer window

use crate::msgbuf::Msgbuf;
use alloc::boxed::Box;
use core::mem::size_of;
use core_types::CapId;

/// Size of a transfer window
pub const PAGE_SIZE: usize = 4096;

/// Number of inline capability slots
pub const MAX_CAP_ARGS: usize = 4;

/// Number of one-word header fields
pub const HEADER_WORDS: usize = 4;

/// Payload bytes that fit behind the header and the capability slots
pub const DATA_CAPACITY: usize =
    PAGE_SIZE - HEADER_WORDS * size_of::<u64>() - MAX_CAP_ARGS * size_of::<CapId>();

/// What marshaling had to drop to make a message fit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Truncation {
    pub dropped_bytes: usize,
    pub dropped_caps: usize,
}

impl Truncation {
    /// Returns true if nothing was dropped
    pub fn is_lossless(&self) -> bool {
        self.dropped_bytes == 0 && self.dropped_caps == 0
    }
}

/// Page-sized buffer shared between a thread and the kernel
///
/// The header fields are only meaningful while the owning thread is
/// trapped or has just returned from a trap. `destination` names the
/// invoked object on the way into the kernel and the requesting thread on
/// the way out of `await_request_msg`.
#[repr(C)]
pub struct TransferWindow {
    cap_count: u64,
    data_size: u64,
    exception_code: i64,
    destination: u64,
    caps: [CapId; MAX_CAP_ARGS],
    data: [u8; DATA_CAPACITY],
}

const _: () = assert!(size_of::<TransferWindow>() == PAGE_SIZE);

impl TransferWindow {
    /// Creates an empty window
    pub fn new() -> Self {
        Self {
            cap_count: 0,
            data_size: 0,
            exception_code: 0,
            destination: 0,
            caps: [CapId::INVALID; MAX_CAP_ARGS],
            data: [0; DATA_CAPACITY],
        }
    }

    /// Creates an empty window on the heap
    pub fn boxed() -> Box<Self> {
        Box::new(Self::new())
    }

    pub fn cap_count(&self) -> usize {
        self.cap_count as usize
    }

    pub fn data_size(&self) -> usize {
        self.data_size as usize
    }

    pub fn exception_code(&self) -> i64 {
        self.exception_code
    }

    pub fn set_exception_code(&mut self, code: i64) {
        self.exception_code = code;
    }

    pub fn destination(&self) -> u64 {
        self.destination
    }

    pub fn set_destination(&mut self, destination: u64) {
        self.destination = destination;
    }

    /// Capability ids currently carried by the window
    pub fn caps(&self) -> &[CapId] {
        &self.caps[..self.cap_count()]
    }

    /// Payload currently carried by the window
    pub fn data(&self) -> &[u8] {
        &self.data[..self.data_size()]
    }

    /// Replaces payload and capabilities, truncating both at capacity
    pub fn load(&mut self, data: &[u8], caps: &[CapId]) -> Truncation {
        let data_len = data.len().min(DATA_CAPACITY);
        self.data[..data_len].copy_from_slice(&data[..data_len]);
        self.data_size = data_len as u64;

        let cap_len = caps.len().min(MAX_CAP_ARGS);
        self.caps[..cap_len].copy_from_slice(&caps[..cap_len]);
        for slot in &mut self.caps[cap_len..] {
            *slot = CapId::INVALID;
        }
        self.cap_count = cap_len as u64;

        Truncation {
            dropped_bytes: data.len() - data_len,
            dropped_caps: caps.len() - cap_len,
        }
    }

    /// Copies an outgoing message into the window
    ///
    /// Excess payload bytes and capabilities are silently cut off; the
    /// returned [`Truncation`] says how much.
    pub fn marshal(&mut self, msg: &Msgbuf) -> Truncation {
        self.exception_code = msg.exception_code();
        self.load(msg.data(), msg.caps())
    }

    /// Copies the window's message into a local buffer
    ///
    /// The buffer's previous content is replaced. Payload beyond the
    /// buffer's capacity is cut off.
    pub fn unmarshal(&self, msg: &mut Msgbuf) -> Truncation {
        msg.clear();
        msg.set_exception_code(self.exception_code);
        let written = msg.append(self.data());
        for cap in self.caps() {
            msg.push_cap(*cap);
        }
        Truncation {
            dropped_bytes: self.data_size() - written,
            dropped_caps: 0,
        }
    }

    /// Drops payload and capabilities, keeping the header words
    pub fn clear_message(&mut self) {
        self.data_size = 0;
        self.cap_count = 0;
    }
}

impl Default for TransferWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for TransferWindow {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TransferWindow")
            .field("cap_count", &self.cap_count)
            .field("data_size", &self.data_size)
            .field("exception_code", &self.exception_code)
            .field("destination", &self.destination)
            .field("caps", &self.caps())
            .finish()
    }
}
