//! Thread-local message buffer

use alloc::vec::Vec;
use core_types::CapId;

/// A message as a user thread builds or reads it
///
/// The buffer has a fixed payload capacity chosen by its owner. It may be
/// larger than the transfer window, in which case marshaling truncates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msgbuf {
    capacity: usize,
    data: Vec<u8>,
    caps: Vec<CapId>,
    exception_code: i64,
}

impl Msgbuf {
    /// Creates an empty buffer holding at most `capacity` payload bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            data: Vec::with_capacity(capacity),
            caps: Vec::new(),
            exception_code: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn caps(&self) -> &[CapId] {
        &self.caps
    }

    pub fn exception_code(&self) -> i64 {
        self.exception_code
    }

    pub fn set_exception_code(&mut self, code: i64) {
        self.exception_code = code;
    }

    /// Appends payload bytes up to the capacity, returning how many fit
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let room = self.capacity - self.data.len();
        let n = bytes.len().min(room);
        self.data.extend_from_slice(&bytes[..n]);
        n
    }

    pub fn push_cap(&mut self, cap: CapId) {
        self.caps.push(cap);
    }

    /// Empties payload and capabilities and resets the exception code
    pub fn clear(&mut self) {
        self.data.clear();
        self.caps.clear();
        self.exception_code = 0;
    }
}
