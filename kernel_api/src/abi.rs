//! Trap ABI
//!
//! A kernel call is one call-id word plus up to [`MAX_CALL_ARGS`] argument
//! words; the kernel answers with one signed word. Which registers carry
//! the words is up to the architecture and invisible here.

use core_types::CapId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum number of argument words after the call id
pub const MAX_CALL_ARGS: usize = 5;

/// The call completed
pub const RESULT_OK: isize = 0;

/// The call was rejected or its partner went away
pub const RESULT_FAILED: isize = -1;

/// A blocking call was cancelled before it completed
pub const RESULT_CANCELLED: isize = -2;

/// Kernel call numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(usize)]
pub enum CallId {
    PauseCurrentThread = 1,
    ResumeLocalThread = 2,
    YieldThread = 3,
    SendRequestMsg = 4,
    SendReplyMsg = 5,
    AwaitRequestMsg = 6,
    AwaitSignal = 7,
    SubmitSignal = 8,
    AckSignal = 9,
    KillSignalContext = 10,
    AckCap = 11,
    DeleteCap = 12,
    UpdatePd = 13,
}

impl CallId {
    pub fn from_word(word: usize) -> Option<Self> {
        let id = match word {
            1 => CallId::PauseCurrentThread,
            2 => CallId::ResumeLocalThread,
            3 => CallId::YieldThread,
            4 => CallId::SendRequestMsg,
            5 => CallId::SendReplyMsg,
            6 => CallId::AwaitRequestMsg,
            7 => CallId::AwaitSignal,
            8 => CallId::SubmitSignal,
            9 => CallId::AckSignal,
            10 => CallId::KillSignalContext,
            11 => CallId::AckCap,
            12 => CallId::DeleteCap,
            13 => CallId::UpdatePd,
            _ => return None,
        };
        Some(id)
    }

    pub fn as_word(self) -> usize {
        self as usize
    }
}

/// Errors decoding a raw call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AbiError {
    #[error("Unknown call id {0}")]
    UnknownCall(usize),

    #[error("Argument {index} of {call:?} out of range")]
    BadArgument { call: CallId, index: usize },
}

/// A kernel call as the trap delivers it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawCall {
    pub id: usize,
    pub args: [usize; MAX_CALL_ARGS],
}

impl RawCall {
    pub fn new(id: CallId) -> Self {
        Self {
            id: id.as_word(),
            args: [0; MAX_CALL_ARGS],
        }
    }

    /// Sets argument word `index`
    ///
    /// # Panics
    ///
    /// Panics if `index >= MAX_CALL_ARGS`.
    pub fn with_arg(mut self, index: usize, word: usize) -> Self {
        self.args[index] = word;
        self
    }
}

/// A decoded kernel call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    PauseCurrentThread,
    /// Cancels whatever the target waits for, or wakes it from a pause
    ResumeLocalThread { thread: CapId },
    /// Gives up the rest of the quantum, optionally waking a paused thread
    YieldThread { donate_to: Option<CapId> },
    SendRequestMsg { destination: CapId },
    SendReplyMsg { await_next: bool },
    AwaitRequestMsg,
    AwaitSignal { receiver: CapId },
    SubmitSignal { context: CapId, count: u32 },
    AckSignal { context: CapId },
    KillSignalContext { context: CapId },
    AckCap { cap: CapId },
    DeleteCap { cap: CapId },
    /// Flushes the translations of a domain on every processor
    UpdatePd { pd: CapId },
}

impl Syscall {
    pub fn call_id(&self) -> CallId {
        match self {
            Syscall::PauseCurrentThread => CallId::PauseCurrentThread,
            Syscall::ResumeLocalThread { .. } => CallId::ResumeLocalThread,
            Syscall::YieldThread { .. } => CallId::YieldThread,
            Syscall::SendRequestMsg { .. } => CallId::SendRequestMsg,
            Syscall::SendReplyMsg { .. } => CallId::SendReplyMsg,
            Syscall::AwaitRequestMsg => CallId::AwaitRequestMsg,
            Syscall::AwaitSignal { .. } => CallId::AwaitSignal,
            Syscall::SubmitSignal { .. } => CallId::SubmitSignal,
            Syscall::AckSignal { .. } => CallId::AckSignal,
            Syscall::KillSignalContext { .. } => CallId::KillSignalContext,
            Syscall::AckCap { .. } => CallId::AckCap,
            Syscall::DeleteCap { .. } => CallId::DeleteCap,
            Syscall::UpdatePd { .. } => CallId::UpdatePd,
        }
    }

    pub fn encode(&self) -> RawCall {
        let raw = RawCall::new(self.call_id());
        match *self {
            Syscall::PauseCurrentThread | Syscall::AwaitRequestMsg => raw,
            Syscall::ResumeLocalThread { thread } => raw.with_arg(0, thread.as_word()),
            Syscall::YieldThread { donate_to } => {
                raw.with_arg(0, donate_to.unwrap_or(CapId::INVALID).as_word())
            }
            Syscall::SendRequestMsg { destination } => raw.with_arg(0, destination.as_word()),
            Syscall::SendReplyMsg { await_next } => raw.with_arg(0, await_next as usize),
            Syscall::AwaitSignal { receiver } => raw.with_arg(0, receiver.as_word()),
            Syscall::SubmitSignal { context, count } => raw
                .with_arg(0, context.as_word())
                .with_arg(1, count as usize),
            Syscall::AckSignal { context } | Syscall::KillSignalContext { context } => {
                raw.with_arg(0, context.as_word())
            }
            Syscall::AckCap { cap } | Syscall::DeleteCap { cap } => raw.with_arg(0, cap.as_word()),
            Syscall::UpdatePd { pd } => raw.with_arg(0, pd.as_word()),
        }
    }

    pub fn decode(raw: &RawCall) -> Result<Self, AbiError> {
        let call = CallId::from_word(raw.id).ok_or(AbiError::UnknownCall(raw.id))?;
        let cap = |index: usize| {
            CapId::from_word(raw.args[index]).ok_or(AbiError::BadArgument { call, index })
        };
        let syscall = match call {
            CallId::PauseCurrentThread => Syscall::PauseCurrentThread,
            CallId::ResumeLocalThread => Syscall::ResumeLocalThread { thread: cap(0)? },
            CallId::YieldThread => {
                let target = cap(0)?;
                Syscall::YieldThread {
                    donate_to: target.is_valid().then_some(target),
                }
            }
            CallId::SendRequestMsg => Syscall::SendRequestMsg {
                destination: cap(0)?,
            },
            CallId::SendReplyMsg => Syscall::SendReplyMsg {
                await_next: raw.args[0] != 0,
            },
            CallId::AwaitRequestMsg => Syscall::AwaitRequestMsg,
            CallId::AwaitSignal => Syscall::AwaitSignal { receiver: cap(0)? },
            CallId::SubmitSignal => Syscall::SubmitSignal {
                context: cap(0)?,
                count: u32::try_from(raw.args[1])
                    .map_err(|_| AbiError::BadArgument { call, index: 1 })?,
            },
            CallId::AckSignal => Syscall::AckSignal { context: cap(0)? },
            CallId::KillSignalContext => Syscall::KillSignalContext { context: cap(0)? },
            CallId::AckCap => Syscall::AckCap { cap: cap(0)? },
            CallId::DeleteCap => Syscall::DeleteCap { cap: cap(0)? },
            CallId::UpdatePd => Syscall::UpdatePd { pd: cap(0)? },
        };
        Ok(syscall)
    }
}

/// Payload the kernel writes into the window of a thread receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalData {
    /// Opaque value chosen when the context was created
    pub imprint: u64,
    /// Submissions coalesced into this delivery
    pub count: u32,
}

impl SignalData {
    pub const SIZE: usize = 12;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[..8].copy_from_slice(&self.imprint.to_le_bytes());
        bytes[8..].copy_from_slice(&self.count.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let imprint = u64::from_le_bytes(bytes[..8].try_into().ok()?);
        let count = u32::from_le_bytes(bytes[8..Self::SIZE].try_into().ok()?);
        Some(Self { imprint, count })
    }
}
