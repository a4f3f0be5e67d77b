//! # Inter-Process Communication (IPC)
//!
//! This crate defines the memory layout that carries a synchronous message
//! across the trap boundary, and the marshaling between a thread's local
//! message buffer and that layout.
//!
//! ## Philosophy
//!
//! - **One page per thread**: every thread owns exactly one
//!   [`TransferWindow`], allocated together with the thread
//! - **Capabilities travel by name**: the window carries [`core_types::CapId`]s,
//!   which the kernel translates between protection domains
//! - **Truncate, never fail**: a message larger than the window is cut at
//!   the window's capacity and the call still goes through
//!
//! ## Architecture
//!
//! ```text
//! +-----------+-----------+----------------+-------------+
//! | cap count | data size | exception code | destination |  4 words
//! +-----------+-----------+----------------+-------------+
//! | inline capability ids (MAX_CAP_ARGS)                 |
//! +------------------------------------------------------+
//! | payload bytes up to the end of the page              |
//! +------------------------------------------------------+
//! ```
//!
//! The truncation rule is deliberate API surface: callers that care must
//! compare their message against [`DATA_CAPACITY`] and [`MAX_CAP_ARGS`]
//! before sending. [`Truncation`] reports what was dropped.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod msgbuf;
pub mod window;

pub use msgbuf::Msgbuf;
pub use window::{
    TransferWindow, Truncation, DATA_CAPACITY, HEADER_WORDS, MAX_CAP_ARGS, PAGE_SIZE,
};
