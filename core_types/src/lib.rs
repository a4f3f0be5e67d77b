//! # Core Types
//!
//! This crate defines the identifier types shared by the kernel, its trap
//! ABI and the user-level runtime.
//!
//! ## Philosophy
//!
//! - **Small integers, strongly typed**: every kernel object is named by a
//!   bounded integer, but a thread id can never be confused with a
//!   capability id or a processor number.
//! - **No ambient authority**: user code only ever holds [`CapId`]s, which
//!   are meaningful solely inside the protection domain that owns them.
//!
//! ## Key Types
//!
//! - [`ObjectId`]: kernel-global identifier of a kernel object
//! - [`CapId`]: domain-local name for a capability
//! - [`ObjectRef`]: an object identifier tagged with its [`ObjectKind`]
//! - [`CpuId`], [`AddressSpaceId`], [`IrqNumber`]

pub mod capability;
pub mod ids;

pub use capability::{CapId, ObjectKind, ObjectRef};
pub use ids::{AddressSpaceId, CpuId, IrqNumber, ObjectId};
