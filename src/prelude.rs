//! # jitguard Prelude
//!
//! Convenient re-exports of the most commonly used types for glob imports.
//!
//! The prelude covers the whole write path: the registry, the scope, the
//! four write handles, and the configuration values their constructors take.
//!
//! # Example
//!
//! ```rust,no_run
//! use jitguard::prelude::*;
//!
//! let registry = JitRegistry::new(ProtectionOptions::default());
//! let page = WritableJitPage::new(&registry, 0x7f00_0000_0000, 4096);
//! ```

pub use crate::access::{
    AtomicOrdering, StoreOrdering, WritableFreeSpace, WritableJitAllocation, WritableJitPage,
    WritableJumpTablePair, WriteScope,
};
pub use crate::backend::{PermissionBackend, Posture};
pub use crate::config::{Enforcement, ProtectionOptions, WriteApiPolicy};
pub use crate::error::{set_violation_handler, Violation};
pub use crate::registry::{
    JitAllocation, JitAllocationKind, JitPageRef, JitRegistry, JumpTablePages, Region,
};
pub use crate::slots::Address;
