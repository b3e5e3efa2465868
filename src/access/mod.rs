//! Scoped, validated write access to jit memory.
//!
//! Everything that mutates a tracked region goes through this module. The
//! flow is always the same: a [`WriteScope`] makes the calling execution
//! context writable, a handle validates the target against the registry, the
//! mutation happens, and scope destruction restores execute-only state. The
//! handles compose those steps so callers cannot get them out of order:
//!
//! - [`WritableJitAllocation`] - one registered allocation; bounds- and
//!   type-checked mutators, each implicitly covered by a write scope
//! - [`WritableJitPage`] - one page; containment lookup and freeing, with a
//!   single scope spanning the handle's lifetime
//! - [`WritableFreeSpace`] - a just-freed range being turned into free-list
//!   metadata
//! - [`WritableJumpTablePair`] - two jump tables patched together under one
//!   shared scope
//!
//! # Scope discipline
//!
//! Scopes nest through a per-thread depth counter, so an inner scope's
//! release never reverts permission while an outer scope still needs write
//! access; only the outermost release toggles the backend. By default a
//! handle opens one scope for its whole lifetime. Under
//! [`WriteApiPolicy::Strict`](crate::WriteApiPolicy) the handle holds none
//! and each mutator opens its own, leaving memory execute-only between
//! calls.
//!
//! # Examples
//!
//! ```rust
//! use jitguard::{
//!     JitAllocationKind, JitRegistry, ProtectionOptions, WritableJitAllocation,
//! };
//!
//! let registry = JitRegistry::new(ProtectionOptions::default());
//! let mut backing = vec![0u64; 512];
//! let address = backing.as_mut_ptr() as usize;
//! unsafe { registry.register_page(address, 4096) };
//!
//! let allocation = WritableJitAllocation::register(
//!     &registry,
//!     address,
//!     64,
//!     JitAllocationKind::InstructionStream,
//! );
//! allocation.copy_code(0, &[0xC3]);
//! allocation.clear_bytes(1, 63);
//! ```

mod allocation;
mod freespace;
mod page;
mod pair;
mod scope;

pub use allocation::{AtomicOrdering, StoreOrdering, WritableJitAllocation};
pub use freespace::WritableFreeSpace;
pub use page::WritableJitPage;
pub use pair::WritableJumpTablePair;
pub use scope::WriteScope;
