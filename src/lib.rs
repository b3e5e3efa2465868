// Copyright 2025 the jitguard developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]

//! # jitguard
//!
//! Scoped write-XOR-execute (W^X) enforcement for memory that holds
//! jit-compiled machine code. Pages of generated code must never be
//! simultaneously writable and executable across the threads that can reach
//! them: an attacker able to write into executable memory gains code
//! execution. `jitguard` is the permission-toggling and
//! allocation-bookkeeping layer that keeps that invariant while still
//! letting the compiler patch its output in place.
//!
//! ## Features
//!
//! - **🔒 RAII write scopes** - memory is writable exactly as long as a
//!   scope is alive, with safe nesting through a per-thread depth counter
//! - **📏 Validated mutation** - every write is bounds- and type-checked
//!   against a registered allocation before any byte moves
//! - **🧵 Per-thread windows** - hardware protection keys and Apple's
//!   per-thread jit toggle confine the writable window to the writing
//!   thread; concurrent executors are unaffected
//! - **🧩 Pluggable backends** - one polymorphic capability selected at
//!   startup by host detection, with a no-op fallback on hosts without any
//!   mechanism
//! - **💥 Fatal contract violations** - out-of-bounds writes, stale lookups,
//!   and mismatched frees terminate the process instead of corrupting
//!   executable memory
//!
//! ## Quick Start
//!
//! ```rust
//! use jitguard::{
//!     JitAllocationKind, JitRegistry, ProtectionOptions, WritableJitAllocation,
//! };
//!
//! // One registry per process, configured once at startup.
//! let registry = JitRegistry::new(ProtectionOptions::default());
//!
//! // The embedder maps jit pages itself and registers them.
//! let mut backing = vec![0u64; 512];
//! let page_address = backing.as_mut_ptr() as usize;
//! unsafe { registry.register_page(page_address, 4096) };
//!
//! // Produce a 64-byte code object: register, fill, publish.
//! let allocation = WritableJitAllocation::register(
//!     &registry,
//!     page_address,
//!     64,
//!     JitAllocationKind::InstructionStream,
//! );
//! allocation.copy_code(16, &[0x55, 0x48, 0x89, 0xE5, 0xC3]);
//! allocation.clear_bytes(21, 43);
//! drop(allocation); // scope releases, memory is execute-only again
//! ```
//!
//! ## Architecture
//!
//! - [`registry`] - bookkeeping: which pages are tracked, which allocations
//!   live on them, resolved under a per-page lock
//! - [`access`] - the write path: [`WriteScope`], the per-allocation,
//!   per-page, freed-range, and paired-table handles
//! - [`backend`] - platform permission mechanisms and runtime detection
//! - [`slots`] - raw typed stores with the ordering contracts concurrent
//!   readers rely on, plus trusted-space pointer compression
//! - [`layout`] - the closed table of dispatchable header fields
//! - [`config`] - process-wide flags, fixed at startup and passed explicitly
//! - [`prelude`] - curated re-exports for glob imports
//!
//! ## Error Handling
//!
//! There are exactly two categories. A missing host capability is a state,
//! not an error: [`Enforcement::is_supported`] reports it, toggles become
//! no-ops, and writes are unconditionally permitted. A contract violation is
//! typed ([`Violation`]), logged, handed to an optional
//! [`set_violation_handler`] hook for structured crash reporting, and then
//! terminates the process. Nothing in between exists: this layer is invoked
//! only by trusted compiler internals and offers no partial-failure
//! semantics.
//!
//! ## Thread Safety
//!
//! The registry is fully concurrent: page lookups traverse a lock-free
//! ordered index and each page guards its allocations with its own lock,
//! held only inside individual operations. Write scopes and handles are
//! thread-local values; the writable window they open is per-thread on the
//! hardware backends.

#[macro_use]
pub(crate) mod macros;

pub(crate) mod error;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

pub mod access;
pub mod backend;
pub mod config;
pub mod layout;
pub mod prelude;
pub mod registry;
pub mod slots;

/// The typed contract-violation category and its reporting hook.
///
/// See [`Violation`] for the full catalog of conditions that terminate the
/// process.
pub use error::{set_violation_handler, Violation, ViolationHandler};

/// The write path: scope and handles.
///
/// Every mutation of tracked jit memory flows through one of these.
pub use access::{
    AtomicOrdering, StoreOrdering, WritableFreeSpace, WritableJitAllocation, WritableJitPage,
    WritableJumpTablePair, WriteScope,
};

/// Bookkeeping types for tracked pages and allocations.
pub use registry::{
    JitAllocation, JitAllocationKind, JitPageRef, JitRegistry, JumpTablePages, Region,
};

/// Process-wide configuration, fixed at startup.
pub use config::{Enforcement, ProtectionOptions, WriteApiPolicy};

/// Raw address type used throughout the crate.
pub use slots::Address;
