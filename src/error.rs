use std::sync::OnceLock;

use thiserror::Error;

use crate::registry::JitAllocationKind;

/// Typed description of a W^X contract violation.
///
/// Every variant describes a programming or memory-model error in the caller:
/// writes outside a registered region, lookups of untracked memory, mismatched
/// frees, and the like. None of them are recoverable. The crate never returns
/// a `Violation` as an ordinary error value; the single exit path is the
/// internal reporting routine reached through the mutators and registry
/// operations, which logs the violation and terminates.
///
/// The type exists so an integrator can still observe *which* contract was
/// broken before the process goes down: a process-wide handler installed with
/// [`set_violation_handler`] receives the violation first and may emit a
/// structured crash report or abort outright.
///
/// # Examples
///
/// ```rust
/// use jitguard::{set_violation_handler, Violation};
///
/// fn report(violation: &Violation) {
///     eprintln!("jit memory contract broken: {violation}");
/// }
///
/// set_violation_handler(report);
/// ```
#[derive(Error, Debug)]
pub enum Violation {
    /// A mutator targeted bytes outside its allocation.
    ///
    /// Raised before any byte moves. The offset is relative to the start of
    /// the allocation the handle was constructed for.
    #[error("write of {len} bytes at offset {offset} escapes allocation of {size} bytes")]
    OutOfBounds {
        /// Offset of the first byte the write would have touched
        offset: usize,
        /// Length of the rejected write
        len: usize,
        /// Size of the allocation the handle covers
        size: usize,
    },

    /// An atomic store targeted an address that is not naturally aligned.
    ///
    /// Plain header-slot writes tolerate unaligned addresses; the release and
    /// relaxed-atomic paths do not, since the hardware gives no atomicity
    /// guarantee for split accesses.
    #[error("atomic write at {address:#x} is not aligned to {required} bytes")]
    MisalignedWrite {
        /// Target address of the rejected store
        address: usize,
        /// Required natural alignment in bytes
        required: usize,
    },

    /// No tracked jit page covers the requested range.
    #[error("no tracked jit page covers [{address:#x}, +{size:#x})")]
    UnregisteredPage {
        /// Start of the requested range
        address: usize,
        /// Length of the requested range
        size: usize,
    },

    /// A page registration overlaps a range that is already tracked.
    #[error("jit page [{address:#x}, +{size:#x}) overlaps an already tracked page")]
    OverlappingPage {
        /// Start of the rejected registration
        address: usize,
        /// Length of the rejected registration
        size: usize,
    },

    /// A lookup found no allocation matching the address, size, and kind.
    ///
    /// This guards against writing into untracked or already freed memory,
    /// which would be a memory-safety contract violation rather than an
    /// ordinary failure.
    #[error("no {kind} allocation of {size} bytes registered at {address:#x}")]
    UnregisteredAllocation {
        /// Requested start address
        address: usize,
        /// Requested size
        size: usize,
        /// Requested allocation kind
        kind: JitAllocationKind,
    },

    /// A registration overlaps a live allocation on the same page.
    #[error("allocation [{address:#x}, +{size:#x}) overlaps a live allocation on the same page")]
    OverlappingAllocation {
        /// Start of the rejected registration
        address: usize,
        /// Length of the rejected registration
        size: usize,
    },

    /// A registration is not fully contained in its page's tracked range.
    #[error("allocation [{address:#x}, +{size:#x}) escapes its jit page")]
    AllocationEscapesPage {
        /// Start of the rejected registration
        address: usize,
        /// Length of the rejected registration
        size: usize,
    },

    /// A containment lookup found no allocation covering the address.
    #[error("no allocation covers address {address:#x}")]
    AddressNotCovered {
        /// The address no live allocation contains
        address: usize,
    },

    /// A freed range does not exactly match one registered allocation.
    ///
    /// Freeing a sub-range of an allocation, a range spanning two
    /// allocations, or a range that was never registered all land here.
    #[error("freed range [{address:#x}, +{size:#x}) does not match a registered allocation")]
    UnmatchedFree {
        /// Start of the rejected free
        address: usize,
        /// Length of the rejected free
        size: usize,
    },

    /// A page was unregistered while allocations on it were still live.
    #[error("jit page at {address:#x} still holds {count} live allocations")]
    LiveAllocations {
        /// Start of the page
        address: usize,
        /// Number of allocations still registered on it
        count: usize,
    },

    /// An offset-dispatched header write computed an offset that is not one
    /// of the dispatchable protected-pointer fields.
    #[error("offset {offset} is not a dispatchable header field")]
    IllegalHeaderOffset {
        /// The offset that failed the closed-table lookup
        offset: usize,
    },

    /// An operation required an allocation of a different kind.
    #[error("operation requires a {expected} allocation, found {found}")]
    KindMismatch {
        /// Kind the operation is defined for
        expected: JitAllocationKind,
        /// Kind the allocation was registered with
        found: JitAllocationKind,
    },

    /// A release-ordered store was requested for the map word.
    ///
    /// The map word is always written through the relaxed-atomic path because
    /// concurrent collectors read it without synchronization; a release store
    /// there has no defined pairing and is rejected.
    #[error("release ordering is not defined for the map word")]
    MapWordOrdering,

    /// A protected-pointer store was requested at the map-word offset.
    #[error("the map word is not a protected-pointer field")]
    ProtectedMapWord,
}

/// Handler invoked with the violation before the process terminates.
pub type ViolationHandler = fn(&Violation);

static HANDLER: OnceLock<ViolationHandler> = OnceLock::new();

/// Installs a process-wide handler that observes contract violations before
/// termination.
///
/// The handler runs exactly once per violation, ahead of the terminating
/// panic, and is the place for an integrator to emit a structured crash
/// report or call [`std::process::abort`] directly. It cannot suppress the
/// violation: if it returns, the process still goes down.
///
/// Only the first installation wins; returns `false` if a handler was
/// already set.
///
/// # Examples
///
/// ```rust
/// use jitguard::set_violation_handler;
///
/// set_violation_handler(|violation| {
///     eprintln!("fatal: {violation}");
/// });
/// ```
pub fn set_violation_handler(handler: ViolationHandler) -> bool {
    HANDLER.set(handler).is_ok()
}

/// Reports a contract violation and terminates.
///
/// Logs the violation together with the call site that raised it, hands it to
/// the installed [`ViolationHandler`] if any, then panics with the rendered
/// violation. Embedders that must not unwind should build with
/// `panic = "abort"` or abort from the handler.
#[cold]
#[track_caller]
pub(crate) fn die(violation: Violation) -> ! {
    let location = std::panic::Location::caller();
    log::error!("jit memory contract violation at {location}: {violation}");
    if let Some(handler) = HANDLER.get() {
        handler(&violation);
    }
    panic!("{violation}");
}
