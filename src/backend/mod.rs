//! Platform permission backends.
//!
//! A backend is the capability that actually flips jit memory between
//! writable and execute-only for the calling execution context. Exactly one
//! concrete implementation is selected per process at registry construction,
//! by runtime host-capability detection rather than compile-time branching:
//!
//! - [`MemoryProtectionKeys`] - hardware protection keys on Linux x86_64;
//!   cheap per-thread toggling through the PKRU register, no page-table
//!   updates
//! - [`PthreadJitWriteProtect`] - the per-thread MAP_JIT toggle on Apple
//!   Silicon
//! - [`NoopBackend`] - the fallback when no mechanism applies; reports
//!   unsupported and degrades the system to "always writable"
//!
//! Toggle granularity is backend-dependent. A per-thread mechanism confines
//! the writable window to the toggling thread, so other threads concurrently
//! executing the same code are unaffected. A per-process mechanism would make
//! the window visible to all threads, which widens the attack surface; that
//! is an accepted trade-off of such a backend, not a bug.
//!
//! [`RecordingBackend`] is a shipped test double that counts permission
//! transitions; integration tests use it to pin down how many scopes a
//! compound operation really opens.
//!
//! # Examples
//!
//! ```rust
//! use jitguard::backend;
//!
//! let backend = backend::detect();
//! if !backend.is_supported() {
//!     // Writes are unconditionally permitted on this host.
//! }
//! ```

mod noop;
mod recording;

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
mod pkey;
#[cfg(all(target_vendor = "apple", target_arch = "aarch64"))]
mod pthread;

use std::sync::Arc;

use bitflags::bitflags;

pub use noop::NoopBackend;
pub use recording::RecordingBackend;

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub use pkey::MemoryProtectionKeys;
#[cfg(all(target_vendor = "apple", target_arch = "aarch64"))]
pub use pthread::PthreadJitWriteProtect;

bitflags! {
    /// Observable permission posture of jit memory for one execution context.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Posture: u8 {
        /// Stores to jit memory are permitted.
        const WRITABLE = 1 << 0;
        /// Instruction fetch from jit memory is permitted.
        const EXECUTABLE = 1 << 1;
    }
}

/// A host mechanism for toggling jit memory between writable and
/// execute-only.
///
/// Implementations must be idempotent: `set_writable` on an already writable
/// context and `set_executable` on an already execute-only context are
/// permitted in any sequence and multiplicity. The nesting discipline (only
/// the outermost scope release reverts permission) lives in
/// [`WriteScope`](crate::WriteScope), not here.
pub trait PermissionBackend: Send + Sync {
    /// Whether the host actually provides this mechanism.
    ///
    /// `false` is a legitimate, permanently queried state, not an error;
    /// callers must treat it as "writes are unconditionally permitted."
    fn is_supported(&self) -> bool;

    /// Makes jit memory writable for the calling execution context.
    fn set_writable(&self);

    /// Reverts jit memory to execute-only for the calling execution context.
    fn set_executable(&self);
}

/// Selects the best backend the host supports.
///
/// Probed once at registry construction. On Linux x86_64 this attempts to
/// allocate a memory protection key; on Apple Silicon it uses the per-thread
/// jit write-protect toggle; everywhere else (and whenever probing fails) it
/// falls back to the no-op backend.
#[allow(unreachable_code)]
pub fn detect() -> Arc<dyn PermissionBackend> {
    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    {
        if let Some(backend) = MemoryProtectionKeys::allocate() {
            log::debug!("jit write protection backend: memory protection keys");
            return Arc::new(backend);
        }
    }

    #[cfg(all(target_vendor = "apple", target_arch = "aarch64"))]
    {
        log::debug!("jit write protection backend: pthread jit write protect");
        return Arc::new(PthreadJitWriteProtect::new());
    }

    log::debug!("jit write protection backend: none, memory stays writable");
    Arc::new(NoopBackend)
}
