use std::cell::Cell;
use std::marker::PhantomData;

use crate::config::Enforcement;

thread_local! {
    static WRITE_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// RAII guard that makes jit memory writable for the calling execution
/// context.
///
/// Construction transitions the context to writable unless the process runs
/// jitless (no page is ever made executable, so there is nothing to guard)
/// without the force-write-protection override; destruction restores
/// execute-only state. On hosts without a permission mechanism both
/// transitions are no-ops and memory stays writable.
///
/// Scopes nest freely on one thread: an internal per-thread depth counter
/// makes acquisition idempotent, and only the release of the outermost scope
/// actually reverts permission. Handles rely on this to compose scopes
/// internally without tracking what their callers already hold.
///
/// The guard is not `Send`. The writable window is thread state on the
/// per-thread backends, and the depth counter that keeps nesting sound is
/// thread-local.
///
/// # Examples
///
/// ```rust
/// use jitguard::{JitRegistry, ProtectionOptions, WriteScope};
///
/// let registry = JitRegistry::new(ProtectionOptions::default());
/// {
///     let _scope = WriteScope::new(registry.enforcement());
///     // jit memory is writable for this thread
/// }
/// // and execute-only again here
/// ```
#[derive(Debug)]
pub struct WriteScope {
    enforcement: Enforcement,
    engaged: bool,
    _not_send: PhantomData<*const ()>,
}

impl WriteScope {
    /// Opens a scope, making jit memory writable for this thread.
    pub fn new(enforcement: &Enforcement) -> Self {
        let engaged = enforcement.wants_toggle();
        if engaged {
            WRITE_DEPTH.with(|depth| {
                let current = depth.get();
                if current == 0 {
                    enforcement.backend().set_writable();
                    log::trace!("jit memory writable");
                }
                depth.set(current + 1);
            });
        }
        WriteScope {
            enforcement: enforcement.clone(),
            engaged,
            _not_send: PhantomData,
        }
    }

    /// Current nesting depth on this thread. Zero means execute-only.
    #[cfg(test)]
    pub(crate) fn depth() -> usize {
        WRITE_DEPTH.with(Cell::get)
    }
}

impl Drop for WriteScope {
    fn drop(&mut self) {
        if !self.engaged {
            return;
        }
        WRITE_DEPTH.with(|depth| {
            let current = depth.get();
            debug_assert!(current > 0, "write scope released below depth zero");
            depth.set(current - 1);
            if current == 1 {
                self.enforcement.backend().set_executable();
                log::trace!("jit memory execute-only");
            }
        });
    }
}
