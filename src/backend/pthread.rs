use crate::backend::PermissionBackend;

/// Per-thread jit write-protect backend (Apple Silicon).
///
/// Apple's `MAP_JIT` mappings are execute-only by default; the
/// `pthread_jit_write_protect_np` call flips the calling thread between
/// write access and execute access without touching page tables. The window
/// is strictly per-thread, so concurrent executors of the same code are
/// unaffected by a toggling writer.
#[derive(Debug, Default, Clone, Copy)]
pub struct PthreadJitWriteProtect;

impl PthreadJitWriteProtect {
    /// The toggle is unconditionally available on Apple Silicon hosts.
    pub fn new() -> Self {
        PthreadJitWriteProtect
    }
}

impl PermissionBackend for PthreadJitWriteProtect {
    fn is_supported(&self) -> bool {
        true
    }

    fn set_writable(&self) {
        unsafe {
            libc::pthread_jit_write_protect_np(0);
        }
    }

    fn set_executable(&self) {
        unsafe {
            libc::pthread_jit_write_protect_np(1);
        }
    }
}
