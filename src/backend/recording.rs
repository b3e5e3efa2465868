use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::backend::{PermissionBackend, Posture};

/// Test double that records permission transitions instead of performing
/// them.
///
/// Counts every `set_writable` and `set_executable` call and tracks the
/// posture the last call left behind. Tests use the counters to verify scope
/// discipline, e.g. that a paired-table patch opens exactly one writable
/// window no matter how many mutations happen inside it.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use jitguard::backend::RecordingBackend;
/// use jitguard::{JitRegistry, ProtectionOptions, WriteScope};
///
/// let backend = Arc::new(RecordingBackend::new());
/// let registry = JitRegistry::with_backend(ProtectionOptions::default(), backend.clone());
///
/// {
///     let _outer = WriteScope::new(registry.enforcement());
///     let _inner = WriteScope::new(registry.enforcement());
/// }
/// // Nested scopes collapse onto one hardware transition each way.
/// assert_eq!(backend.writable_transitions(), 1);
/// assert_eq!(backend.executable_transitions(), 1);
/// ```
#[derive(Debug)]
pub struct RecordingBackend {
    supported: bool,
    writable_calls: AtomicUsize,
    executable_calls: AtomicUsize,
    posture: AtomicU8,
}

impl RecordingBackend {
    /// A recording backend that reports itself as supported.
    pub fn new() -> Self {
        RecordingBackend {
            supported: true,
            writable_calls: AtomicUsize::new(0),
            executable_calls: AtomicUsize::new(0),
            posture: AtomicU8::new(Posture::EXECUTABLE.bits()),
        }
    }

    /// A recording backend that reports itself as unsupported.
    ///
    /// Calls are still counted, which lets tests assert that unsupported
    /// hosts keep memory permanently writable.
    pub fn unsupported() -> Self {
        RecordingBackend {
            supported: false,
            posture: AtomicU8::new((Posture::WRITABLE | Posture::EXECUTABLE).bits()),
            ..Self::new()
        }
    }

    /// Number of `set_writable` calls observed.
    pub fn writable_transitions(&self) -> usize {
        self.writable_calls.load(Ordering::Relaxed)
    }

    /// Number of `set_executable` calls observed.
    pub fn executable_transitions(&self) -> usize {
        self.executable_calls.load(Ordering::Relaxed)
    }

    /// The posture the most recent call left behind.
    pub fn posture(&self) -> Posture {
        Posture::from_bits_truncate(self.posture.load(Ordering::Relaxed))
    }
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionBackend for RecordingBackend {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn set_writable(&self) {
        self.writable_calls.fetch_add(1, Ordering::Relaxed);
        if self.supported {
            self.posture.store(Posture::WRITABLE.bits(), Ordering::Relaxed);
        }
    }

    fn set_executable(&self) {
        self.executable_calls.fetch_add(1, Ordering::Relaxed);
        if self.supported {
            self.posture
                .store(Posture::EXECUTABLE.bits(), Ordering::Relaxed);
        }
    }
}
