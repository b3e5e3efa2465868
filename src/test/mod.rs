//! Shared functionality which is used in unit tests.

use std::cell::UnsafeCell;
use std::sync::Arc;

use crate::backend::RecordingBackend;
use crate::config::ProtectionOptions;
use crate::registry::JitRegistry;
use crate::slots::Address;

/// A registry wired to a recording backend with default options.
pub(crate) fn test_registry() -> (JitRegistry, Arc<RecordingBackend>) {
    let backend = Arc::new(RecordingBackend::new());
    let registry = JitRegistry::with_backend(ProtectionOptions::default(), backend.clone());
    (registry, backend)
}

/// A registry running jitless without the force override.
pub(crate) fn jitless_registry() -> (JitRegistry, Arc<RecordingBackend>) {
    let backend = Arc::new(RecordingBackend::new());
    let registry = JitRegistry::with_backend(
        ProtectionOptions {
            jitless: true,
            force_write_protection: false,
        },
        backend.clone(),
    );
    (registry, backend)
}

const PAGE_BYTES: usize = 4096;

/// Page-aligned, page-sized buffer standing in for a jit page.
///
/// Interior-mutable so tests can hand its address to write handles while
/// still holding a shared reference for readback.
#[repr(align(4096))]
pub(crate) struct PageBuf(UnsafeCell<[u8; PAGE_BYTES]>);

impl PageBuf {
    pub(crate) const SIZE: usize = PAGE_BYTES;

    pub(crate) fn new() -> Box<PageBuf> {
        Box::new(PageBuf(UnsafeCell::new([0; PAGE_BYTES])))
    }

    pub(crate) fn address(&self) -> Address {
        self.0.get() as Address
    }

    pub(crate) fn bytes(&self, offset: usize, len: usize) -> Vec<u8> {
        assert!(offset + len <= PageBuf::SIZE);
        unsafe {
            std::slice::from_raw_parts((self.0.get() as *const u8).add(offset), len).to_vec()
        }
    }
}
