use std::mem::size_of;

use crate::error::{die, Violation};
use crate::slots::{self, Address, SlotValue};

/// Write handle for a just-freed range.
///
/// Produced by [`WritableJitPage::free_range`](crate::WritableJitPage::free_range)
/// and consumed immediately to reinitialize the range as free-list metadata.
/// The handle records whether the range was backed by executable-capable
/// memory; it holds no write scope of its own and relies on the page
/// handle's scope being open while it is used.
///
/// The only mutator is a relaxed-atomic header-slot write: free-list linkage
/// may be read concurrently by a sweeper, and no ordering relative to other
/// fields is defined for it.
#[derive(Debug)]
pub struct WritableFreeSpace {
    address: Address,
    size: usize,
    executable: bool,
}

impl WritableFreeSpace {
    pub(crate) fn new(address: Address, size: usize, executable: bool) -> Self {
        WritableFreeSpace {
            address,
            size,
            executable,
        }
    }

    /// A freed-range handle for ordinary, non-protected memory.
    ///
    /// # Safety
    ///
    /// The caller asserts that `[address, address + size)` is valid,
    /// writable, exclusively owned memory for the lifetime of the handle.
    pub unsafe fn for_non_executable_memory(address: Address, size: usize) -> Self {
        WritableFreeSpace::new(address, size, false)
    }

    /// Start address of the freed range.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Size of the freed range in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the range was backed by executable-capable memory.
    pub fn is_executable(&self) -> bool {
        self.executable
    }

    /// Relaxed-atomic store into the freed range's header.
    ///
    /// Terminates if the slot escapes the range or the target is not
    /// naturally aligned.
    pub fn write_header_slot<T: SlotValue>(&self, offset: usize, value: T) {
        if offset >= self.size || size_of::<T>() > self.size - offset {
            die(Violation::OutOfBounds {
                offset,
                len: size_of::<T>(),
                size: self.size,
            });
        }
        let target = self.address + offset;
        if !slots::is_aligned::<T>(target) {
            die(Violation::MisalignedWrite {
                address: target,
                required: std::mem::align_of::<T>(),
            });
        }
        unsafe { T::store_relaxed(target, value) };
    }
}
