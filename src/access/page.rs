use crate::access::{WritableFreeSpace, WritableJitAllocation, WriteScope};
use crate::registry::{JitPageRef, JitRegistry, Region};
use crate::slots::Address;

/// Write handle for one tracked jit page.
///
/// Holds a single [`WriteScope`] spanning its lifetime, so a sweep over the
/// page's allocations pays for one permission toggle. Allocation handles
/// returned by [`lookup_allocation_containing`](Self::lookup_allocation_containing)
/// rely on that scope and must not be used past the page handle's drop.
///
/// # Examples
///
/// ```rust
/// use jitguard::{
///     JitAllocationKind, JitRegistry, ProtectionOptions, WritableJitPage,
/// };
///
/// let registry = JitRegistry::new(ProtectionOptions::default());
/// let mut backing = vec![0u64; 512];
/// let address = backing.as_mut_ptr() as usize;
/// unsafe { registry.register_page(address, 4096) };
/// registry
///     .lookup_page(address, 4096)
///     .register_allocation(address, 64, JitAllocationKind::InstructionStream);
///
/// let page = WritableJitPage::new(&registry, address, 4096);
/// let allocation = page.lookup_allocation_containing(address + 40);
/// allocation.clear_bytes(0, 64);
///
/// let free = page.free_range(address, 64);
/// assert!(free.is_executable());
/// ```
#[derive(Debug)]
pub struct WritableJitPage {
    page: JitPageRef,
    _write_scope: WriteScope,
}

impl WritableJitPage {
    /// Opens a write handle over the tracked page covering
    /// `[address, address + size)`.
    ///
    /// Terminates if no tracked page covers the range.
    pub fn new(registry: &JitRegistry, address: Address, size: usize) -> Self {
        let write_scope = WriteScope::new(registry.enforcement());
        let page = registry.lookup_page(address, size);
        WritableJitPage {
            page,
            _write_scope: write_scope,
        }
    }

    /// The address range of the underlying page.
    pub fn range(&self) -> Region {
        self.page.range()
    }

    /// Resolves the allocation whose region contains `address`.
    ///
    /// The returned handle piggybacks on this page handle's write scope
    /// instead of opening its own. Terminates if no live allocation covers
    /// the address.
    pub fn lookup_allocation_containing(&self, address: Address) -> WritableJitAllocation {
        let (start, allocation) = self.page.allocation_containing(address);
        WritableJitAllocation::from_parts(start, allocation)
    }

    /// Removes `[address, address + size)` from the page's index and hands
    /// back the freed range for free-list initialization.
    ///
    /// The range must exactly match one registered allocation; a partial or
    /// spanning range terminates. The freed range keeps the page's
    /// executable capability.
    pub fn free_range(&self, address: Address, size: usize) -> WritableFreeSpace {
        self.page.unregister_range(address, size);
        WritableFreeSpace::new(address, size, true)
    }
}
