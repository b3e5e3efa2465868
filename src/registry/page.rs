use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::error::{die, Violation};
use crate::registry::{JitAllocationKind, Region};
use crate::slots::Address;

/// One registered allocation: its size and the kind fixed at registration.
///
/// The start address is the key in the owning page's index, so the value
/// carries only size and kind. Allocations are never resized in place; a
/// region that changes size is freed and re-registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitAllocation {
    size: usize,
    kind: JitAllocationKind,
}

impl JitAllocation {
    pub(crate) fn new(size: usize, kind: JitAllocationKind) -> Self {
        JitAllocation { size, kind }
    }

    /// Size of the allocation in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The kind the allocation was registered with.
    pub fn kind(&self) -> JitAllocationKind {
        self.kind
    }
}

/// A tracked page: its address range and the index of live allocations,
/// keyed by start address and guarded by the page's own lock.
#[derive(Debug)]
pub(crate) struct JitPage {
    region: Region,
    allocations: Mutex<BTreeMap<Address, JitAllocation>>,
}

impl JitPage {
    pub(crate) fn new(region: Region) -> Self {
        JitPage {
            region,
            allocations: Mutex::new(BTreeMap::new()),
        }
    }

    pub(crate) fn region(&self) -> Region {
        self.region
    }
}

/// Shared reference to one tracked page.
///
/// Cheap to clone and holds no lock: every operation acquires the page's
/// allocation-index lock transiently and releases it before returning, so
/// concurrent operations on disjoint allocations within the same page
/// proceed independently, while racing registrations of overlapping ranges
/// serialize on the index and at least one of them dies.
#[derive(Debug, Clone)]
pub struct JitPageRef {
    page: Arc<JitPage>,
}

impl JitPageRef {
    pub(crate) fn new(page: Arc<JitPage>) -> Self {
        JitPageRef { page }
    }

    /// The address range this page tracks.
    pub fn range(&self) -> Region {
        self.page.region
    }

    /// Whether both refs track the same page.
    pub(crate) fn same_page(a: &JitPageRef, b: &JitPageRef) -> bool {
        Arc::ptr_eq(&a.page, &b.page)
    }

    pub(crate) fn live_allocations(&self) -> usize {
        lock!(self.page.allocations).len()
    }

    /// Registers a fresh allocation on this page.
    ///
    /// The range must be fully contained in the page and must not overlap
    /// any live allocation; either failure is a contract violation and
    /// terminates.
    pub fn register_allocation(
        &self,
        address: Address,
        size: usize,
        kind: JitAllocationKind,
    ) -> JitAllocation {
        if !self.page.region.contains_range(address, size) {
            die(Violation::AllocationEscapesPage { address, size });
        }

        let mut allocations = lock!(self.page.allocations);
        if let Some((&prev, existing)) = allocations.range(..=address).next_back() {
            if prev + existing.size() > address {
                die(Violation::OverlappingAllocation { address, size });
            }
        }
        if let Some((&next, _)) = allocations.range(address..).next() {
            if next < address + size {
                die(Violation::OverlappingAllocation { address, size });
            }
        }

        let allocation = JitAllocation::new(size, kind);
        allocations.insert(address, allocation);
        allocation
    }

    /// Resolves an existing allocation matching address, size, and kind
    /// exactly.
    ///
    /// Anything less than an exact match means the caller is about to write
    /// into untracked or freed memory, so it terminates.
    pub fn lookup_allocation(
        &self,
        address: Address,
        size: usize,
        kind: JitAllocationKind,
    ) -> JitAllocation {
        let allocations = lock!(self.page.allocations);
        match allocations.get(&address) {
            Some(allocation) if allocation.size() == size => {
                if allocation.kind() != kind {
                    die(Violation::KindMismatch {
                        expected: kind,
                        found: allocation.kind(),
                    });
                }
                *allocation
            }
            _ => die(Violation::UnregisteredAllocation {
                address,
                size,
                kind,
            }),
        }
    }

    /// Returns the start address and allocation whose region contains
    /// `address`; terminates if none does.
    pub fn allocation_containing(&self, address: Address) -> (Address, JitAllocation) {
        let allocations = lock!(self.page.allocations);
        if let Some((&start, allocation)) = allocations.range(..=address).next_back() {
            if address < start + allocation.size() {
                return (start, *allocation);
            }
        }
        die(Violation::AddressNotCovered { address });
    }

    /// Removes the allocation exactly matching `[address, address + size)`
    /// from the index.
    ///
    /// A range that matches nothing, covers only part of an allocation, or
    /// spans more than one is a contract violation.
    pub fn unregister_range(&self, address: Address, size: usize) {
        let mut allocations = lock!(self.page.allocations);
        let exact = matches!(
            allocations.get(&address),
            Some(allocation) if allocation.size() == size
        );
        if !exact {
            die(Violation::UnmatchedFree { address, size });
        }
        allocations.remove(&address);
    }

    /// Whether an allocation matching address, size, and kind exactly is
    /// registered on this page.
    pub fn contains(&self, address: Address, size: usize, kind: JitAllocationKind) -> bool {
        let allocations = lock!(self.page.allocations);
        matches!(
            allocations.get(&address),
            Some(allocation) if allocation.size() == size && allocation.kind() == kind
        )
    }
}
