//! Bookkeeping for pages and allocations of jit-produced memory.
//!
//! The registry is the source of truth for which address ranges may be
//! written through the handles in [`crate::access`]: the embedder registers
//! each jit page once after mapping it, individual allocations are
//! registered and looked up within those pages, and every validated write is
//! checked against this index. Writing into anything the registry does not
//! track is a memory-safety contract violation and terminates the process.
//!
//! # Architecture
//!
//! - [`JitRegistry`] - the top-level index of tracked pages, an ordered
//!   concurrent map keyed by page start address
//! - [`JitPageRef`] - shared reference to one page; its allocation index is
//!   guarded by a per-page lock held only inside each operation
//! - [`JitAllocation`] - size and kind of one registered allocation
//! - [`JumpTablePages`] - descriptor for two ranges resolved together, which
//!   either share one page tracking or were split across two
//!
//! # Concurrency
//!
//! Page lookups traverse a lock-free skip list; allocation operations take
//! the owning page's mutex transiently and release it before returning.
//! Handles returned to callers hold no lock, so concurrent mutation of
//! disjoint allocations on the same page proceeds without contention.
//!
//! # Examples
//!
//! ```rust
//! use jitguard::{JitAllocationKind, JitRegistry, ProtectionOptions};
//!
//! let registry = JitRegistry::new(ProtectionOptions::default());
//! let backing = vec![0u64; 512];
//! let address = backing.as_ptr() as usize;
//!
//! unsafe { registry.register_page(address, 4096) };
//! let page = registry.lookup_page(address, 4096);
//! page.register_allocation(address, 64, JitAllocationKind::InstructionStream);
//! assert!(page.contains(address, 64, JitAllocationKind::InstructionStream));
//! ```

mod page;

use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

use crossbeam_skiplist::SkipMap;

use crate::backend::{self, PermissionBackend};
use crate::config::{Enforcement, ProtectionOptions};
use crate::error::{die, Violation};
use crate::slots::Address;

pub use page::{JitAllocation, JitPageRef};
use page::JitPage;

/// A contiguous address range. Never owns its backing memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Start address of the range.
    pub address: Address,
    /// Length of the range in bytes.
    pub size: usize,
}

impl Region {
    /// A region starting at `address`, `size` bytes long.
    pub fn new(address: Address, size: usize) -> Self {
        Region { address, size }
    }

    /// One past the last address of the region.
    pub fn end(&self) -> Address {
        self.address + self.size
    }

    /// Whether `address` lies inside the region.
    pub fn contains(&self, address: Address) -> bool {
        self.address <= address && address < self.end()
    }

    /// Whether `[address, address + size)` lies fully inside the region.
    pub fn contains_range(&self, address: Address, size: usize) -> bool {
        address >= self.address && address <= self.end() && size <= self.end() - address
    }

    /// Whether the two regions share at least one address.
    pub fn overlaps(&self, other: &Region) -> bool {
        self.address < other.end() && other.address < self.end()
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, +{:#x})", self.address, self.size)
    }
}

/// What a registered allocation holds. Fixed at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum JitAllocationKind {
    /// A stream of executable machine code plus its object header.
    InstructionStream,
    /// Relocation metadata attached to an instruction stream.
    RelocationInfo,
    /// A table of direct jumps, patched repeatedly over the runtime's life.
    JumpTable,
    /// The secondary indirection table used when a direct jump table's
    /// addressable reach is insufficient.
    FarJumpTable,
    /// Any other jit-owned metadata.
    Other,
}

/// Two ranges resolved together: one shared page tracking, or two
/// independent ones when the tables landed on different pages.
#[derive(Debug, Clone)]
pub enum JumpTablePages {
    /// Both ranges fall within the same tracked page.
    SamePage(JitPageRef),
    /// The ranges live on two distinct tracked pages.
    Split {
        /// Page tracking the far jump table.
        far_jump_table: JitPageRef,
        /// Page tracking the jump table.
        jump_table: JitPageRef,
    },
}

impl JumpTablePages {
    /// The page tracking the jump table.
    pub fn jump_table_page(&self) -> &JitPageRef {
        match self {
            JumpTablePages::SamePage(page) => page,
            JumpTablePages::Split { jump_table, .. } => jump_table,
        }
    }

    /// The page tracking the far jump table.
    pub fn far_jump_table_page(&self) -> &JitPageRef {
        match self {
            JumpTablePages::SamePage(page) => page,
            JumpTablePages::Split { far_jump_table, .. } => far_jump_table,
        }
    }

    /// Whether the two ranges required independent page trackings.
    pub fn is_split(&self) -> bool {
        matches!(self, JumpTablePages::Split { .. })
    }
}

/// The process-wide index of tracked jit pages.
///
/// Created once at startup with the process configuration; the permission
/// backend is detected at the same time and bundled with the options into
/// the [`Enforcement`] value that write scopes are constructed from.
///
/// # Thread Safety
///
/// All operations are safe to call concurrently. See the module docs for the
/// locking discipline.
pub struct JitRegistry {
    pages: SkipMap<Address, Arc<JitPage>>,
    enforcement: Enforcement,
}

impl JitRegistry {
    /// A registry using the best permission backend the host supports.
    pub fn new(options: ProtectionOptions) -> Self {
        Self::with_backend(options, backend::detect())
    }

    /// A registry using an explicit backend.
    ///
    /// This is the injection point for test doubles and for embedders that
    /// bring their own toggling mechanism.
    pub fn with_backend(options: ProtectionOptions, backend: Arc<dyn PermissionBackend>) -> Self {
        JitRegistry {
            pages: SkipMap::new(),
            enforcement: Enforcement::new(options, backend),
        }
    }

    /// The configuration and backend bundle scopes are constructed from.
    pub fn enforcement(&self) -> &Enforcement {
        &self.enforcement
    }

    /// Begins tracking `[address, address + size)` as a jit page.
    ///
    /// Terminates if the range overlaps an already tracked page.
    ///
    /// # Safety
    ///
    /// The caller asserts that the range is mapped, exclusively owned jit
    /// memory that stays valid until it is unregistered, and that pages
    /// protected by a hardware key have been tagged with it. Every write
    /// handle derives the validity of its raw stores from this registration.
    pub unsafe fn register_page(&self, address: Address, size: usize) {
        let region = Region::new(address, size);
        if let Some(entry) = self.pages.upper_bound(Bound::Included(&(region.end() - 1))) {
            if entry.value().region().end() > address {
                die(Violation::OverlappingPage { address, size });
            }
        }

        let page = Arc::new(JitPage::new(region));
        let entry = self.pages.get_or_insert(address, page.clone());
        if !Arc::ptr_eq(entry.value(), &page) {
            die(Violation::OverlappingPage { address, size });
        }

        // A racing registration may have slipped in between the check and
        // the insert; whoever sees the conflict afterwards dies.
        if self.overlapping_neighbor(region) {
            die(Violation::OverlappingPage { address, size });
        }
    }

    /// Stops tracking the page registered as `[address, address + size)`.
    ///
    /// Terminates if the range is not exactly a tracked page or if
    /// allocations on it are still live.
    pub fn unregister_page(&self, address: Address, size: usize) {
        let Some(entry) = self.pages.get(&address) else {
            die(Violation::UnregisteredPage { address, size });
        };
        if entry.value().region().size != size {
            die(Violation::UnregisteredPage { address, size });
        }
        let live = JitPageRef::new(entry.value().clone()).live_allocations();
        if live != 0 {
            die(Violation::LiveAllocations {
                address,
                count: live,
            });
        }
        entry.remove();
    }

    /// Resolves the tracked page fully covering `[address, address + size)`.
    ///
    /// Terminates if no tracked page covers the range.
    pub fn lookup_page(&self, address: Address, size: usize) -> JitPageRef {
        match self.page_covering(address, size) {
            Some(page) => page,
            None => die(Violation::UnregisteredPage { address, size }),
        }
    }

    /// Resolves two ranges that may or may not share a page.
    ///
    /// Returns one shared page tracking when both ranges fall within the
    /// same page, or two independent trackings otherwise. Terminates if
    /// either range is not covered by a tracked page.
    pub fn split_pages(&self, far_jump_table: Region, jump_table: Region) -> JumpTablePages {
        let far = self.lookup_page(far_jump_table.address, far_jump_table.size);
        let near = self.lookup_page(jump_table.address, jump_table.size);
        if JitPageRef::same_page(&far, &near) {
            JumpTablePages::SamePage(far)
        } else {
            JumpTablePages::Split {
                far_jump_table: far,
                jump_table: near,
            }
        }
    }

    fn page_covering(&self, address: Address, size: usize) -> Option<JitPageRef> {
        let entry = self.pages.upper_bound(Bound::Included(&address))?;
        let page = entry.value();
        if page.region().contains_range(address, size) {
            Some(JitPageRef::new(page.clone()))
        } else {
            None
        }
    }

    fn overlapping_neighbor(&self, region: Region) -> bool {
        let pred = self
            .pages
            .upper_bound(Bound::Excluded(&region.address))
            .map(|entry| entry.value().region().end() > region.address);
        let succ = self
            .pages
            .lower_bound(Bound::Excluded(&region.address))
            .map(|entry| entry.value().region().address < region.end());
        pred.unwrap_or(false) || succ.unwrap_or(false)
    }
}

impl fmt::Debug for JitRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JitRegistry")
            .field("pages", &self.pages.len())
            .field("enforcement", &self.enforcement)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::test_registry;

    #[test]
    fn region_arithmetic() {
        let region = Region::new(0x1000, 0x100);
        assert_eq!(region.end(), 0x1100);
        assert!(region.contains(0x10FF));
        assert!(!region.contains(0x1100));
        assert!(region.contains_range(0x1080, 0x80));
        assert!(!region.contains_range(0x1080, 0x81));
        assert!(region.overlaps(&Region::new(0x10FF, 1)));
        assert!(!region.overlaps(&Region::new(0x1100, 1)));
    }

    #[test]
    fn kind_renders_kebab_case() {
        assert_eq!(
            JitAllocationKind::InstructionStream.to_string(),
            "instruction-stream"
        );
        assert_eq!(JitAllocationKind::FarJumpTable.to_string(), "far-jump-table");
    }

    #[test]
    fn kind_names_are_distinct() {
        use strum::IntoEnumIterator;

        let names: std::collections::HashSet<String> =
            JitAllocationKind::iter().map(|kind| kind.to_string()).collect();
        assert_eq!(names.len(), JitAllocationKind::iter().count());
    }

    #[test]
    fn lookup_resolves_interior_range() {
        let (registry, _) = test_registry();
        unsafe { registry.register_page(0x40000, 0x4000) };
        let page = registry.lookup_page(0x41000, 0x100);
        assert_eq!(page.range(), Region::new(0x40000, 0x4000));
    }

    #[test]
    #[should_panic(expected = "no tracked jit page")]
    fn lookup_of_untracked_range_dies() {
        let (registry, _) = test_registry();
        registry.lookup_page(0x40000, 0x100);
    }

    #[test]
    #[should_panic(expected = "no tracked jit page")]
    fn lookup_spanning_past_page_end_dies() {
        let (registry, _) = test_registry();
        unsafe { registry.register_page(0x40000, 0x1000) };
        registry.lookup_page(0x40F00, 0x200);
    }

    #[test]
    #[should_panic(expected = "overlaps an already tracked page")]
    fn overlapping_page_registration_dies() {
        let (registry, _) = test_registry();
        unsafe {
            registry.register_page(0x40000, 0x1000);
            registry.register_page(0x40800, 0x1000);
        }
    }

    #[test]
    fn unregister_page_allows_reregistration() {
        let (registry, _) = test_registry();
        unsafe { registry.register_page(0x40000, 0x1000) };
        registry.unregister_page(0x40000, 0x1000);
        unsafe { registry.register_page(0x40000, 0x1000) };
    }

    #[test]
    #[should_panic(expected = "still holds 1 live allocations")]
    fn unregister_page_with_live_allocations_dies() {
        let (registry, _) = test_registry();
        unsafe { registry.register_page(0x40000, 0x1000) };
        let page = registry.lookup_page(0x40000, 0x1000);
        page.register_allocation(0x40000, 64, JitAllocationKind::Other);
        registry.unregister_page(0x40000, 0x1000);
    }

    #[test]
    fn split_detects_shared_page() {
        let (registry, _) = test_registry();
        unsafe { registry.register_page(0x40000, 0x1000) };
        let pages = registry.split_pages(
            Region::new(0x40000, 0x100),
            Region::new(0x40800, 0x100),
        );
        assert!(!pages.is_split());
        assert!(JitPageRef::same_page(
            pages.jump_table_page(),
            pages.far_jump_table_page()
        ));
    }

    #[test]
    fn split_detects_independent_pages() {
        let (registry, _) = test_registry();
        unsafe {
            registry.register_page(0x40000, 0x1000);
            registry.register_page(0x80000, 0x1000);
        }
        let pages = registry.split_pages(
            Region::new(0x80000, 0x100),
            Region::new(0x40000, 0x100),
        );
        assert!(pages.is_split());
        assert_eq!(pages.far_jump_table_page().range().address, 0x80000);
        assert_eq!(pages.jump_table_page().range().address, 0x40000);
    }
}
