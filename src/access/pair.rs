use crate::access::{WritableJitAllocation, WriteScope};
use crate::config::WriteApiPolicy;
use crate::error::{die, Violation};
use crate::registry::{JitAllocationKind, JitRegistry, JumpTablePages, Region};

/// Write handle coordinating a jump table and its far jump table.
///
/// The two tables are patched together whenever a call target changes, and
/// readers that follow one into the other must never observe a half-done
/// update window closing between them. The pair therefore holds exactly one
/// [`WriteScope`] across construction and destruction: both tables are
/// observably writable together for the duration of a coordinated patch, and
/// both writes land before the scope releases back to execute-only.
///
/// The tables are mutated repeatedly over the runtime's life rather than
/// written once, so the inner handles are resolved in strict write-api mode;
/// they hold no scope of their own, and the backend sees exactly one
/// writable window per pair no matter how many slots get patched inside it.
///
/// The two regions may or may not share a physical page;
/// [`pages`](Self::pages) reports whether one shared page tracking suffices
/// or two independent ones were needed.
///
/// # Examples
///
/// ```rust
/// use jitguard::{
///     JitAllocationKind, JitRegistry, ProtectionOptions, Region, WritableJumpTablePair,
/// };
///
/// let registry = JitRegistry::new(ProtectionOptions::default());
/// let mut backing = vec![0u64; 512];
/// let address = backing.as_mut_ptr() as usize;
/// unsafe { registry.register_page(address, 4096) };
/// let page = registry.lookup_page(address, 4096);
/// page.register_allocation(address, 128, JitAllocationKind::JumpTable);
/// page.register_allocation(address + 128, 256, JitAllocationKind::FarJumpTable);
///
/// let pair = WritableJumpTablePair::new(
///     &registry,
///     Region::new(address, 128),
///     Region::new(address + 128, 256),
/// );
/// pair.jump_table().write_value::<u64>(address, 0xAAAA);
/// pair.far_jump_table().write_value::<u64>(address + 128, 0xBBBB);
/// assert!(!pair.pages().is_split());
/// ```
#[derive(Debug)]
pub struct WritableJumpTablePair {
    write_scope: WriteScope,
    jump_table: WritableJitAllocation,
    far_jump_table: WritableJitAllocation,
    pages: JumpTablePages,
}

impl WritableJumpTablePair {
    /// Opens a coordinated write handle over a registered jump table and far
    /// jump table.
    ///
    /// Terminates if either range does not resolve to a registered
    /// allocation of the expected kind and bounds.
    pub fn new(registry: &JitRegistry, jump_table: Region, far_jump_table: Region) -> Self {
        // The shared scope opens before anything else so the strict inner
        // lookups nest inside it and never toggle the backend themselves.
        let write_scope = WriteScope::new(registry.enforcement());

        let writable_jump_table = WritableJitAllocation::lookup_with_policy(
            registry,
            jump_table.address,
            jump_table.size,
            JitAllocationKind::JumpTable,
            WriteApiPolicy::Strict,
        );
        let writable_far_jump_table = WritableJitAllocation::lookup_with_policy(
            registry,
            far_jump_table.address,
            far_jump_table.size,
            JitAllocationKind::FarJumpTable,
            WriteApiPolicy::Strict,
        );

        let pages = registry.split_pages(far_jump_table, jump_table);
        if !pages.jump_table_page().contains(
            jump_table.address,
            jump_table.size,
            JitAllocationKind::JumpTable,
        ) {
            die(Violation::UnregisteredAllocation {
                address: jump_table.address,
                size: jump_table.size,
                kind: JitAllocationKind::JumpTable,
            });
        }
        if !pages.far_jump_table_page().contains(
            far_jump_table.address,
            far_jump_table.size,
            JitAllocationKind::FarJumpTable,
        ) {
            die(Violation::UnregisteredAllocation {
                address: far_jump_table.address,
                size: far_jump_table.size,
                kind: JitAllocationKind::FarJumpTable,
            });
        }

        WritableJumpTablePair {
            write_scope,
            jump_table: writable_jump_table,
            far_jump_table: writable_far_jump_table,
            pages,
        }
    }

    /// The jump-table write handle.
    pub fn jump_table(&self) -> &WritableJitAllocation {
        &self.jump_table
    }

    /// The far-jump-table write handle.
    pub fn far_jump_table(&self) -> &WritableJitAllocation {
        &self.far_jump_table
    }

    /// Whether the two tables share one page tracking or were split.
    pub fn pages(&self) -> &JumpTablePages {
        &self.pages
    }
}
