use std::mem::{align_of, size_of};

use crate::access::WriteScope;
use crate::config::{Enforcement, WriteApiPolicy};
use crate::error::{die, Violation};
use crate::layout;
use crate::registry::{JitAllocation, JitAllocationKind, JitPageRef, JitRegistry, Region};
use crate::slots::{self, Address, SlotValue};

/// Ordering contract of a header-slot store.
///
/// Which flavor a field needs is decided by who else reads it: `Plain` for
/// single-writer fields, `Release` to publish a newly constructed object to
/// other threads, `Relaxed` for fields a collector may observe concurrently
/// with no ordering relative to anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOrdering {
    /// Single-writer store, no atomicity required.
    Plain,
    /// Release-ordered publication store.
    Release,
    /// Relaxed-atomic store.
    Relaxed,
}

/// Atomic orderings available for protected-pointer stores.
///
/// Protected-pointer slots may always be observed concurrently, so the plain
/// flavor does not exist for them; the choice is only whether the store
/// publishes (`Release`) or not (`Relaxed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicOrdering {
    /// Release-ordered publication store.
    Release,
    /// Relaxed-atomic store.
    Relaxed,
}

#[derive(Debug, Clone, Copy)]
enum AllocationSource {
    Register,
    Lookup,
}

/// Write handle for one registered jit allocation.
///
/// Every mutator validates its target against the allocation's bounds before
/// any byte moves and is implicitly covered by a write scope, so call sites
/// cannot write code without the registry knowing about the region and the
/// permission window being open. An out-of-range target, a store to an
/// untracked region, or a kind mismatch is a contract violation and
/// terminates the process.
///
/// By default the handle opens one [`WriteScope`] at construction and holds
/// it until drop. A handle built with [`WriteApiPolicy::Strict`] holds none;
/// each mutator opens and closes its own, which keeps memory execute-only
/// between calls and flushes out call sites that write around the handle.
///
/// # Examples
///
/// ```rust
/// use jitguard::{
///     JitAllocationKind, JitRegistry, ProtectionOptions, StoreOrdering,
///     WritableJitAllocation,
/// };
///
/// let registry = JitRegistry::new(ProtectionOptions::default());
/// let mut backing = vec![0u64; 512];
/// let address = backing.as_mut_ptr() as usize;
/// unsafe { registry.register_page(address, 4096) };
///
/// let allocation = WritableJitAllocation::register(
///     &registry,
///     address,
///     64,
///     JitAllocationKind::InstructionStream,
/// );
/// allocation.write_header_slot::<usize>(0, 0x1234, StoreOrdering::Relaxed);
/// allocation.copy_code(16, &[0x55, 0x48, 0x89, 0xE5]);
/// ```
#[derive(Debug)]
pub struct WritableJitAllocation {
    address: Address,
    allocation: JitAllocation,
    page: Option<JitPageRef>,
    write_scope: Option<WriteScope>,
    enforcement: Option<Enforcement>,
    policy: WriteApiPolicy,
}

impl WritableJitAllocation {
    /// Registers a fresh allocation and returns a write handle for it.
    ///
    /// Terminates if no tracked page covers the range or the range overlaps
    /// an existing registration.
    pub fn register(
        registry: &JitRegistry,
        address: Address,
        size: usize,
        kind: JitAllocationKind,
    ) -> Self {
        Self::build(
            registry,
            address,
            size,
            kind,
            AllocationSource::Register,
            WriteApiPolicy::PerHandle,
        )
    }

    /// Like [`register`](Self::register) with an explicit scope policy.
    pub fn register_with_policy(
        registry: &JitRegistry,
        address: Address,
        size: usize,
        kind: JitAllocationKind,
        policy: WriteApiPolicy,
    ) -> Self {
        Self::build(registry, address, size, kind, AllocationSource::Register, policy)
    }

    /// Resolves an existing allocation matching address, size, and kind
    /// exactly and returns a write handle for it.
    ///
    /// Terminates if no exact match exists; a near miss means the caller is
    /// about to patch untracked or freed memory.
    pub fn lookup(
        registry: &JitRegistry,
        address: Address,
        size: usize,
        kind: JitAllocationKind,
    ) -> Self {
        Self::build(
            registry,
            address,
            size,
            kind,
            AllocationSource::Lookup,
            WriteApiPolicy::PerHandle,
        )
    }

    /// Like [`lookup`](Self::lookup) with an explicit scope policy.
    pub fn lookup_with_policy(
        registry: &JitRegistry,
        address: Address,
        size: usize,
        kind: JitAllocationKind,
        policy: WriteApiPolicy,
    ) -> Self {
        Self::build(registry, address, size, kind, AllocationSource::Lookup, policy)
    }

    /// A handle for ordinary, non-protected memory.
    ///
    /// Bypasses the registry and never toggles permissions, since plain
    /// memory needs no writable window. Bounds validation still applies.
    ///
    /// # Safety
    ///
    /// The caller asserts that `[address, address + size)` is valid,
    /// writable, exclusively owned memory for the lifetime of the handle.
    pub unsafe fn for_non_executable_memory(
        address: Address,
        size: usize,
        kind: JitAllocationKind,
    ) -> Self {
        WritableJitAllocation {
            address,
            allocation: JitAllocation::new(size, kind),
            page: None,
            write_scope: None,
            enforcement: None,
            policy: WriteApiPolicy::PerHandle,
        }
    }

    /// A handle over an allocation resolved by a page handle; relies on the
    /// page handle's scope instead of holding one of its own.
    pub(crate) fn from_parts(address: Address, allocation: JitAllocation) -> Self {
        WritableJitAllocation {
            address,
            allocation,
            page: None,
            write_scope: None,
            enforcement: None,
            policy: WriteApiPolicy::PerHandle,
        }
    }

    fn build(
        registry: &JitRegistry,
        address: Address,
        size: usize,
        kind: JitAllocationKind,
        source: AllocationSource,
        policy: WriteApiPolicy,
    ) -> Self {
        // Under the strict policy no handle-lifetime scope exists at all;
        // registration itself only touches the index, not the memory.
        let write_scope = match policy {
            WriteApiPolicy::PerHandle => Some(WriteScope::new(registry.enforcement())),
            WriteApiPolicy::Strict => None,
        };
        let page = registry.lookup_page(address, size);
        let allocation = match source {
            AllocationSource::Register => page.register_allocation(address, size, kind),
            AllocationSource::Lookup => page.lookup_allocation(address, size, kind),
        };
        WritableJitAllocation {
            address,
            allocation,
            page: Some(page),
            write_scope,
            enforcement: Some(registry.enforcement().clone()),
            policy,
        }
    }

    /// Start address of the allocation.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Size of the allocation in bytes.
    pub fn size(&self) -> usize {
        self.allocation.size()
    }

    /// The kind the allocation was registered with.
    pub fn kind(&self) -> JitAllocationKind {
        self.allocation.kind()
    }

    /// The region the allocation covers.
    pub fn region(&self) -> Region {
        Region::new(self.address, self.allocation.size())
    }

    /// Writes a header slot at a fixed offset.
    ///
    /// The map word (offset 0) always takes the relaxed-atomic path no
    /// matter which ordering was requested, because concurrent collection
    /// reads it without synchronization; requesting `Release` there is a
    /// contract violation since no acquire pairing is defined for it.
    pub fn write_header_slot<T: SlotValue>(
        &self,
        offset: usize,
        value: T,
        ordering: StoreOrdering,
    ) {
        let _scope = self.write_scope_for_call();
        self.bounds_check(offset, size_of::<T>());
        let target = self.address + offset;

        if offset == layout::MAP_WORD_OFFSET {
            if ordering == StoreOrdering::Release {
                die(Violation::MapWordOrdering);
            }
            self.check_aligned::<T>(target);
            unsafe { T::store_relaxed(target, value) };
            return;
        }

        match ordering {
            StoreOrdering::Plain => unsafe { T::write_unaligned(target, value) },
            StoreOrdering::Release => {
                self.check_aligned::<T>(target);
                unsafe { T::store_release(target, value) };
            }
            StoreOrdering::Relaxed => {
                self.check_aligned::<T>(target);
                unsafe { T::store_relaxed(target, value) };
            }
        }
    }

    /// Writes a protected-pointer header slot.
    ///
    /// The full pointer is compressed into its 32-bit trusted-space form
    /// before the store. The map word is not a protected-pointer field;
    /// targeting it is a contract violation.
    pub fn write_protected_pointer_header_slot(
        &self,
        offset: usize,
        full_pointer: Address,
        ordering: AtomicOrdering,
    ) {
        let _scope = self.write_scope_for_call();
        if offset == layout::MAP_WORD_OFFSET {
            die(Violation::ProtectedMapWord);
        }
        self.bounds_check(offset, slots::PROTECTED_POINTER_BYTES);
        let target = self.address + offset;
        self.check_aligned::<u32>(target);
        let compressed = slots::compress_protected(full_pointer);
        match ordering {
            AtomicOrdering::Release => unsafe { u32::store_release(target, compressed) },
            AtomicOrdering::Relaxed => unsafe { u32::store_relaxed(target, compressed) },
        }
    }

    /// Offset-dispatched protected-pointer write.
    ///
    /// Computes the offset of `slot_address` and routes it through the
    /// closed header-field table: only the code-pointer and relocation-info
    /// fields are dispatchable, and only instruction-stream allocations
    /// define them. Any other offset or kind is a logic error in the caller
    /// and terminates. The store is relaxed-atomic.
    pub fn write_header_slot_at(&self, slot_address: Address, full_pointer: Address) {
        if self.allocation.kind() != JitAllocationKind::InstructionStream {
            die(Violation::KindMismatch {
                expected: JitAllocationKind::InstructionStream,
                found: self.allocation.kind(),
            });
        }
        let offset = self.offset_of(slot_address, slots::PROTECTED_POINTER_BYTES);
        match layout::protected_field_at(offset) {
            Some(_) => self.write_protected_pointer_header_slot(
                offset,
                full_pointer,
                AtomicOrdering::Relaxed,
            ),
            None => die(Violation::IllegalHeaderOffset { offset }),
        }
    }

    /// Plain store at an absolute address, no alignment requirement.
    pub fn write_unaligned_value<T: SlotValue>(&self, address: Address, value: T) {
        let _scope = self.write_scope_for_call();
        self.offset_of(address, size_of::<T>());
        unsafe { T::write_unaligned(address, value) };
    }

    /// Plain store of a typed value at an absolute, naturally aligned
    /// address.
    pub fn write_value<T: SlotValue>(&self, address: Address, value: T) {
        let _scope = self.write_scope_for_call();
        self.offset_of(address, size_of::<T>());
        self.check_aligned::<T>(address);
        unsafe { T::write_plain(address, value) };
    }

    /// Relaxed-atomic store of a typed value at an absolute, naturally
    /// aligned address.
    pub fn write_value_relaxed<T: SlotValue>(&self, address: Address, value: T) {
        let _scope = self.write_scope_for_call();
        self.offset_of(address, size_of::<T>());
        self.check_aligned::<T>(address);
        unsafe { T::store_relaxed(address, value) };
    }

    /// Copies machine-code bytes into the allocation at `offset`.
    pub fn copy_code(&self, offset: usize, src: &[u8]) {
        let _scope = self.write_scope_for_call();
        self.bounds_check(offset, src.len());
        unsafe { self.copy_bytes(offset, src) };
    }

    /// Copies auxiliary data bytes into the allocation at `offset`.
    ///
    /// Behaves exactly like [`copy_code`](Self::copy_code); the entry points
    /// stay separate so the two paths can diverge in validation later.
    pub fn copy_data(&self, offset: usize, src: &[u8]) {
        let _scope = self.write_scope_for_call();
        self.bounds_check(offset, src.len());
        unsafe { self.copy_bytes(offset, src) };
    }

    /// Zero-fills `len` bytes of the allocation starting at `offset`.
    pub fn clear_bytes(&self, offset: usize, len: usize) {
        let _scope = self.write_scope_for_call();
        self.bounds_check(offset, len);
        unsafe { std::ptr::write_bytes((self.address + offset) as *mut u8, 0, len) };
    }

    unsafe fn copy_bytes(&self, offset: usize, src: &[u8]) {
        std::ptr::copy_nonoverlapping(
            src.as_ptr(),
            (self.address + offset) as *mut u8,
            src.len(),
        );
    }

    fn write_scope_for_call(&self) -> Option<WriteScope> {
        match (self.policy, &self.enforcement) {
            (WriteApiPolicy::Strict, Some(enforcement)) => Some(WriteScope::new(enforcement)),
            _ => None,
        }
    }

    fn bounds_check(&self, offset: usize, len: usize) {
        let size = self.allocation.size();
        if offset >= size || len > size - offset {
            die(Violation::OutOfBounds { offset, len, size });
        }
    }

    fn offset_of(&self, address: Address, len: usize) -> usize {
        let offset = address.wrapping_sub(self.address);
        self.bounds_check(offset, len);
        offset
    }

    fn check_aligned<T>(&self, address: Address) {
        if !slots::is_aligned::<T>(address) {
            die(Violation::MisalignedWrite {
                address,
                required: align_of::<T>(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{test_registry, PageBuf};

    fn registered(
        registry: &JitRegistry,
        buf: &PageBuf,
        size: usize,
        kind: JitAllocationKind,
    ) -> WritableJitAllocation {
        unsafe { registry.register_page(buf.address(), PageBuf::SIZE) };
        WritableJitAllocation::register(registry, buf.address(), size, kind)
    }

    #[test]
    fn header_slot_round_trips_through_relaxed_read() {
        let (registry, _) = test_registry();
        let buf = PageBuf::new();
        let allocation = registered(&registry, &buf, 64, JitAllocationKind::InstructionStream);

        allocation.write_header_slot::<u32>(16, 0xAABB_CCDD, StoreOrdering::Relaxed);
        allocation.write_header_slot::<usize>(24, usize::MAX - 1, StoreOrdering::Relaxed);

        assert_eq!(
            unsafe { u32::load_relaxed(buf.address() + 16) },
            0xAABB_CCDD
        );
        assert_eq!(
            unsafe { usize::load_relaxed(buf.address() + 24) },
            usize::MAX - 1
        );
    }

    #[test]
    fn map_word_store_is_atomic_for_any_requested_ordering() {
        let (registry, _) = test_registry();
        let buf = PageBuf::new();
        let allocation = registered(&registry, &buf, 64, JitAllocationKind::InstructionStream);

        allocation.write_header_slot::<usize>(0, 0x5555, StoreOrdering::Plain);
        assert_eq!(unsafe { usize::load_relaxed(buf.address()) }, 0x5555);
    }

    #[test]
    #[should_panic(expected = "release ordering is not defined for the map word")]
    fn release_store_at_map_word_dies() {
        let (registry, _) = test_registry();
        let buf = PageBuf::new();
        let allocation = registered(&registry, &buf, 64, JitAllocationKind::InstructionStream);
        allocation.write_header_slot::<usize>(0, 1, StoreOrdering::Release);
    }

    #[test]
    fn protected_pointer_stores_compressed_form() {
        let (registry, _) = test_registry();
        let buf = PageBuf::new();
        let allocation = registered(&registry, &buf, 64, JitAllocationKind::InstructionStream);

        let full = 0x7000_0000_1234usize;
        allocation.write_protected_pointer_header_slot(8, full, AtomicOrdering::Release);
        assert_eq!(unsafe { u32::load_relaxed(buf.address() + 8) }, 0x1234);
    }

    #[test]
    #[should_panic(expected = "not a protected-pointer field")]
    fn protected_store_at_map_word_dies() {
        let (registry, _) = test_registry();
        let buf = PageBuf::new();
        let allocation = registered(&registry, &buf, 64, JitAllocationKind::InstructionStream);
        allocation.write_protected_pointer_header_slot(0, 0x1234, AtomicOrdering::Relaxed);
    }

    #[test]
    fn offset_dispatch_routes_both_known_fields() {
        let (registry, _) = test_registry();
        let buf = PageBuf::new();
        let allocation = registered(&registry, &buf, 64, JitAllocationKind::InstructionStream);

        allocation.write_header_slot_at(buf.address() + 8, 0xAAAA);
        allocation.write_header_slot_at(buf.address() + 12, 0xBBBB);
        assert_eq!(unsafe { u32::load_relaxed(buf.address() + 8) }, 0xAAAA);
        assert_eq!(unsafe { u32::load_relaxed(buf.address() + 12) }, 0xBBBB);
    }

    #[test]
    #[should_panic(expected = "not a dispatchable header field")]
    fn offset_dispatch_rejects_unknown_offset() {
        let (registry, _) = test_registry();
        let buf = PageBuf::new();
        let allocation = registered(&registry, &buf, 64, JitAllocationKind::InstructionStream);
        allocation.write_header_slot_at(buf.address() + 16, 0xAAAA);
    }

    #[test]
    #[should_panic(expected = "requires a instruction-stream allocation")]
    fn offset_dispatch_rejects_non_instruction_stream() {
        let (registry, _) = test_registry();
        let buf = PageBuf::new();
        let allocation = registered(&registry, &buf, 64, JitAllocationKind::JumpTable);
        allocation.write_header_slot_at(buf.address() + 8, 0xAAAA);
    }

    #[test]
    fn last_byte_is_writable() {
        let (registry, _) = test_registry();
        let buf = PageBuf::new();
        let allocation = registered(&registry, &buf, 64, JitAllocationKind::InstructionStream);
        allocation.write_header_slot::<u8>(63, 0x90, StoreOrdering::Plain);
        assert_eq!(unsafe { u8::load_relaxed(buf.address() + 63) }, 0x90);
    }

    #[test]
    #[should_panic(expected = "escapes allocation of 64 bytes")]
    fn first_byte_past_end_dies() {
        let (registry, _) = test_registry();
        let buf = PageBuf::new();
        let allocation = registered(&registry, &buf, 64, JitAllocationKind::InstructionStream);
        allocation.write_header_slot::<u8>(64, 0x90, StoreOrdering::Plain);
    }

    #[test]
    #[should_panic(expected = "escapes allocation")]
    fn wide_write_straddling_end_dies() {
        let (registry, _) = test_registry();
        let buf = PageBuf::new();
        let allocation = registered(&registry, &buf, 64, JitAllocationKind::InstructionStream);
        allocation.write_header_slot::<u64>(60, 1, StoreOrdering::Plain);
    }

    #[test]
    #[should_panic(expected = "is not aligned")]
    fn misaligned_atomic_store_dies() {
        let (registry, _) = test_registry();
        let buf = PageBuf::new();
        let allocation = registered(&registry, &buf, 64, JitAllocationKind::InstructionStream);
        allocation.write_value_relaxed::<u64>(buf.address() + 12, 1);
    }

    #[test]
    fn unaligned_plain_write_is_permitted() {
        let (registry, _) = test_registry();
        let buf = PageBuf::new();
        let allocation = registered(&registry, &buf, 64, JitAllocationKind::InstructionStream);
        allocation.write_unaligned_value::<u32>(buf.address() + 13, 0x0403_0201);
        assert_eq!(
            unsafe { u32::read_unaligned(buf.address() + 13) },
            0x0403_0201
        );
    }

    #[test]
    fn copy_then_clear_scenario() {
        let (registry, _) = test_registry();
        let buf = PageBuf::new();
        let allocation = registered(&registry, &buf, 64, JitAllocationKind::InstructionStream);

        let code: Vec<u8> = (1..=32).collect();
        allocation.copy_code(0, &code);
        allocation.clear_bytes(32, 32);

        assert_eq!(buf.bytes(0, 32), &code[..]);
        assert_eq!(buf.bytes(32, 32), vec![0u8; 32]);
    }

    #[test]
    fn default_policy_holds_one_scope_for_handle_lifetime() {
        let (registry, backend) = test_registry();
        let buf = PageBuf::new();
        {
            let allocation =
                registered(&registry, &buf, 64, JitAllocationKind::InstructionStream);
            allocation.copy_code(0, &[0xC3]);
            allocation.clear_bytes(1, 7);
            allocation.write_header_slot::<u32>(8, 5, StoreOrdering::Relaxed);
            assert_eq!(backend.writable_transitions(), 1);
            assert_eq!(backend.executable_transitions(), 0);
        }
        assert_eq!(backend.executable_transitions(), 1);
    }

    #[test]
    fn strict_policy_scopes_every_call() {
        let (registry, backend) = test_registry();
        let buf = PageBuf::new();
        unsafe { registry.register_page(buf.address(), PageBuf::SIZE) };
        let allocation = WritableJitAllocation::register_with_policy(
            &registry,
            buf.address(),
            64,
            JitAllocationKind::InstructionStream,
            WriteApiPolicy::Strict,
        );
        assert_eq!(backend.writable_transitions(), 0);

        allocation.copy_code(0, &[0xC3]);
        allocation.clear_bytes(1, 7);
        assert_eq!(backend.writable_transitions(), 2);
        assert_eq!(backend.executable_transitions(), 2);
    }

    #[test]
    fn non_executable_factory_never_touches_backend() {
        let (_, backend) = test_registry();
        let mut plain = vec![0u64; 8];
        let address = plain.as_mut_ptr() as Address;
        let allocation = unsafe {
            WritableJitAllocation::for_non_executable_memory(
                address,
                64,
                JitAllocationKind::Other,
            )
        };
        allocation.write_value::<u64>(address + 8, 0xFEED);
        assert_eq!(plain[1], 0xFEED);
        assert_eq!(backend.writable_transitions(), 0);
    }

    #[test]
    #[should_panic(expected = "escapes allocation")]
    fn non_executable_factory_still_validates_bounds() {
        let mut plain = vec![0u64; 8];
        let address = plain.as_mut_ptr() as Address;
        let allocation = unsafe {
            WritableJitAllocation::for_non_executable_memory(
                address,
                64,
                JitAllocationKind::Other,
            )
        };
        allocation.write_value::<u64>(address + 64, 1);
    }
}
