//! Integration tests for the validated write path over real anonymous
//! mappings.
//!
//! These tests exercise the complete produce / patch / free lifecycle the
//! way an embedder drives it: map a page, register it, construct handles,
//! mutate through them, and verify the bytes through the mapping itself.

use std::sync::Arc;

use jitguard::backend::RecordingBackend;
use jitguard::prelude::*;
use jitguard::slots::SlotValue;
use memmap2::MmapMut;

fn recording_registry() -> (JitRegistry, Arc<RecordingBackend>) {
    let backend = Arc::new(RecordingBackend::new());
    let registry = JitRegistry::with_backend(ProtectionOptions::default(), backend.clone());
    (registry, backend)
}

fn mapped_page(registry: &JitRegistry) -> (MmapMut, Address) {
    let mut map = MmapMut::map_anon(4096).expect("Failed to map anonymous page");
    let address = map.as_mut_ptr() as Address;
    unsafe { registry.register_page(address, 4096) };
    (map, address)
}

#[test]
fn produce_then_patch_then_free() {
    let (registry, _) = recording_registry();
    let (map, address) = mapped_page(&registry);

    // Step 1: produce a fresh 64-byte code object.
    let allocation = WritableJitAllocation::register(
        &registry,
        address,
        64,
        JitAllocationKind::InstructionStream,
    );
    let code: Vec<u8> = (0..32).map(|i| 0xC0 | (i & 0x0F) as u8).collect();
    allocation.copy_code(0, &code);
    allocation.clear_bytes(32, 32);
    drop(allocation);

    assert_eq!(&map[..32], &code[..]);
    assert_eq!(&map[32..64], &[0u8; 32]);

    // Step 2: patch it later through a lookup handle.
    let patch = WritableJitAllocation::lookup(
        &registry,
        address,
        64,
        JitAllocationKind::InstructionStream,
    );
    patch.copy_code(4, &[0xEB, 0xFE]);
    drop(patch);
    assert_eq!(&map[4..6], &[0xEB, 0xFE]);

    // Step 3: free the range and reinitialize it as free-list metadata.
    let page = WritableJitPage::new(&registry, address, 4096);
    let free = page.free_range(address, 64);
    assert!(free.is_executable());
    free.write_header_slot::<usize>(0, 0xF4EE);
    assert_eq!(
        usize::from_ne_bytes(map[..8].try_into().unwrap()),
        0xF4EE
    );
}

#[test]
fn bulk_copy_then_zero_fill_yields_exact_image() {
    let (registry, _) = recording_registry();
    let (map, address) = mapped_page(&registry);

    let allocation = WritableJitAllocation::register(
        &registry,
        address,
        64,
        JitAllocationKind::InstructionStream,
    );
    // Dirty the whole object first so the zero-fill is observable.
    allocation.copy_data(0, &[0xFF; 64]);

    let code: Vec<u8> = (1..=32).collect();
    allocation.copy_code(0, &code);
    allocation.clear_bytes(32, 32);

    assert_eq!(&map[..32], &code[..]);
    assert_eq!(&map[32..64], &[0u8; 32]);
}

#[test]
fn relaxed_header_slot_round_trips_fixed_and_pointer_widths() {
    let (registry, _) = recording_registry();
    let (_map, address) = mapped_page(&registry);

    let allocation = WritableJitAllocation::register(
        &registry,
        address,
        64,
        JitAllocationKind::InstructionStream,
    );

    allocation.write_header_slot::<u32>(16, 0x1234_5678, StoreOrdering::Relaxed);
    allocation.write_header_slot::<u64>(24, u64::MAX - 5, StoreOrdering::Relaxed);
    allocation.write_header_slot::<usize>(32, usize::MAX / 3, StoreOrdering::Relaxed);
    allocation.write_value_relaxed::<u16>(address + 40, 0xBEEF);

    unsafe {
        assert_eq!(u32::load_relaxed(address + 16), 0x1234_5678);
        assert_eq!(u64::load_relaxed(address + 24), u64::MAX - 5);
        assert_eq!(usize::load_relaxed(address + 32), usize::MAX / 3);
        assert_eq!(u16::load_relaxed(address + 40), 0xBEEF);
    }
}

#[test]
fn freed_range_is_immediately_reusable() {
    let (registry, _) = recording_registry();
    let (_map, address) = mapped_page(&registry);

    WritableJitAllocation::register(&registry, address, 128, JitAllocationKind::InstructionStream);

    let page = WritableJitPage::new(&registry, address, 4096);
    page.free_range(address, 128);

    // The exact same range registers again without complaint.
    WritableJitAllocation::register(&registry, address, 128, JitAllocationKind::InstructionStream);
}

#[test]
#[should_panic(expected = "overlaps a live allocation")]
fn registering_over_live_sub_range_dies() {
    let (registry, _) = recording_registry();
    let (_map, address) = mapped_page(&registry);

    WritableJitAllocation::register(&registry, address, 128, JitAllocationKind::InstructionStream);
    WritableJitAllocation::register(
        &registry,
        address + 64,
        128,
        JitAllocationKind::InstructionStream,
    );
}

#[test]
#[should_panic(expected = "no instruction-stream allocation")]
fn looking_up_freed_memory_dies() {
    let (registry, _) = recording_registry();
    let (_map, address) = mapped_page(&registry);

    WritableJitAllocation::register(&registry, address, 64, JitAllocationKind::InstructionStream);
    WritableJitPage::new(&registry, address, 4096).free_range(address, 64);

    WritableJitAllocation::lookup(&registry, address, 64, JitAllocationKind::InstructionStream);
}

#[test]
fn offset_dispatch_publishes_compressed_pointers() {
    let (registry, _) = recording_registry();
    let (map, address) = mapped_page(&registry);

    let allocation = WritableJitAllocation::register(
        &registry,
        address,
        64,
        JitAllocationKind::InstructionStream,
    );

    let code_object = 0x0000_7000_0004_2000usize;
    allocation.write_header_slot_at(address + 8, code_object);

    let compressed = u32::from_ne_bytes(map[8..12].try_into().unwrap());
    assert_eq!(compressed, 0x0004_2000);
}
