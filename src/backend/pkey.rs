use std::arch::asm;

use bitflags::bitflags;

use crate::backend::PermissionBackend;

// The `libc` crate does not declare the glibc protection-key wrappers, so bind
// them here. These are the same symbols `libc::pkey_alloc`/`libc::pkey_free`
// would resolve to; behavior and errno semantics are identical.
extern "C" {
    fn pkey_alloc(flags: libc::c_uint, access_rights: libc::c_uint) -> libc::c_int;
    fn pkey_free(pkey: libc::c_int) -> libc::c_int;
}

bitflags! {
    /// Per-key access restrictions as encoded in the PKRU register.
    ///
    /// Each allocated key owns two PKRU bits; the pair below is shifted into
    /// position for the key at hand.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct PkeyRights: u32 {
        /// All access through the key is disabled.
        const DISABLE_ACCESS = 1 << 0;
        /// Writes through the key are disabled, reads stay permitted.
        const DISABLE_WRITE = 1 << 1;
    }
}

/// Hardware memory-protection-key backend (Linux x86_64).
///
/// Allocates one protection key at construction and toggles its PKRU bits to
/// grant or revoke write access. The PKRU register is thread state, so the
/// writable window is confined to the toggling thread; other threads keep
/// executing the same pages undisturbed.
///
/// Tagging jit pages with the key is the embedder's job: this crate does not
/// map memory, so whoever maps the pages must also `pkey_mprotect` them with
/// [`key`](Self::key). Untagged pages are unaffected by the toggles.
#[derive(Debug)]
pub struct MemoryProtectionKeys {
    key: libc::c_int,
}

impl MemoryProtectionKeys {
    /// Attempts to allocate a protection key, execute-only by default.
    ///
    /// Returns `None` when the kernel or CPU lacks the feature (the
    /// `pkey_alloc` probe fails), in which case detection falls through to
    /// the next backend.
    pub fn allocate() -> Option<Self> {
        let key = unsafe { pkey_alloc(0, PkeyRights::DISABLE_WRITE.bits()) };
        if key < 0 {
            return None;
        }
        Some(MemoryProtectionKeys { key })
    }

    /// The allocated protection key, for tagging pages via `pkey_mprotect`.
    pub fn key(&self) -> i32 {
        self.key
    }

    fn key_mask(&self) -> u32 {
        PkeyRights::all().bits() << (2 * self.key as u32)
    }

    fn read_pkru() -> u32 {
        let eax: u32;
        unsafe {
            asm!(
                "rdpkru",
                out("eax") eax,
                out("edx") _,
                in("ecx") 0u32,
                options(nostack, preserves_flags),
            );
        }
        eax
    }

    fn write_pkru(value: u32) {
        unsafe {
            asm!(
                "wrpkru",
                in("eax") value,
                in("ecx") 0u32,
                in("edx") 0u32,
                options(nostack, preserves_flags),
            );
        }
    }
}

impl PermissionBackend for MemoryProtectionKeys {
    fn is_supported(&self) -> bool {
        true
    }

    fn set_writable(&self) {
        let pkru = Self::read_pkru();
        Self::write_pkru(pkru & !self.key_mask());
    }

    fn set_executable(&self) {
        let pkru = Self::read_pkru();
        let mask = PkeyRights::DISABLE_WRITE.bits() << (2 * self.key as u32);
        Self::write_pkru((pkru & !self.key_mask()) | mask);
    }
}

impl Drop for MemoryProtectionKeys {
    fn drop(&mut self) {
        unsafe {
            pkey_free(self.key);
        }
    }
}
