//! Process-wide write-protection configuration.
//!
//! The flags that govern permission toggling are decided once at process
//! start and passed explicitly into [`JitRegistry`](crate::JitRegistry)
//! construction; nothing in this crate consults ambient global state. The
//! registry bundles the flags with the selected permission backend into an
//! [`Enforcement`] value, and every [`WriteScope`](crate::WriteScope) is
//! constructed from that bundle.
//!
//! # Examples
//!
//! ```rust
//! use jitguard::{JitRegistry, ProtectionOptions};
//!
//! let options = ProtectionOptions {
//!     jitless: false,
//!     force_write_protection: false,
//! };
//! let registry = JitRegistry::new(options);
//! assert!(!registry.enforcement().options().jitless);
//! ```

use std::fmt;
use std::sync::Arc;

use crate::backend::PermissionBackend;

/// Read-only configuration flags, fixed at process start.
///
/// `jitless` disables permission toggling entirely: when no page is ever made
/// executable there is nothing for W^X to protect, so scopes become no-ops.
/// `force_write_protection` overrides that and exercises the toggling paths
/// anyway, which is used for testing and hardening builds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtectionOptions {
    /// The embedder never produces executable pages.
    pub jitless: bool,
    /// Exercise write-protection even in jitless mode.
    pub force_write_protection: bool,
}

impl ProtectionOptions {
    /// Whether scopes should toggle permissions under these options.
    pub(crate) fn wants_toggle(self) -> bool {
        !self.jitless || self.force_write_protection
    }
}

/// How a write handle scopes its mutations.
///
/// The default keeps one [`WriteScope`](crate::WriteScope) alive for the
/// handle's whole lifetime, so a burst of mutations pays for a single
/// permission toggle. `Strict` holds no handle-lifetime scope and instead has
/// every individual mutator open and close its own: memory is execute-only
/// between calls, which catches call sites that bypass the handle and write
/// without it. Strict mode is a diagnostic tool, not a hardening feature.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteApiPolicy {
    /// One write scope spans the handle's lifetime.
    #[default]
    PerHandle,
    /// Each mutator call opens and closes its own write scope.
    Strict,
}

/// The configuration and backend bundle write scopes are constructed from.
///
/// Cheap to clone; handles keep a copy so scopes can be opened without
/// reaching back to the registry.
#[derive(Clone)]
pub struct Enforcement {
    backend: Arc<dyn PermissionBackend>,
    options: ProtectionOptions,
}

impl Enforcement {
    pub(crate) fn new(options: ProtectionOptions, backend: Arc<dyn PermissionBackend>) -> Self {
        Enforcement { backend, options }
    }

    /// The configuration flags this bundle was built with.
    pub fn options(&self) -> ProtectionOptions {
        self.options
    }

    /// Whether the host provides a hardware or OS permission mechanism.
    ///
    /// When this returns `false` the toggling calls are no-ops and jit memory
    /// stays unconditionally writable, a reduced but accepted security
    /// posture on such hosts. Callers must treat it as a permanent state,
    /// never as a failure.
    pub fn is_supported(&self) -> bool {
        self.backend.is_supported()
    }

    pub(crate) fn wants_toggle(&self) -> bool {
        self.options.wants_toggle()
    }

    pub(crate) fn backend(&self) -> &dyn PermissionBackend {
        self.backend.as_ref()
    }
}

impl fmt::Debug for Enforcement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Enforcement")
            .field("options", &self.options)
            .field("supported", &self.backend.is_supported())
            .finish()
    }
}
