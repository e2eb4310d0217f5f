//! Error taxonomy.
//!
//! [`ConfigError`] is fatal at boot: the host logs it and refuses to start.
//! [`CoreError`] is returned from the runtime entry points ([`crate::trap`],
//! [`crate::hypercall`], [`crate::messenger`]) for conditions reachable from
//! a caller handing this crate stale or out-of-order data. Conditions that
//! can only follow from a misconfigured [`crate::instance::Instance`] (pool
//! exhaustion, a zero IRQ number) panic instead, matching the fatal
//! `ERROR()` path of the system this crate's protocol is modeled on.

use crate::access::VirtioId;

/// Errors detected while building a [`crate::instance::Registry`] from
/// configuration. All are fatal: the host must not proceed to run any VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("virtio id {0} declared as backend by more than one VM")]
    DuplicateBackend(VirtioId),
    #[error("virtio id {0} declared as frontend by more than one VM")]
    DuplicateFrontend(VirtioId),
    #[error("virtio id {0} has a frontend declaration but no backend")]
    UnpairedFrontend(VirtioId),
    #[error("backend/frontend count mismatch: {backends} backends, {frontends} frontends")]
    UnbalancedPairing { backends: usize, frontends: usize },
    #[error("configuration declares more than the maximum of {max} virtio instances")]
    TooManyInstances { max: usize },
}

/// Errors returned from the runtime request-forwarding paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("no virtio instance registered for id {0}")]
    UnknownInstance(VirtioId),
    #[error("virtio id {0}: backend cpu has not been resolved yet")]
    BackendCpuUnassigned(VirtioId),
    #[error("virtio id {0}: frontend reply queue empty at delivery")]
    EmptyReply(VirtioId),
}

/// Negated-error-code hypercall return values (the host ABI convention:
/// the hypercall's return register carries `-code`).
pub mod hc {
    pub const SUCCESS: i64 = 0;
    pub const FAILURE: i64 = 1;
    pub const INVAL_ARGS: i64 = 2;
}
