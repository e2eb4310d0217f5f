//! The access record: one in-flight MMIO transaction.

use core::fmt;

/// Key joining one frontend VM declaration to one backend VM declaration.
pub type VirtioId = u64;

/// Index into a [`crate::pool::Pool`] slot array. `u16` is plenty for the
/// per-instance record budgets in [`crate::param`] and keeps a record cheap
/// enough to pass by value across the hypercall boundary.
pub type RecordIdx = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Read,
    Write,
}

/// Which way a transport event last moved, kept per-instance so the
/// interrupt injector ([`crate::instance::Instance::direction`]) knows
/// which IRQ number to raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    FrontendToBackend,
    BackendToFrontend,
}

/// One in-flight MMIO transaction, owned by exactly one of the backend or
/// frontend pool at a time. `Copy` so ownership transfer between pools
/// (see invariant 2) is a bitwise copy-and-free, never a shared mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRecord {
    pub virtio_id: VirtioId,
    /// Offset within the device's MMIO window.
    pub reg_off: u64,
    /// Absolute guest physical address; carried through for the backend's
    /// convenience, never compared against by this crate (see SPEC_FULL.md
    /// Open Question (a)).
    pub addr: u64,
    pub access_width: u8,
    pub op: Op,
    /// Write data on submission; read data on reply.
    pub value: u64,
    /// Frontend guest register index to restore on reply.
    pub reg: u16,
    pub priority: u32,
    pub frontend_cpu_id: usize,
    /// Set by ASK so a second ASK does not re-serve the same record.
    pub handled: bool,
}

impl AccessRecord {
    pub fn new(
        virtio_id: VirtioId,
        reg_off: u64,
        addr: u64,
        access_width: u8,
        op: Op,
        value: u64,
        reg: u16,
        priority: u32,
        frontend_cpu_id: usize,
    ) -> Self {
        Self {
            virtio_id,
            reg_off,
            addr,
            access_width,
            op,
            value,
            reg,
            priority,
            frontend_cpu_id,
            handled: false,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Read => write!(f, "read"),
            Op::Write => write!(f, "write"),
        }
    }
}
