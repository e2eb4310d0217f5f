//! Boot-time configuration data model.
//!
//! Plain `Copy` structs the host fills in from its own boot configuration
//! before calling [`crate::instance::Registry::init`]. This crate never
//! parses a configuration file; with the `serde` feature enabled these
//! additionally derive `Serialize`/`Deserialize` so a host that keeps its
//! boot configuration as TOML/JSON can deserialize straight into them.

use crate::access::VirtioId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VirtioDeviceConfig {
    pub virtio_id: VirtioId,
    pub is_backend: bool,
    /// Populated for backend declarations.
    pub device_type: Option<u32>,
    /// Populated for frontend declarations: the IRQ injected into the
    /// frontend on a backend NOTIFY.
    pub device_interrupt: Option<u32>,
    /// Populated for frontend declarations.
    pub priority: Option<u32>,
    /// Populated for frontend declarations: base and size of the emulated
    /// MMIO window.
    pub va: Option<u64>,
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VmConfig<'a> {
    pub vm_id: u64,
    #[cfg_attr(feature = "serde", serde(borrow))]
    pub virtio_devices: &'a [VirtioDeviceConfig],
    /// IRQ injected into the backend VM on a frontend MMIO trap.
    pub virtio_interrupt: u32,
    /// Whether this VM's backend devices are polling (drain via ASK
    /// hypercalls) rather than interrupt-driven.
    pub virtio_polling: bool,
}
