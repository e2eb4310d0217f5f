//! Instance registry (C1).
//!
//! A [`Registry`] is a fixed `[Option<InstanceSlot>; MAX_INSTANCES]` arena
//! built once at boot by [`Registry::init`] and never resized afterward —
//! instances are boot-allocated and live forever, so there is no freeing
//! path to mirror the one [`crate::pool::Pool`] has for access records.

use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::access::{Direction, VirtioId};
use crate::config::VmConfig;
use crate::error::ConfigError;
use crate::param::MAX_INSTANCES;
use crate::queue::{BackendQueue, FrontendQueue};

/// Sentinel meaning "no physical CPU has run a vCPU of the owning VM yet".
const CPU_UNRESOLVED: usize = usize::MAX;

/// The two queues and the last-transport-direction marker, guarded by one
/// lock per instance. Lock order is fixed: this lock, if held, is always
/// acquired before either access-record pool's internal lock, never after.
pub struct InstanceState {
    pub backend_pending: BackendQueue,
    pub frontend_reply: FrontendQueue,
    pub direction: Option<Direction>,
}

impl InstanceState {
    const fn new() -> Self {
        InstanceState {
            backend_pending: BackendQueue::new(),
            frontend_reply: FrontendQueue::new(),
            direction: None,
        }
    }
}

/// One paired (frontend, backend) VirtIO instance. Immutable after boot
/// except for the two lazily-resolved CPU ids, which race concurrent
/// trap/hypercall readers and are therefore atomics rather than plain
/// fields.
pub struct Instance {
    pub virtio_id: VirtioId,
    pub backend_vm_id: u64,
    /// `None` until a frontend declaration is paired onto this instance;
    /// distinct from "assigned to vm 0" so a second frontend declaration
    /// for the same `virtio_id` is detected as a duplicate rather than
    /// silently overwriting the first (invariant 1).
    pub frontend_vm_id: Option<u64>,
    backend_cpu_id: AtomicUsize,
    frontend_cpu_id: AtomicUsize,
    /// IRQ injected into the backend VM on a frontend MMIO trap.
    pub virtio_interrupt: u32,
    /// IRQ injected into the frontend VM on a backend NOTIFY.
    pub device_interrupt: u32,
    pub device_type: u32,
    pub priority: u32,
    pub polling: bool,
    /// Base and size of the frontend's emulated MMIO window, used to map
    /// a trapping address back to this instance (§4.3 step 1).
    pub window_va: u64,
    pub window_size: u64,
    pub state: Mutex<InstanceState>,
}

impl Instance {
    pub fn contains(&self, addr: u64) -> bool {
        self.window_size != 0
            && addr >= self.window_va
            && addr < self.window_va + self.window_size
    }
}

impl Instance {
    pub fn backend_cpu_id(&self) -> Option<usize> {
        match self.backend_cpu_id.load(Ordering::Acquire) {
            CPU_UNRESOLVED => None,
            cpu => Some(cpu),
        }
    }

    pub fn frontend_cpu_id(&self) -> Option<usize> {
        match self.frontend_cpu_id.load(Ordering::Acquire) {
            CPU_UNRESOLVED => None,
            cpu => Some(cpu),
        }
    }

    /// Record that a vCPU of the backend VM is now running on `cpu`.
    /// Vcpus are assumed pinned to one physical CPU for the system's
    /// lifetime; migration is not handled.
    pub fn resolve_backend_cpu(&self, cpu: usize) {
        self.backend_cpu_id.store(cpu, Ordering::Release);
    }

    pub fn resolve_frontend_cpu(&self, cpu: usize) {
        self.frontend_cpu_id.store(cpu, Ordering::Release);
    }
}

struct InstanceSlot {
    virtio_id: VirtioId,
    instance: Instance,
}

/// The boot-built table of VirtIO instances.
pub struct Registry {
    slots: [Option<InstanceSlot>; MAX_INSTANCES],
    len: usize,
}

impl Registry {
    /// Build a registry from the host's VM configuration table, validating
    /// the pairing invariants (§ invariant 1). Any violation is fatal and
    /// reported as a [`ConfigError`]; the host is expected to log it and
    /// abort boot rather than run with a partially valid registry.
    pub fn init(vms: &[VmConfig<'_>]) -> Result<Self, ConfigError> {
        let mut slots: [Option<InstanceSlot>; MAX_INSTANCES] = [(); MAX_INSTANCES].map(|_| None);
        let mut len = 0usize;
        let mut backends = 0usize;
        let mut frontends = 0usize;

        for vm in vms {
            for dev in vm.virtio_devices {
                if dev.is_backend {
                    if find_slot(&slots, dev.virtio_id).is_some() {
                        return Err(ConfigError::DuplicateBackend(dev.virtio_id));
                    }
                    if len >= MAX_INSTANCES {
                        return Err(ConfigError::TooManyInstances { max: MAX_INSTANCES });
                    }
                    log::debug!(
                        "virtio instance {}: backend on vm {}",
                        dev.virtio_id,
                        vm.vm_id
                    );
                    slots[len] = Some(InstanceSlot {
                        virtio_id: dev.virtio_id,
                        instance: Instance {
                            virtio_id: dev.virtio_id,
                            backend_vm_id: vm.vm_id,
                            frontend_vm_id: None,
                            backend_cpu_id: AtomicUsize::new(CPU_UNRESOLVED),
                            frontend_cpu_id: AtomicUsize::new(CPU_UNRESOLVED),
                            virtio_interrupt: vm.virtio_interrupt,
                            device_interrupt: 0,
                            device_type: dev.device_type.unwrap_or(0),
                            priority: 0,
                            polling: vm.virtio_polling,
                            window_va: 0,
                            window_size: 0,
                            state: Mutex::new(InstanceState::new()),
                        },
                    });
                    len += 1;
                    backends += 1;
                }
            }
        }

        for vm in vms {
            for dev in vm.virtio_devices {
                if !dev.is_backend {
                    let slot = find_slot_mut(&mut slots, dev.virtio_id)
                        .ok_or(ConfigError::UnpairedFrontend(dev.virtio_id))?;
                    if slot.instance.frontend_vm_id.is_some() {
                        return Err(ConfigError::DuplicateFrontend(dev.virtio_id));
                    }
                    log::debug!(
                        "virtio instance {}: frontend on vm {}",
                        dev.virtio_id,
                        vm.vm_id
                    );
                    slot.instance.frontend_vm_id = Some(vm.vm_id);
                    slot.instance.device_interrupt = dev.device_interrupt.unwrap_or(0);
                    slot.instance.priority = dev.priority.unwrap_or(0);
                    slot.instance.window_va = dev.va.unwrap_or(0);
                    slot.instance.window_size = dev.size.unwrap_or(0);
                    frontends += 1;
                }
            }
        }

        if backends != frontends {
            return Err(ConfigError::UnbalancedPairing { backends, frontends });
        }

        Ok(Registry { slots, len })
    }

    pub fn get(&self, virtio_id: VirtioId) -> Option<&Instance> {
        find_slot(&self.slots, virtio_id).map(|s| &s.instance)
    }

    /// Locate the instance whose frontend MMIO window contains `addr`
    /// (§4.3 step 1).
    pub fn find_by_addr(&self, addr: u64) -> Option<&Instance> {
        self.slots
            .iter()
            .flatten()
            .map(|s| &s.instance)
            .find(|inst| inst.contains(addr))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Resolve the lazily-assigned CPU id of every instance `vm_id` owns
    /// the backend or frontend side of. Called once per physical CPU the
    /// first time a vCPU of that VM runs on it (§4.1); a no-op for
    /// instances already resolved or that `vm_id` has no part in.
    pub fn note_vcpu_running(&self, vm_id: u64, cpu: usize) {
        for slot in self.slots.iter().flatten() {
            let inst = &slot.instance;
            if inst.backend_vm_id == vm_id {
                inst.resolve_backend_cpu(cpu);
            }
            if inst.frontend_vm_id == Some(vm_id) {
                inst.resolve_frontend_cpu(cpu);
            }
        }
    }
}

fn find_slot(slots: &[Option<InstanceSlot>; MAX_INSTANCES], virtio_id: VirtioId) -> Option<&InstanceSlot> {
    slots
        .iter()
        .flatten()
        .find(|slot| slot.virtio_id == virtio_id)
}

fn find_slot_mut(
    slots: &mut [Option<InstanceSlot>; MAX_INSTANCES],
    virtio_id: VirtioId,
) -> Option<&mut InstanceSlot> {
    slots
        .iter_mut()
        .flatten()
        .find(|slot| slot.virtio_id == virtio_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VirtioDeviceConfig;

    fn dev(virtio_id: u64, is_backend: bool) -> VirtioDeviceConfig {
        VirtioDeviceConfig {
            virtio_id,
            is_backend,
            device_type: is_backend.then_some(2),
            device_interrupt: (!is_backend).then_some(42),
            priority: (!is_backend).then_some(10),
            va: None,
            size: None,
        }
    }

    #[test]
    fn pairs_backend_and_frontend() {
        let backend_dev = [dev(7, true)];
        let frontend_dev = [dev(7, false)];
        let vms = [
            VmConfig { vm_id: 0, virtio_devices: &backend_dev, virtio_interrupt: 9, virtio_polling: false },
            VmConfig { vm_id: 1, virtio_devices: &frontend_dev, virtio_interrupt: 0, virtio_polling: false },
        ];
        let reg = Registry::init(&vms).unwrap();
        assert_eq!(reg.len(), 1);
        let inst = reg.get(7).unwrap();
        assert_eq!(inst.backend_vm_id, 0);
        assert_eq!(inst.frontend_vm_id, Some(1));
        assert_eq!(inst.device_interrupt, 42);
        assert_eq!(inst.priority, 10);
        assert!(inst.backend_cpu_id().is_none());
    }

    #[test]
    fn note_vcpu_running_resolves_matching_instances() {
        let backend_dev = [dev(7, true)];
        let frontend_dev = [dev(7, false)];
        let vms = [
            VmConfig { vm_id: 0, virtio_devices: &backend_dev, virtio_interrupt: 9, virtio_polling: false },
            VmConfig { vm_id: 1, virtio_devices: &frontend_dev, virtio_interrupt: 0, virtio_polling: false },
        ];
        let reg = Registry::init(&vms).unwrap();
        reg.note_vcpu_running(0, 4);
        let inst = reg.get(7).unwrap();
        assert_eq!(inst.backend_cpu_id(), Some(4));
        assert!(inst.frontend_cpu_id().is_none());
        reg.note_vcpu_running(1, 5);
        assert_eq!(inst.frontend_cpu_id(), Some(5));
    }

    #[test]
    fn duplicate_backend_is_rejected() {
        let d = [dev(3, true)];
        let vms = [
            VmConfig { vm_id: 0, virtio_devices: &d, virtio_interrupt: 0, virtio_polling: false },
            VmConfig { vm_id: 1, virtio_devices: &d, virtio_interrupt: 0, virtio_polling: false },
        ];
        match Registry::init(&vms) {
            Err(e) => assert_eq!(e, ConfigError::DuplicateBackend(3)),
            Ok(_) => panic!("expected DuplicateBackend"),
        }
    }

    #[test]
    fn duplicate_frontend_is_rejected_even_when_first_is_vm_zero() {
        // The first frontend declaration comes from vm 0 specifically,
        // the same value `frontend_vm_id` used to default to — this must
        // not be mistaken for "unassigned" by the second declaration.
        let backend_dev = [dev(4, true)];
        let frontend_dev = [dev(4, false)];
        let vms = [
            VmConfig { vm_id: 9, virtio_devices: &backend_dev, virtio_interrupt: 0, virtio_polling: false },
            VmConfig { vm_id: 0, virtio_devices: &frontend_dev, virtio_interrupt: 0, virtio_polling: false },
            VmConfig { vm_id: 1, virtio_devices: &frontend_dev, virtio_interrupt: 0, virtio_polling: false },
        ];
        match Registry::init(&vms) {
            Err(e) => assert_eq!(e, ConfigError::DuplicateFrontend(4)),
            Ok(_) => panic!("expected DuplicateFrontend"),
        }
    }

    #[test]
    fn unpaired_frontend_is_rejected() {
        let d = [dev(5, false)];
        let vms = [VmConfig { vm_id: 1, virtio_devices: &d, virtio_interrupt: 0, virtio_polling: false }];
        match Registry::init(&vms) {
            Err(e) => assert_eq!(e, ConfigError::UnpairedFrontend(5)),
            Ok(_) => panic!("expected UnpairedFrontend"),
        }
    }

    #[test]
    fn cpu_resolution_is_lazy() {
        let backend_dev = [dev(1, true)];
        let frontend_dev = [dev(1, false)];
        let vms = [
            VmConfig { vm_id: 0, virtio_devices: &backend_dev, virtio_interrupt: 0, virtio_polling: false },
            VmConfig { vm_id: 1, virtio_devices: &frontend_dev, virtio_interrupt: 0, virtio_polling: false },
        ];
        let reg = Registry::init(&vms).unwrap();
        let inst = reg.get(1).unwrap();
        assert!(inst.backend_cpu_id().is_none());
        inst.resolve_backend_cpu(3);
        assert_eq!(inst.backend_cpu_id(), Some(3));
    }
}
