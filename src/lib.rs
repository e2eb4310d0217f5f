//! VirtIO MMIO request-forwarding core.
//!
//! Sits inside a static-partitioning type-1 hypervisor between a
//! frontend VM running an unmodified VirtIO driver and a backend VM
//! running the device model for a real device. Frontend MMIO traps are
//! converted into queued requests ([`trap`]), serviced by the backend
//! through a small hypercall surface ([`hypercall`]), and delivered back
//! through a cross-CPU message dispatch ([`messenger`]). See
//! [`instance`] for the boot-time pairing of frontend and backend VMs.
#![cfg_attr(not(test), no_std)]

pub mod access;
pub mod config;
pub mod error;
pub mod hypercall;
pub mod instance;
pub mod messenger;
pub mod param;
pub mod pool;
pub mod queue;
pub mod trap;
pub mod vcpu;

use access::AccessRecord;
use config::VmConfig;
use error::ConfigError;
use param::{MAX_BACKEND_RECORDS, MAX_FRONTEND_RECORDS};
use pool::Pool;
use vcpu::{CpuEvent, CpuMessenger, EmulAccess, VCpu};

pub use hypercall::AskResult;
pub use instance::{Instance, Registry};

/// Everything one VirtIO forwarding core needs: the instance registry
/// and the two shared access-record pools. A host typically owns exactly
/// one `Core` for its lifetime, built once at boot via [`Core::init`].
pub struct Core {
    pub registry: Registry,
    backend_pool: Pool<AccessRecord, MAX_BACKEND_RECORDS>,
    frontend_pool: Pool<AccessRecord, MAX_FRONTEND_RECORDS>,
}

impl Core {
    pub fn init(vms: &[VmConfig<'_>]) -> Result<Self, ConfigError> {
        let registry = Registry::init(vms)?;
        log::info!("virtio core: {} instance(s) paired", registry.len());
        Ok(Core {
            registry,
            backend_pool: Pool::new(),
            frontend_pool: Pool::new(),
        })
    }

    /// Record that a vCPU of some VM just started running on `cpu`,
    /// resolving the lazily-assigned CPU id of any instance that VM owns
    /// the backend or frontend side of.
    pub fn note_vcpu_running(&self, vm_id: u64, cpu: usize) {
        self.registry.note_vcpu_running(vm_id, cpu);
    }

    pub fn mmio_trap(
        &self,
        current_cpu: usize,
        vcpu: &mut dyn VCpu,
        messenger: &dyn CpuMessenger,
        access: EmulAccess,
    ) -> Result<bool, error::CoreError> {
        trap::mmio_trap(
            &self.registry,
            &self.backend_pool,
            current_cpu,
            vcpu,
            messenger,
            access,
        )
    }

    pub fn ask(
        &self,
        caller_vm: u64,
        virtio_id: u64,
        reg_off: u64,
        value: u64,
    ) -> Result<AskResult, i64> {
        hypercall::ask(&self.registry, &self.backend_pool, caller_vm, virtio_id, reg_off, value)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn complete(
        &self,
        messenger: &dyn CpuMessenger,
        caller_vm: u64,
        virtio_id: u64,
        op: access::Op,
        reg_off: u64,
        value: u64,
    ) -> i64 {
        hypercall::complete(
            &self.registry,
            &self.backend_pool,
            &self.frontend_pool,
            messenger,
            caller_vm,
            virtio_id,
            op,
            reg_off,
            value,
        )
    }

    pub fn notify(&self, messenger: &dyn CpuMessenger, caller_vm: u64, virtio_id: u64) -> i64 {
        hypercall::notify(&self.registry, messenger, caller_vm, virtio_id)
    }

    pub fn handle_message(
        &self,
        event: CpuEvent,
        virtio_id: u64,
        vcpu: &mut dyn VCpu,
    ) -> Result<(), error::CoreError> {
        messenger::handle_message(&self.registry, &self.frontend_pool, event, virtio_id, vcpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VirtioDeviceConfig;
    use std::collections::HashMap;

    struct MockVCpu {
        regs: HashMap<u16, u64>,
        pc_advanced_by: Option<u8>,
        active: bool,
    }
    impl MockVCpu {
        fn new() -> Self {
            MockVCpu { regs: HashMap::new(), pc_advanced_by: None, active: true }
        }
    }
    impl VCpu for MockVCpu {
        fn read_register(&self, idx: u16) -> u64 {
            *self.regs.get(&idx).unwrap_or(&0)
        }
        fn write_register(&mut self, idx: u16, val: u64) {
            self.regs.insert(idx, val);
        }
        fn advance_pc(&mut self, instr_len: u8) {
            self.pc_advanced_by = Some(instr_len);
        }
        fn set_active(&mut self, active: bool) {
            self.active = active;
        }
        fn inject_irq(&mut self, _irq: u32) {}
    }

    struct NullMessenger;
    impl CpuMessenger for NullMessenger {
        fn send(&self, _target_cpu: usize, _event: CpuEvent, _virtio_id: u64) {}
    }

    #[test]
    fn single_read_end_to_end() {
        let backend = [VirtioDeviceConfig {
            virtio_id: 7,
            is_backend: true,
            device_type: Some(2),
            device_interrupt: None,
            priority: None,
            va: None,
            size: None,
        }];
        let frontend = [VirtioDeviceConfig {
            virtio_id: 7,
            is_backend: false,
            device_type: None,
            device_interrupt: Some(42),
            priority: Some(10),
            va: Some(0x1000),
            size: Some(0x200),
        }];
        let vms = [
            VmConfig { vm_id: 0, virtio_devices: &backend, virtio_interrupt: 9, virtio_polling: false },
            VmConfig { vm_id: 1, virtio_devices: &frontend, virtio_interrupt: 0, virtio_polling: false },
        ];
        let core = Core::init(&vms).unwrap();
        core.note_vcpu_running(0, 0);
        core.note_vcpu_running(1, 1);

        let msgr = NullMessenger;
        let mut frontend_vcpu = MockVCpu::new();
        let access = EmulAccess { addr: 0x1010, width: 4, reg: 5, write: false, instr_len: 4 };
        let handled = core.mmio_trap(1, &mut frontend_vcpu, &msgr, access).unwrap();
        assert!(handled);
        assert!(!frontend_vcpu.active);
        assert_eq!(frontend_vcpu.pc_advanced_by, Some(4));

        let ask = core.ask(0, 7, 0, 0).unwrap();
        assert_eq!(ask.reg_off, 0x10);

        let code = core.complete(&msgr, 0, 7, access::Op::Read, 0x10, 0xDEADBEEF);
        assert_eq!(code, error::hc::SUCCESS);

        core.handle_message(CpuEvent::ReadNotify, 7, &mut frontend_vcpu).unwrap();
        assert_eq!(frontend_vcpu.regs.get(&5), Some(&0xDEADBEEF));
        assert!(frontend_vcpu.active);
    }
}
