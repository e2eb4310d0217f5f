//! MMIO trap adaptor (C4).

use crate::access::{AccessRecord, Op};
use crate::error::CoreError;
use crate::instance::Registry;
use crate::param::MAX_BACKEND_RECORDS;
use crate::pool::Pool;
use crate::vcpu::{CpuEvent, CpuMessenger, EmulAccess, VCpu};

/// Handle a single frontend MMIO trap.
///
/// Returns `Ok(true)` if the access landed inside a known VirtIO window
/// and was queued for the backend; `Ok(false)` if it did not, so the
/// caller may try other emulators. The parked vCPU is resumed later by
/// [`crate::messenger::handle_message`] once the backend replies.
pub fn mmio_trap(
    registry: &Registry,
    backend_pool: &Pool<AccessRecord, MAX_BACKEND_RECORDS>,
    current_cpu: usize,
    vcpu: &mut dyn VCpu,
    messenger: &dyn CpuMessenger,
    access: EmulAccess,
) -> Result<bool, CoreError> {
    let Some(instance) = registry.find_by_addr(access.addr) else {
        return Ok(false);
    };

    let Some(backend_cpu) = instance.backend_cpu_id() else {
        return Err(CoreError::BackendCpuUnassigned(instance.virtio_id));
    };

    let value = if access.write {
        vcpu.read_register(access.reg)
    } else {
        0
    };
    let op = if access.write { Op::Write } else { Op::Read };

    let record = AccessRecord::new(
        instance.virtio_id,
        access.addr - instance.window_va,
        access.addr,
        access.width,
        op,
        value,
        access.reg,
        instance.priority,
        current_cpu,
    );

    let idx = backend_pool
        .alloc(record)
        .expect("backend access record pool exhausted");

    {
        let mut state = instance.state.lock();
        state
            .backend_pending
            .insert_ordered(idx, |i| backend_pool.with(i, |r| r.priority));
        state.direction = Some(crate::access::Direction::FrontendToBackend);
    }

    let event = if instance.polling {
        CpuEvent::NotifyBackendPoll
    } else {
        CpuEvent::InjectInterrupt
    };
    messenger.send(backend_cpu, event, instance.virtio_id);

    vcpu.advance_pc(access.instr_len);
    vcpu.set_active(false);

    log::trace!(
        "virtio {}: queued {} at off {:#x} from cpu {}",
        instance.virtio_id,
        op,
        access.addr - instance.window_va,
        current_cpu
    );

    Ok(true)
}
