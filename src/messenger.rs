//! Cross-CPU messenger dispatch (C6), frontend reply path (C4.6) and
//! interrupt injector (C7).
//!
//! This is the handler a host registers on its one well-known IPI
//! channel; [`crate::trap::mmio_trap`] and [`crate::hypercall`] are the
//! only two places that call [`crate::vcpu::CpuMessenger::send`], and
//! this function is the only place that consumes what they sent.

use crate::access::{AccessRecord, Direction};
use crate::error::CoreError;
use crate::instance::Registry;
use crate::param::MAX_FRONTEND_RECORDS;
use crate::pool::Pool;
use crate::vcpu::{CpuEvent, VCpu};

/// Dispatch one delivered cross-CPU event on the physical CPU it targeted.
pub fn handle_message(
    registry: &Registry,
    frontend_pool: &Pool<AccessRecord, MAX_FRONTEND_RECORDS>,
    event: CpuEvent,
    virtio_id: u64,
    vcpu: &mut dyn VCpu,
) -> Result<(), CoreError> {
    match event {
        CpuEvent::ReadNotify | CpuEvent::WriteNotify => {
            deliver_reply(registry, frontend_pool, virtio_id, event, vcpu)
        }
        CpuEvent::InjectInterrupt => inject_interrupt(registry, virtio_id, vcpu),
        CpuEvent::NotifyBackendPoll => {
            // A polling backend drains `backend_pending` on its own
            // schedule via ASK; there is nothing to wake.
            log::trace!("virtio {virtio_id}: backend poll hint");
            Ok(())
        }
    }
}

fn deliver_reply(
    registry: &Registry,
    frontend_pool: &Pool<AccessRecord, MAX_FRONTEND_RECORDS>,
    virtio_id: u64,
    event: CpuEvent,
    vcpu: &mut dyn VCpu,
) -> Result<(), CoreError> {
    let instance = registry
        .get(virtio_id)
        .ok_or(CoreError::UnknownInstance(virtio_id))?;

    let mut state = instance.state.lock();
    let idx = state
        .frontend_reply
        .pop_front()
        .ok_or(CoreError::EmptyReply(virtio_id))?;
    drop(state);

    let record = frontend_pool.get(idx);
    frontend_pool.free(idx);

    if event == CpuEvent::ReadNotify {
        vcpu.write_register(record.reg, record.value);
    }
    vcpu.set_active(true);

    Ok(())
}

fn inject_interrupt(registry: &Registry, virtio_id: u64, vcpu: &mut dyn VCpu) -> Result<(), CoreError> {
    let instance = registry
        .get(virtio_id)
        .ok_or(CoreError::UnknownInstance(virtio_id))?;

    let direction = instance
        .state
        .lock()
        .direction
        .unwrap_or(Direction::FrontendToBackend);

    let irq = match direction {
        Direction::FrontendToBackend => instance.virtio_interrupt,
        Direction::BackendToFrontend => instance.device_interrupt,
    };
    assert!(irq != 0, "virtio {virtio_id}: interrupt injection with irq 0");

    vcpu.inject_irq(irq);
    Ok(())
}
