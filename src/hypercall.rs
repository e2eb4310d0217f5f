//! Backend hypercall surface (C5).
//!
//! Every entry point here is, per its own contract, "invoked by the
//! backend VM": all four verify `caller_vm == instance.backend_vm_id`
//! before touching any instance state. Results are the negated error
//! codes in [`crate::error::hc`], matching the host's hypercall ABI
//! convention.

use crate::access::{AccessRecord, Direction, Op};
use crate::error::hc;
use crate::instance::Registry;
use crate::param::{MAX_BACKEND_RECORDS, MAX_FRONTEND_RECORDS};
use crate::pool::Pool;
use crate::vcpu::{CpuEvent, CpuMessenger};

/// Register contents ASK returns to the backend (`r1..r6`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AskResult {
    pub virtio_id: u64,
    pub reg_off: u64,
    pub addr: u64,
    pub op: Op,
    pub value: u64,
    pub access_width: u8,
}

fn owns(registry: &Registry, virtio_id: u64, caller_vm: u64) -> Result<&crate::instance::Instance, i64> {
    let instance = registry.get(virtio_id).ok_or(hc::FAILURE)?;
    if instance.backend_vm_id != caller_vm {
        return Err(hc::FAILURE);
    }
    Ok(instance)
}

/// The backend requests the next pending, not-yet-handled request.
/// `reg_off` and `value` are the hypercall's own argument registers and
/// are required to be zero for ASK, matching
/// `examples/original_source/src/core/virtio.c`'s
/// `if (reg_off != 0 || value != 0) break;` guard. Leaves the record in
/// `backend_pending` (invariant 5): no reply is implied by ASK.
pub fn ask(
    registry: &Registry,
    backend_pool: &Pool<AccessRecord, MAX_BACKEND_RECORDS>,
    caller_vm: u64,
    virtio_id: u64,
    reg_off: u64,
    value: u64,
) -> Result<AskResult, i64> {
    if reg_off != 0 || value != 0 {
        return Err(hc::FAILURE);
    }
    let instance = owns(registry, virtio_id, caller_vm)?;
    let mut state = instance.state.lock();
    let idx = state
        .backend_pending
        .find(|i| !backend_pool.with(i, |r| r.handled))
        .ok_or(hc::FAILURE)?;
    backend_pool.with_mut(idx, |r| r.handled = true);
    let record = backend_pool.get(idx);
    drop(state);
    Ok(AskResult {
        virtio_id: record.virtio_id,
        reg_off: record.reg_off,
        addr: record.addr,
        op: record.op,
        value: record.value,
        access_width: record.access_width,
    })
}

/// The backend reports completion of a READ or WRITE for `virtio_id` at
/// `reg_off`, carrying `value` (result data for READ, ignored for WRITE).
///
/// The head of `backend_pending` is peeked, never blindly popped: if its
/// `reg_off` does not match, the exchange is out of sync and this
/// returns failure leaving the queue untouched, rather than popping and
/// leaking the record.
pub fn complete(
    registry: &Registry,
    backend_pool: &Pool<AccessRecord, MAX_BACKEND_RECORDS>,
    frontend_pool: &Pool<AccessRecord, MAX_FRONTEND_RECORDS>,
    messenger: &dyn CpuMessenger,
    caller_vm: u64,
    virtio_id: u64,
    op: Op,
    reg_off: u64,
    value: u64,
) -> i64 {
    let instance = match owns(registry, virtio_id, caller_vm) {
        Ok(i) => i,
        Err(code) => return code,
    };

    let mut state = instance.state.lock();
    let Some(head) = state.backend_pending.peek() else {
        return hc::FAILURE;
    };
    if backend_pool.with(head, |r| r.reg_off) != reg_off {
        return hc::FAILURE;
    }
    let popped = state.backend_pending.pop().expect("peeked head must pop");

    let mut record = backend_pool.get(popped);
    record.value = value;
    backend_pool.free(popped);

    let Some(new_idx) = frontend_pool.alloc(record) else {
        log::error!("virtio {virtio_id}: frontend reply pool exhausted");
        panic!("frontend access record pool exhausted");
    };
    state.frontend_reply.push_back(new_idx);
    state.direction = Some(Direction::BackendToFrontend);
    let frontend_cpu = record.frontend_cpu_id;
    drop(state);

    let event = match op {
        Op::Read => CpuEvent::ReadNotify,
        Op::Write => CpuEvent::WriteNotify,
    };
    messenger.send(frontend_cpu, event, virtio_id);

    hc::SUCCESS
}

/// The backend requests that a virtual interrupt be injected into the
/// frontend (no queue interaction).
pub fn notify(
    registry: &Registry,
    messenger: &dyn CpuMessenger,
    caller_vm: u64,
    virtio_id: u64,
) -> i64 {
    let instance = match owns(registry, virtio_id, caller_vm) {
        Ok(i) => i,
        Err(code) => return code,
    };
    let Some(frontend_cpu) = instance.frontend_cpu_id() else {
        return hc::FAILURE;
    };
    {
        let mut state = instance.state.lock();
        state.direction = Some(Direction::BackendToFrontend);
    }
    messenger.send(frontend_cpu, CpuEvent::InjectInterrupt, virtio_id);
    hc::SUCCESS
}
