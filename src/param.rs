//! Compile-time capacity limits.
//!
//! Every pool in this crate is a fixed-size array; there is no allocator.
//! Bumping these constants is the only way to grow capacity.

/// Maximum number of VirtIO instances (paired frontend/backend) a single
/// [`crate::instance::Registry`] can hold.
pub const MAX_INSTANCES: usize = 50;

/// Maximum number of access records in flight across all instances on the
/// backend side at a time (submitted, not yet ASKed-and-replied). One
/// shared pool backs every instance's `backend_pending` queue.
pub const MAX_BACKEND_RECORDS: usize = 256;

/// Maximum number of access records in flight across all instances on the
/// frontend side at a time (replied, not yet delivered to a frontend
/// vCPU). One shared pool backs every instance's `frontend_reply` queue.
pub const MAX_FRONTEND_RECORDS: usize = 256;
