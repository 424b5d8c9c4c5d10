mod audit_delta;
mod id_allocator;
pub(crate) mod key_material;

pub use audit_delta::{
    property_delta, put_delta, put_property_delta, AuditDetails, UnchangedPolicy,
    AUTO_ACTIVATION_DETAIL,
};
pub use id_allocator::IdAllocator;
