//! Kestrel error module.
//!
//! There is a single [`EcsError`] enum covering everything the registry,
//! the type registry, the groups and the snapshot codec can report.

use std::error::Error as StdError;
use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::entity::Entity;

/// The Kestrel error type.
///
/// Every fallible operation in this library reports one of these variants at
/// the call site. Operations documented as silent no-ops (e.g. destroying an
/// already-dead entity) do not go through this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcsError {
    /// The entity allocator exhausted the 32-bit index space.
    OutOfEntities,
    /// More than [`MAX_COMPONENT_TYPES`](crate::comp::MAX_COMPONENT_TYPES)
    /// distinct component types were registered.
    TooManyTypes,
    /// `add` was called for an entity that already has the component.
    AlreadyPresent(Entity),
    /// The operation requires a live entity, but the handle is dead.
    NotAlive(Entity),
    /// The operation requires the component to be present on the entity
    /// (`replace`, `patch`), but it is not.
    NotPresent(Entity),
    /// Creating an owning group that would own a component type already
    /// owned by another group, or sorting a store owned by a group.
    OwnershipConflict,
    /// `use_storage` was called after a store with a different storage
    /// policy already exists for the component type.
    PolicyMismatch,
    /// The snapshot buffer does not start with the expected magic number.
    BadMagic(u32),
    /// The snapshot buffer carries an unsupported format version.
    BadVersion(u8),
    /// A value in the snapshot buffer carries the wrong type tag.
    BadTag {
        /// The tag the reader expected.
        expected: u8,
        /// The tag actually found in the buffer.
        found: u8,
    },
    /// The snapshot buffer ended before the expected data.
    Truncated,
    /// The snapshot buffer does not end with the footer magic.
    BadFooter,
}

impl Display for EcsError {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match *self {
            EcsError::OutOfEntities => write!(f, "entity index space exhausted"),
            EcsError::TooManyTypes => {
                write!(f, "too many distinct component types registered")
            }
            EcsError::AlreadyPresent(e) => {
                write!(f, "component already present on {:?}", e)
            }
            EcsError::NotAlive(e) => write!(f, "entity {:?} is not alive", e),
            EcsError::NotPresent(e) => {
                write!(f, "component not present on {:?}", e)
            }
            EcsError::OwnershipConflict => {
                write!(f, "component type is already owned by a group")
            }
            EcsError::PolicyMismatch => {
                write!(f, "a store with a different storage policy already exists")
            }
            EcsError::BadMagic(m) => write!(f, "bad snapshot magic {:#010x}", m),
            EcsError::BadVersion(v) => write!(f, "unsupported snapshot version {}", v),
            EcsError::BadTag { expected, found } => write!(
                f,
                "wrong value tag in snapshot: expected {:#04x}, found {:#04x}",
                expected, found
            ),
            EcsError::Truncated => write!(f, "snapshot buffer is truncated"),
            EcsError::BadFooter => write!(f, "snapshot footer magic missing or wrong"),
        }
    }
}

impl StdError for EcsError {}
