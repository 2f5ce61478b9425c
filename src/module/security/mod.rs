//! Permission enforcement for packages
//!
//! Checks run before any component is instantiated, so a denied request
//! leaves no trace in the lifecycle manager.

pub mod permissions;

pub use permissions::{
    parse_permission_string, Caller, ManagerKind, Permission, PermissionChecker, PermissionSet,
};
