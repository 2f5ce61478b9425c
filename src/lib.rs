//! Module host - message-routed component runtime
//!
//! Independently built packages register screens, services and database
//! readers with the host and are reached through declarative messages
//! rather than direct references.
//!
//! ## Design Principles
//!
//! 1. **Deterministic routing**: the same message against the same
//!    installed packages always resolves to the same components, in order
//! 2. **Fail closed**: permission checks run before anything is created,
//!    and a component that cannot be created counts as a declined bind
//! 3. **Contained module code**: panics in hooks and listeners are caught
//!    and logged, never propagated into the host

pub mod config;
pub mod module;
pub mod utils;

pub use config::{HostConfig, LoggingConfig, PackagesConfig, ScreensConfig};
pub use module::{
    ComponentLifecycleManager, Message, MessageFilter, ModuleError, Monitorable, PackageRegistry,
    Resolver,
};
