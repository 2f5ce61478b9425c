//! Module system for the host
//!
//! Packages declare screens, services and databases together with the
//! message filters that route to them. Callers never reference a component
//! directly: they build a [`Message`], the [`Resolver`] finds the matching
//! components, and the [`ComponentLifecycleManager`] instantiates one and
//! opens a [`Channel`] between caller and component.
//!
//! ## Architecture
//!
//! - **Resolution**: pure function of a message and a registry snapshot
//! - **Lifecycle**: screens and services are created, bound, unbound and
//!   destroyed by the manager; module hooks never run under a table lock
//! - **Channels**: one duplex event pipe per bind, torn down on unbind
//! - **Observables**: [`Monitorable`] pushes host state to every observer

pub mod channel;
pub mod host;
pub mod manager;
pub mod message;
pub mod messenger;
pub mod monitor;
pub mod program;
pub mod registry;
pub mod resolver;
pub mod security;
pub mod traits;
pub mod validation;

pub use channel::{Channel, ChannelEnd, ChannelId, ChannelSide, ListenerId};
pub use host::{DialogRequest, DialogResult, Environment, HostBinding, LoggingHost};
pub use manager::{
    ComponentLifecycleManager, ScreenBindState, ScreenHandle, ScreenManager, ScreenRequest,
    ServiceHandle, ServiceManager,
};
pub use message::{Message, MessageData, MessageFilter};
pub use messenger::{Messenger, SubscriptionId};
pub use monitor::{MonitorCallback, Monitorable, PublishGate};
pub use program::{spawn_timer_ticker, ProgramState, ProgramTimer, RunningProgramInfo};
pub use registry::{
    ComponentDescriptor, PackageDiscovery, PackageInfo, PackageManifest, PackageRegistry,
    PackageState, RegistrySnapshot,
};
pub use resolver::{resolve, ResolveInfo, Resolver};
pub use security::{Caller, ManagerKind, Permission, PermissionChecker, PermissionSet};
pub use traits::{
    ComponentBinder, ComponentContext, ComponentFactory, ComponentKind, ContextId, DragEvent,
    ModuleError, ModuleScreen, ModuleService, ScreenId, ScreenMode, ScreenType,
};
pub use validation::{ManifestValidator, ValidationResult};
