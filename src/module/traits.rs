//! Module system traits and interfaces
//!
//! Defines the lifecycle hooks module components implement and the types the
//! host hands them when they are created and bound.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::module::channel::ChannelEnd;
use crate::module::host::HostBinding;
use crate::module::message::Message;
use crate::module::messenger::Messenger;

/// Kind of component a package can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Screen,
    Service,
    Database,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKind::Screen => write!(f, "screen"),
            ComponentKind::Service => write!(f, "service"),
            ComponentKind::Database => write!(f, "database"),
        }
    }
}

/// Surface a screen is rendered into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum ScreenType {
    /// Tab inside the host shell
    Tab = 0,
    /// Takes over the whole display (requires `system`)
    FullScreen = 1,
    /// Floating popup, several may coexist (requires `system`)
    PopupScreen = 2,
    /// Picture-in-picture window
    Pip = 3,
}

impl ScreenType {
    /// Whether more than one instance of a component may exist on this surface
    pub fn allows_multiple(self) -> bool {
        matches!(self, ScreenType::PopupScreen)
    }
}

/// Layout mode of popup surfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum ScreenMode {
    #[default]
    Single = 0,
    Dual = 1,
}

/// Drag gesture applied to a screen surface by the host shell
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DragEvent {
    pub x: f64,
    pub y: f64,
    /// True on the final event of a gesture
    pub finished: bool,
}

/// Identity of one rendered screen surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScreenId(Uuid);

impl ScreenId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ScreenId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ScreenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a component context, used as the owner key for observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

/// Context provided to a component instance by the host
///
/// One context exists per component instance and lives as long as the
/// instance. Observers registered on a `Monitorable` should use
/// [`ComponentContext::id`] as their owner and unregister before the
/// instance is destroyed.
#[derive(Clone)]
pub struct ComponentContext {
    id: ContextId,
    package_name: String,
    component_id: String,
    screen_id: Option<ScreenId>,
    messenger: Option<Messenger>,
    host: Arc<dyn HostBinding>,
}

impl ComponentContext {
    pub fn new(
        package_name: impl Into<String>,
        component_id: impl Into<String>,
        host: Arc<dyn HostBinding>,
    ) -> Self {
        Self {
            id: ContextId::new(),
            package_name: package_name.into(),
            component_id: component_id.into(),
            screen_id: None,
            messenger: None,
            host,
        }
    }

    /// Attach the rendered surface this context belongs to
    pub fn for_screen(mut self, screen_id: ScreenId, messenger: Messenger) -> Self {
        self.screen_id = Some(screen_id);
        self.messenger = Some(messenger);
        self
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn component_id(&self) -> &str {
        &self.component_id
    }

    pub fn screen_id(&self) -> Option<ScreenId> {
        self.screen_id
    }

    /// Messenger shared by components rendered on the same screen
    ///
    /// A service sees one only in the context passed to `on_bind` when it
    /// was bound from a screen; its own long-lived context has none.
    pub fn messenger(&self) -> Option<&Messenger> {
        self.messenger.as_ref()
    }

    pub fn host(&self) -> &Arc<dyn HostBinding> {
        &self.host
    }
}

impl fmt::Debug for ComponentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentContext")
            .field("id", &self.id)
            .field("package_name", &self.package_name)
            .field("component_id", &self.component_id)
            .field("screen_id", &self.screen_id)
            .finish()
    }
}

/// Lifecycle hooks of a screen component
///
/// Hooks are invoked from the host event loop and must return promptly. A
/// screen is bound to at most one message at a time; binding a new message
/// unbinds the previous one first.
pub trait ModuleScreen: Send + Sync {
    /// Accept or decline a message
    ///
    /// Returning `false` declines; the host discards `channel` and tries the
    /// next resolved candidate.
    fn on_bind(&self, message: &Message, channel: ChannelEnd, context: &ComponentContext) -> bool;

    /// The message bound by `on_bind` was released
    fn on_unbind(&self, _message: &Message) {}

    /// Host-side data the screen depends on finished synchronizing
    fn on_data_synchronized(&self) {}

    fn on_screen_focused(&self, _focused: bool) {}

    fn on_screen_visible(&self, _visible: bool) {}

    fn on_screen_mode_changed(&self, _mode: ScreenMode) {}

    fn on_screen_dragged(&self, _event: DragEvent) {}

    /// The rendered surface closed
    fn on_destroy(&self) {}
}

/// Lifecycle hooks of a service component
///
/// A service may be bound by several callers at once, each through its own
/// channel.
pub trait ModuleService: Send + Sync {
    fn on_start(&self, _context: &ComponentContext) {}

    fn on_bind(&self, message: &Message, channel: ChannelEnd, context: &ComponentContext) -> bool;

    fn on_unbind(&self, _message: &Message) {}

    fn on_stop(&self) {}
}

/// Caller-side receiver for bind results
pub trait ComponentBinder: Send + Sync {
    /// A component accepted the bind; `channel` is the caller's end
    fn on_bound(&self, package_name: &str, component_id: &str, channel: ChannelEnd);

    fn on_unbound(&self, _package_name: &str, _component_id: &str) {}
}

/// Creates component instances for one installed package
///
/// Supplied by whatever loads the package's code. Returning `None` means
/// the component cannot be instantiated, which the host treats like a
/// declined bind.
pub trait ComponentFactory: Send + Sync {
    fn create_screen(
        &self,
        _component_id: &str,
        _context: &ComponentContext,
    ) -> Option<Arc<dyn ModuleScreen>> {
        None
    }

    fn create_service(
        &self,
        _component_id: &str,
        _context: &ComponentContext,
    ) -> Option<Arc<dyn ModuleService>> {
        None
    }
}

/// Module system errors
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("No component matches message: {0}")]
    NoMatch(String),

    #[error("Every matching component declined the bind: {0}")]
    BindRejected(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Component unavailable: {0}")]
    ComponentUnavailable(String),

    #[error("Package not found: {0}")]
    PackageNotFound(String),

    #[error("Package already installed: {0}")]
    PackageAlreadyInstalled(String),

    #[error("Invalid package manifest: {0}")]
    InvalidManifest(String),

    #[error("Screen not found: {0}")]
    ScreenNotFound(ScreenId),

    #[error("No binding for message {0}")]
    NotBound(String),

    #[error("Too many open popups for {0}")]
    PopupLimit(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for ModuleError {
    fn from(e: toml::de::Error) -> Self {
        ModuleError::InvalidManifest(e.to_string())
    }
}

/// Short human-readable description of a message for errors and logs
pub(crate) fn describe(message: &Message) -> String {
    let mut parts = Vec::new();
    if let Some(action) = &message.action {
        parts.push(format!("action={}", action));
    }
    if let Some(category) = &message.category {
        parts.push(format!("category={}", category));
    }
    if let Some(package_name) = &message.package_name {
        parts.push(format!("package={}", package_name));
    }
    if let Some(component_id) = &message.component_id {
        parts.push(format!("component={}", component_id));
    }
    if parts.is_empty() {
        "<empty>".to_string()
    } else {
        parts.join(",")
    }
}
