//! Permission model for packages
//!
//! Packages declare permissions in their manifest. The host shell itself is
//! never restricted; a package acting as caller needs the permission of the
//! manager it uses, and needs `system` to open full-screen or popup
//! surfaces.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{debug, warn};

use crate::module::registry::PackageInfo;
use crate::module::traits::{ModuleError, ScreenType};

/// Parse a manifest permission string
pub fn parse_permission_string(perm_str: &str) -> Option<Permission> {
    match perm_str {
        "system" => Some(Permission::System),
        "screen_manager" => Some(Permission::ScreenManager),
        "service_manager" => Some(Permission::ServiceManager),
        "package_manager" => Some(Permission::PackageManager),
        "database" => Some(Permission::Database),
        _ => None,
    }
}

/// Permissions a package can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Privileged surfaces (full screen, popups)
    System,
    ScreenManager,
    ServiceManager,
    PackageManager,
    Database,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Permission::System => "system",
            Permission::ScreenManager => "screen_manager",
            Permission::ServiceManager => "service_manager",
            Permission::PackageManager => "package_manager",
            Permission::Database => "database",
        };
        f.write_str(name)
    }
}

/// Set of permissions granted to a package
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet {
    permissions: BTreeSet<Permission>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(permissions: Vec<Permission>) -> Self {
        Self {
            permissions: permissions.into_iter().collect(),
        }
    }

    pub fn add(&mut self, permission: Permission) {
        self.permissions.insert(permission);
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    /// Permissions in a stable order
    pub fn to_vec(&self) -> Vec<Permission> {
        self.permissions.iter().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }
}

/// Who is asking a manager to act
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Caller {
    /// The host shell
    Host,
    /// Code belonging to an installed package
    Package(String),
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Caller::Host => f.write_str("host"),
            Caller::Package(name) => write!(f, "package {}", name),
        }
    }
}

/// Manager surfaces a caller may drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagerKind {
    Screen,
    Service,
    Package,
}

impl ManagerKind {
    pub fn required_permission(self) -> Permission {
        match self {
            ManagerKind::Screen => Permission::ScreenManager,
            ManagerKind::Service => Permission::ServiceManager,
            ManagerKind::Package => Permission::PackageManager,
        }
    }
}

/// Permission checks run before anything is instantiated
#[derive(Debug, Clone, Default)]
pub struct PermissionChecker;

impl PermissionChecker {
    pub fn new() -> Self {
        Self
    }

    /// Permission a package needs to open a screen of `screen_type`
    pub fn required_for_screen(screen_type: ScreenType) -> Option<Permission> {
        match screen_type {
            ScreenType::FullScreen | ScreenType::PopupScreen => Some(Permission::System),
            ScreenType::Tab | ScreenType::Pip => None,
        }
    }

    /// May `package` render a screen of `screen_type`
    pub fn check_screen_type(
        &self,
        package: &PackageInfo,
        screen_type: ScreenType,
    ) -> Result<(), ModuleError> {
        let Some(required) = Self::required_for_screen(screen_type) else {
            return Ok(());
        };
        if package.permissions.has(required) {
            debug!("Package {} may open {:?}", package.name, screen_type);
            return Ok(());
        }
        warn!(
            "Package {} denied {:?} screen (missing permission: {})",
            package.name, screen_type, required
        );
        Err(ModuleError::PermissionDenied(format!(
            "package {} lacks {} for {:?}",
            package.name, required, screen_type
        )))
    }

    /// May `caller` use `manager`
    ///
    /// `permissions` are the caller package's granted permissions, `None`
    /// if the package is not installed.
    pub fn check_manager_access(
        &self,
        caller: &Caller,
        manager: ManagerKind,
        permissions: Option<&PermissionSet>,
    ) -> Result<(), ModuleError> {
        let Caller::Package(name) = caller else {
            return Ok(());
        };
        let required = manager.required_permission();
        match permissions {
            Some(granted) if granted.has(required) => Ok(()),
            Some(_) => {
                warn!("{} denied {:?} manager (missing permission: {})", caller, manager, required);
                Err(ModuleError::PermissionDenied(format!(
                    "package {} lacks {}",
                    name, required
                )))
            }
            None => Err(ModuleError::PackageNotFound(name.clone())),
        }
    }
}
