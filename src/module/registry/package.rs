//! Installed packages and their declared components
//!
//! The registry is copy-on-write: readers take an `Arc<RegistrySnapshot>`
//! and work on it without locks while install, update and uninstall
//! publish a fresh snapshot.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::module::message::{Message, MessageFilter};
use crate::module::security::PermissionSet;
use crate::module::traits::{ComponentKind, ModuleError};
use crate::utils::{read_unpoisoned, write_unpoisoned};

/// A screen, service or database declared by a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    pub kind: ComponentKind,
    pub id: String,
    pub name: String,
    pub filters: Vec<MessageFilter>,
}

impl ComponentDescriptor {
    pub fn new(kind: ComponentKind, id: impl Into<String>, filters: Vec<MessageFilter>) -> Self {
        let id = id.into();
        Self {
            kind,
            name: id.clone(),
            id,
            filters,
        }
    }

    /// True if any declared filter matches
    pub fn matches(&self, message: &Message) -> bool {
        self.filters.iter().any(|filter| filter.matches(message))
    }
}

/// Metadata of one installed package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    pub version: String,
    pub permissions: PermissionSet,
    pub screens: Vec<ComponentDescriptor>,
    pub services: Vec<ComponentDescriptor>,
    pub databases: Vec<ComponentDescriptor>,
}

impl PackageInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            permissions: PermissionSet::new(),
            screens: Vec::new(),
            services: Vec::new(),
            databases: Vec::new(),
        }
    }

    /// Append a component to the list for its kind
    pub fn with_component(mut self, component: ComponentDescriptor) -> Self {
        match component.kind {
            ComponentKind::Screen => self.screens.push(component),
            ComponentKind::Service => self.services.push(component),
            ComponentKind::Database => self.databases.push(component),
        }
        self
    }

    /// Declared components of one kind, in declaration order
    pub fn components(&self, kind: ComponentKind) -> &[ComponentDescriptor] {
        match kind {
            ComponentKind::Screen => &self.screens,
            ComponentKind::Service => &self.services,
            ComponentKind::Database => &self.databases,
        }
    }

    pub fn component(&self, kind: ComponentKind, id: &str) -> Option<&ComponentDescriptor> {
        self.components(kind).iter().find(|c| c.id == id)
    }

    /// Address every declared filter to its owner
    ///
    /// Unset `package_name` / `component_id` fields of non-empty filters take
    /// the declaring package and component, so a caller can narrow by
    /// either. Empty filters stay empty and keep matching nothing.
    fn with_owner_routing(mut self) -> Self {
        let package_name = self.name.clone();
        let components = self
            .screens
            .iter_mut()
            .chain(self.services.iter_mut())
            .chain(self.databases.iter_mut());
        for component in components {
            let component_id = component.id.clone();
            for filter in component.filters.iter_mut().filter(|f| !f.is_empty()) {
                filter
                    .package_name
                    .get_or_insert_with(|| package_name.clone());
                filter
                    .component_id
                    .get_or_insert_with(|| component_id.clone());
            }
        }
        self
    }
}

/// Installation state of a package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum PackageState {
    #[default]
    NotInstalled = 0,
    Installed = 1,
    Updating = 2,
    Uninstalling = 3,
    Broken = 4,
}

/// Package state keyed by package name
///
/// Names absent from the table are `NotInstalled`.
#[derive(Debug, Clone, Default)]
pub struct PackageStateTable {
    states: HashMap<String, PackageState>,
}

impl PackageStateTable {
    pub fn get(&self, package_name: &str) -> PackageState {
        self.states.get(package_name).copied().unwrap_or_default()
    }

    pub fn set(&mut self, package_name: impl Into<String>, state: PackageState) {
        let package_name = package_name.into();
        if state == PackageState::NotInstalled {
            self.states.remove(&package_name);
        } else {
            self.states.insert(package_name, state);
        }
    }
}

/// Immutable view of the installed packages
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    packages: Vec<Arc<PackageInfo>>,
    states: PackageStateTable,
}

impl RegistrySnapshot {
    /// Every known package in registration order, whatever its state
    pub fn packages(&self) -> &[Arc<PackageInfo>] {
        &self.packages
    }

    /// Packages that take part in resolution, in registration order
    pub fn installed(&self) -> impl Iterator<Item = &Arc<PackageInfo>> {
        self.packages
            .iter()
            .filter(|p| self.states.get(&p.name) == PackageState::Installed)
    }

    pub fn get(&self, package_name: &str) -> Option<&Arc<PackageInfo>> {
        self.packages.iter().find(|p| p.name == package_name)
    }

    pub fn state(&self, package_name: &str) -> PackageState {
        self.states.get(package_name)
    }

    pub fn is_installed(&self, package_name: &str) -> bool {
        self.state(package_name) == PackageState::Installed
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

/// Registry of installed packages
#[derive(Debug, Default)]
pub struct PackageRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl PackageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot; later mutations do not affect it
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&read_unpoisoned(&self.current))
    }

    /// Publish a modified copy of the current snapshot
    fn modify<R>(
        &self,
        change: impl FnOnce(&mut RegistrySnapshot) -> Result<R, ModuleError>,
    ) -> Result<R, ModuleError> {
        let mut current = write_unpoisoned(&self.current);
        let mut next = RegistrySnapshot::clone(&current);
        let result = change(&mut next)?;
        *current = Arc::new(next);
        Ok(result)
    }

    /// Register a new package after all previously installed ones
    pub fn install(&self, package: PackageInfo) -> Result<(), ModuleError> {
        let package = package.with_owner_routing();
        let name = package.name.clone();
        self.modify(|snapshot| {
            if snapshot.get(&name).is_some() {
                return Err(ModuleError::PackageAlreadyInstalled(name.clone()));
            }
            snapshot.packages.push(Arc::new(package));
            snapshot.states.set(name.clone(), PackageState::Installed);
            Ok(())
        })?;
        info!("Installed package {}", name);
        Ok(())
    }

    /// Replace a package's metadata wholesale, keeping its position
    pub fn update(&self, package: PackageInfo) -> Result<(), ModuleError> {
        let package = package.with_owner_routing();
        let name = package.name.clone();
        let version = package.version.clone();
        self.modify(|snapshot| {
            let slot = snapshot
                .packages
                .iter_mut()
                .find(|p| p.name == name)
                .ok_or_else(|| ModuleError::PackageNotFound(name.clone()))?;
            *slot = Arc::new(package);
            snapshot.states.set(name.clone(), PackageState::Installed);
            Ok(())
        })?;
        info!("Updated package {} to {}", name, version);
        Ok(())
    }

    /// Remove a package entirely
    pub fn uninstall(&self, package_name: &str) -> Result<Arc<PackageInfo>, ModuleError> {
        let removed = self.modify(|snapshot| {
            let index = snapshot
                .packages
                .iter()
                .position(|p| p.name == package_name)
                .ok_or_else(|| ModuleError::PackageNotFound(package_name.to_string()))?;
            snapshot.states.set(package_name, PackageState::NotInstalled);
            Ok(snapshot.packages.remove(index))
        })?;
        info!("Uninstalled package {}", package_name);
        Ok(removed)
    }

    /// Record a state change made by the package-management collaborator
    pub fn set_state(&self, package_name: &str, state: PackageState) -> Result<(), ModuleError> {
        self.modify(|snapshot| {
            if snapshot.get(package_name).is_none() {
                return Err(ModuleError::PackageNotFound(package_name.to_string()));
            }
            snapshot.states.set(package_name, state);
            Ok(())
        })?;
        if state == PackageState::Broken {
            warn!("Package {} marked broken", package_name);
        } else {
            debug!("Package {} is now {:?}", package_name, state);
        }
        Ok(())
    }

    pub fn get(&self, package_name: &str) -> Option<Arc<PackageInfo>> {
        self.snapshot().get(package_name).cloned()
    }

    pub fn state(&self, package_name: &str) -> PackageState {
        self.snapshot().state(package_name)
    }

    pub fn is_installed(&self, package_name: &str) -> bool {
        self.snapshot().is_installed(package_name)
    }
}
