//! Package manifest parsing
//!
//! Handles parsing `module.toml` manifests into [`PackageInfo`].

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::module::message::MessageFilter;
use crate::module::registry::package::{ComponentDescriptor, PackageInfo};
use crate::module::security::{parse_permission_string, PermissionSet};
use crate::module::traits::{ComponentKind, ModuleError};

/// One `[[screens]]`, `[[services]]` or `[[databases]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentManifest {
    pub id: String,
    /// Display name, defaults to the id
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub filters: Vec<MessageFilter>,
}

impl ComponentManifest {
    fn to_descriptor(&self, kind: ComponentKind) -> ComponentDescriptor {
        ComponentDescriptor {
            kind,
            id: self.id.clone(),
            name: self.name.clone().unwrap_or_else(|| self.id.clone()),
            filters: self.filters.clone(),
        }
    }
}

/// Package manifest (module.toml structure)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageManifest {
    /// Reverse-DNS package name
    pub name: String,
    /// Semantic version
    pub version: String,
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub screens: Vec<ComponentManifest>,
    #[serde(default)]
    pub services: Vec<ComponentManifest>,
    #[serde(default)]
    pub databases: Vec<ComponentManifest>,
}

impl PackageManifest {
    /// Load manifest from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ModuleError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ModuleError::InvalidManifest(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&contents).map_err(|e| match e {
            ModuleError::InvalidManifest(msg) => {
                ModuleError::InvalidManifest(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// Parse manifest TOML and check required fields
    pub fn parse(contents: &str) -> Result<Self, ModuleError> {
        let manifest: PackageManifest = toml::from_str(contents)?;

        if manifest.name.is_empty() {
            return Err(ModuleError::InvalidManifest(
                "Package name cannot be empty".to_string(),
            ));
        }
        if manifest.version.is_empty() {
            return Err(ModuleError::InvalidManifest(
                "Package version cannot be empty".to_string(),
            ));
        }

        Ok(manifest)
    }

    /// Convert to the registry representation
    pub fn to_package_info(&self) -> Result<PackageInfo, ModuleError> {
        let mut permissions = PermissionSet::new();
        for perm in &self.permissions {
            let permission = parse_permission_string(perm).ok_or_else(|| {
                ModuleError::InvalidManifest(format!(
                    "{}: unknown permission {}",
                    self.name, perm
                ))
            })?;
            permissions.add(permission);
        }

        Ok(PackageInfo {
            name: self.name.clone(),
            version: self.version.clone(),
            permissions,
            screens: convert(&self.screens, ComponentKind::Screen),
            services: convert(&self.services, ComponentKind::Service),
            databases: convert(&self.databases, ComponentKind::Database),
        })
    }

    /// Component entries of one kind
    pub fn components(&self, kind: ComponentKind) -> &[ComponentManifest] {
        match kind {
            ComponentKind::Screen => &self.screens,
            ComponentKind::Service => &self.services,
            ComponentKind::Database => &self.databases,
        }
    }
}

fn convert(entries: &[ComponentManifest], kind: ComponentKind) -> Vec<ComponentDescriptor> {
    entries.iter().map(|e| e.to_descriptor(kind)).collect()
}

impl TryFrom<PackageManifest> for PackageInfo {
    type Error = ModuleError;

    fn try_from(manifest: PackageManifest) -> Result<Self, Self::Error> {
        manifest.to_package_info()
    }
}
