//! Manifest validation
//!
//! Validates package manifests for structure and routing sanity before a
//! package is registered.

use std::collections::HashSet;
use tracing::{debug, warn};

use crate::module::registry::manifest::{ComponentManifest, PackageManifest};
use crate::module::security::parse_permission_string;
use crate::module::traits::{ComponentKind, ModuleError};

/// Validation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    /// Manifest is invalid with specific errors
    Invalid(Vec<String>),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    /// Convert into a `Result`, joining the error list
    pub fn into_result(self, package_name: &str) -> Result<(), ModuleError> {
        match self {
            ValidationResult::Valid => Ok(()),
            ValidationResult::Invalid(errors) => Err(ModuleError::InvalidManifest(format!(
                "{}: {}",
                package_name,
                errors.join("; ")
            ))),
        }
    }
}

/// Manifest validator
pub struct ManifestValidator {
    max_name_len: usize,
}

impl ManifestValidator {
    pub fn new() -> Self {
        Self { max_name_len: 128 }
    }

    /// Validate a package manifest
    pub fn validate(&self, manifest: &PackageManifest) -> ValidationResult {
        let mut errors = Vec::new();

        if !self.is_valid_name(&manifest.name) {
            errors.push(format!(
                "Invalid package name: {} (expected reverse-DNS style with alphanumerics, '.', '-', '_')",
                manifest.name
            ));
        }

        if !self.is_valid_version(&manifest.version) {
            errors.push(format!(
                "Invalid version format: {} (expected semantic versioning)",
                manifest.version
            ));
        }

        for perm in &manifest.permissions {
            if parse_permission_string(perm).is_none() {
                errors.push(format!("Unknown permission: {}", perm));
            }
        }

        for kind in [
            ComponentKind::Screen,
            ComponentKind::Service,
            ComponentKind::Database,
        ] {
            errors.extend(self.validate_components(kind, manifest.components(kind)));
        }

        if errors.is_empty() {
            debug!("Manifest validation passed for package: {}", manifest.name);
            ValidationResult::Valid
        } else {
            warn!(
                "Manifest validation failed for package {}: {:?}",
                manifest.name, errors
            );
            ValidationResult::Invalid(errors)
        }
    }

    fn validate_components(&self, kind: ComponentKind, components: &[ComponentManifest]) -> Vec<String> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();

        for component in components {
            if component.id.trim().is_empty() {
                errors.push(format!("{} component with empty id", kind));
                continue;
            }
            if !seen.insert(component.id.as_str()) {
                errors.push(format!("Duplicate {} id: {}", kind, component.id));
            }
            if component.filters.iter().any(|f| f.is_empty()) {
                errors.push(format!(
                    "{} {} declares a filter with no fields",
                    kind, component.id
                ));
            }
        }

        errors
    }

    /// Reverse-DNS style: dot-separated non-empty segments
    #[inline]
    fn is_valid_name(&self, name: &str) -> bool {
        if name.is_empty() || name.len() > self.max_name_len {
            return false;
        }

        if !name.chars().next().is_some_and(|c| c.is_ascii_alphanumeric()) {
            return false;
        }

        name.split('.').all(|segment| !segment.is_empty())
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
    }

    /// Validate version format (semantic versioning)
    ///
    /// Accepts: major.minor.patch[-prerelease][+build]
    #[inline]
    fn is_valid_version(&self, version: &str) -> bool {
        let base = version.split('+').next().unwrap_or_default();
        let core = base.split('-').next().unwrap_or_default();

        let nums: Vec<&str> = core.split('.').collect();
        if nums.len() != 3 {
            return false;
        }

        nums.iter()
            .all(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) && n.parse::<u64>().is_ok())
    }
}

impl Default for ManifestValidator {
    fn default() -> Self {
        Self::new()
    }
}
