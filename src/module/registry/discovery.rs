//! Package discovery
//!
//! Scans a packages directory for `*/module.toml` manifests. Directories are
//! visited in sorted order so registration order is reproducible.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::PackagesConfig;
use crate::module::registry::manifest::PackageManifest;
use crate::module::registry::package::{PackageInfo, PackageRegistry};
use crate::module::traits::ModuleError;
use crate::module::validation::ManifestValidator;
use crate::utils::{log_error, with_default};

pub const MANIFEST_FILE: &str = "module.toml";

/// A package found on disk with a valid manifest
#[derive(Debug, Clone)]
pub struct DiscoveredPackage {
    pub directory: PathBuf,
    pub manifest: PackageManifest,
    pub info: PackageInfo,
}

/// Package directory scanner
pub struct PackageDiscovery {
    packages_dir: PathBuf,
    validator: ManifestValidator,
}

impl PackageDiscovery {
    pub fn new<P: AsRef<Path>>(packages_dir: P) -> Self {
        Self {
            packages_dir: packages_dir.as_ref().to_path_buf(),
            validator: ManifestValidator::new(),
        }
    }

    pub fn packages_dir(&self) -> &Path {
        &self.packages_dir
    }

    /// Discover every valid package, skipping invalid ones with a warning
    pub fn discover_packages(&self) -> Result<Vec<DiscoveredPackage>, ModuleError> {
        info!("Discovering packages in {:?}", self.packages_dir);

        if !self.packages_dir.exists() {
            debug!("Packages directory {:?} does not exist", self.packages_dir);
            return Ok(Vec::new());
        }

        let mut directories = Vec::new();
        for entry in fs::read_dir(&self.packages_dir)? {
            let path = entry?.path();
            if path.is_dir() {
                directories.push(path);
            }
        }
        directories.sort();

        let mut packages = Vec::new();
        for directory in directories {
            let manifest_path = directory.join(MANIFEST_FILE);
            if !manifest_path.exists() {
                debug!("No {} found in {:?}, skipping", MANIFEST_FILE, directory);
                continue;
            }
            match self.load(&directory) {
                Ok(package) => packages.push(package),
                Err(e) => warn!("Skipping package in {:?}: {}", directory, e),
            }
        }

        info!("Discovered {} packages", packages.len());
        Ok(packages)
    }

    /// Discover one package by its directory name
    pub fn discover_package(&self, dir_name: &str) -> Result<DiscoveredPackage, ModuleError> {
        let directory = self.packages_dir.join(dir_name);
        if !directory.join(MANIFEST_FILE).exists() {
            return Err(ModuleError::PackageNotFound(format!(
                "{} (no {} in {:?})",
                dir_name, MANIFEST_FILE, directory
            )));
        }
        self.load(&directory)
    }

    fn load(&self, directory: &Path) -> Result<DiscoveredPackage, ModuleError> {
        let manifest = PackageManifest::from_file(directory.join(MANIFEST_FILE))?;
        self.validator
            .validate(&manifest)
            .into_result(&manifest.name)?;
        let info = manifest.to_package_info()?;
        Ok(DiscoveredPackage {
            directory: directory.to_path_buf(),
            manifest,
            info,
        })
    }
}

/// Install discovered packages in discovery order
///
/// With a non-empty `enabled` list only the named packages are installed.
/// Returns how many were installed; failures are logged and skipped.
pub fn install_discovered(
    registry: &PackageRegistry,
    packages: &[DiscoveredPackage],
    enabled: &[String],
) -> usize {
    packages
        .iter()
        .filter(|p| enabled.is_empty() || enabled.contains(&p.info.name))
        .filter_map(|p| {
            log_error(
                || registry.install(p.info.clone()),
                &format!("Failed to install {}", p.info.name),
            )
        })
        .count()
}

/// Discover and install packages as `[packages]` configures
///
/// Does nothing when `auto_discover` is off. An unreadable packages
/// directory is logged and treated as empty.
pub fn discover_and_install(config: &PackagesConfig, registry: &PackageRegistry) -> usize {
    if !config.auto_discover {
        debug!("Package auto-discovery disabled");
        return 0;
    }
    let discovery = PackageDiscovery::new(&config.packages_dir);
    let packages = with_default(
        || discovery.discover_packages(),
        Vec::new(),
        "Package discovery failed",
    );
    install_discovered(registry, &packages, &config.enabled_packages)
}
