//! Package registry and discovery
//!
//! Handles package discovery, manifest parsing and the copy-on-write
//! registry the resolver reads from.

pub mod discovery;
pub mod manifest;
pub mod package;

pub use discovery::{
    discover_and_install, install_discovered, DiscoveredPackage, PackageDiscovery, MANIFEST_FILE,
};
pub use manifest::{ComponentManifest, PackageManifest};
pub use package::{
    ComponentDescriptor, PackageInfo, PackageRegistry, PackageState, PackageStateTable,
    RegistrySnapshot,
};
