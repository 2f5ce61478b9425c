//! Component lifecycle manager
//!
//! Owns every live screen and service instance. Resolution picks the
//! candidates, the permission checker filters them, and the screen and
//! service managers create, bind, unbind and destroy instances.
//!
//! Instance tables sit behind `tokio::sync::Mutex`. No table lock is held
//! while module code runs, so hooks may call back into the managers.

pub mod screen;
pub mod service;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::config::ScreensConfig;
use crate::module::host::HostBinding;
use crate::module::message::Message;
use crate::module::registry::{PackageInfo, PackageRegistry, PackageState};
use crate::module::resolver::Resolver;
use crate::module::security::{Caller, ManagerKind, PermissionChecker};
use crate::module::traits::{ComponentBinder, ComponentFactory, ModuleError, ScreenId};
use crate::utils::{read_unpoisoned, write_unpoisoned};

pub use screen::{ScreenBindState, ScreenHandle, ScreenManager, ScreenRequest};
pub use service::{ServiceHandle, ServiceManager};

/// State shared by the screen and service managers
pub(crate) struct RuntimeShared {
    pub(crate) registry: Arc<PackageRegistry>,
    pub(crate) resolver: Resolver,
    pub(crate) permissions: PermissionChecker,
    pub(crate) host: Arc<dyn HostBinding>,
    pub(crate) screens_config: ScreensConfig,
    factories: RwLock<HashMap<String, Arc<dyn ComponentFactory>>>,
}

impl RuntimeShared {
    pub(crate) fn factory(&self, package_name: &str) -> Option<Arc<dyn ComponentFactory>> {
        read_unpoisoned(&self.factories).get(package_name).cloned()
    }

    /// Reject package callers lacking the manager permission
    pub(crate) fn authorize(&self, caller: &Caller, manager: ManagerKind) -> Result<(), ModuleError> {
        let snapshot = self.registry.snapshot();
        let permissions = match caller {
            Caller::Host => None,
            Caller::Package(name) => snapshot
                .get(name)
                .filter(|_| snapshot.is_installed(name))
                .map(|p| &p.permissions),
        };
        self.permissions
            .check_manager_access(caller, manager, permissions)
    }
}

/// Compare binders by the address of their data
pub(crate) fn same_binder(a: &Arc<dyn ComponentBinder>, b: &Arc<dyn ComponentBinder>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const u8, Arc::as_ptr(b) as *const u8)
}

/// Entry point for the host shell
pub struct ComponentLifecycleManager {
    shared: Arc<RuntimeShared>,
    screens: ScreenManager,
    services: ServiceManager,
}

impl ComponentLifecycleManager {
    pub fn new(registry: Arc<PackageRegistry>, host: Arc<dyn HostBinding>) -> Self {
        Self::with_config(registry, host, ScreensConfig::default())
    }

    pub fn with_config(
        registry: Arc<PackageRegistry>,
        host: Arc<dyn HostBinding>,
        screens_config: ScreensConfig,
    ) -> Self {
        let shared = Arc::new(RuntimeShared {
            resolver: Resolver::new(Arc::clone(&registry)),
            registry,
            permissions: PermissionChecker::new(),
            host,
            screens_config,
            factories: RwLock::new(HashMap::new()),
        });
        Self {
            screens: ScreenManager::new(Arc::clone(&shared)),
            services: ServiceManager::new(Arc::clone(&shared)),
            shared,
        }
    }

    /// Supply the code that instantiates a package's components
    pub fn register_factory(&self, package_name: impl Into<String>, factory: Arc<dyn ComponentFactory>) {
        let package_name = package_name.into();
        debug!("Registered component factory for {}", package_name);
        write_unpoisoned(&self.shared.factories).insert(package_name, factory);
    }

    pub fn unregister_factory(&self, package_name: &str) -> bool {
        write_unpoisoned(&self.shared.factories)
            .remove(package_name)
            .is_some()
    }

    pub fn screens(&self) -> &ScreenManager {
        &self.screens
    }

    pub fn services(&self) -> &ServiceManager {
        &self.services
    }

    pub fn resolver(&self) -> &Resolver {
        &self.shared.resolver
    }

    pub fn registry(&self) -> &Arc<PackageRegistry> {
        &self.shared.registry
    }

    pub fn host(&self) -> &Arc<dyn HostBinding> {
        &self.shared.host
    }

    /// Check that `caller` may use `manager`
    pub fn authorize(&self, caller: &Caller, manager: ManagerKind) -> Result<(), ModuleError> {
        self.shared.authorize(caller, manager)
    }

    /// Bind a service for the components rendered on `screen_id`
    ///
    /// The service's bind context carries the screen's messenger, so its
    /// broadcasts reach that surface and no other.
    pub async fn bind_service_from_screen(
        &self,
        screen_id: ScreenId,
        message: &Message,
        binder: Arc<dyn ComponentBinder>,
    ) -> Result<ServiceHandle, ModuleError> {
        let messenger = self
            .screens
            .messenger(screen_id)
            .await
            .ok_or(ModuleError::ScreenNotFound(screen_id))?;
        self.services
            .bind_service_on_surface(message, binder, screen_id, messenger)
            .await
    }

    /// Tear down every running screen and service of a package
    ///
    /// Returns the number of instances destroyed.
    pub async fn release_package(&self, package_name: &str) -> usize {
        let screens = self.screens.release_package(package_name).await;
        let services = self.services.release_package(package_name).await;
        if screens + services > 0 {
            info!(
                "Released {} screens and {} services of {}",
                screens, services, package_name
            );
        }
        screens + services
    }

    /// Replace a package's metadata, tearing down instances built from the old one
    pub async fn update_package(&self, package: PackageInfo) -> Result<(), ModuleError> {
        let name = package.name.clone();
        self.shared.registry.set_state(&name, PackageState::Updating)?;
        self.release_package(&name).await;
        if let Err(e) = self.shared.registry.update(package) {
            warn!("Update of {} failed: {}", name, e);
            self.shared.registry.set_state(&name, PackageState::Broken)?;
            return Err(e);
        }
        Ok(())
    }

    /// Update on behalf of `caller`, which needs the package manager permission
    pub async fn update_package_as(&self, caller: &Caller, package: PackageInfo) -> Result<(), ModuleError> {
        self.authorize(caller, ManagerKind::Package)?;
        self.update_package(package).await
    }

    /// Uninstall on behalf of `caller`, which needs the package manager permission
    pub async fn uninstall_package_as(
        &self,
        caller: &Caller,
        package_name: &str,
    ) -> Result<Arc<PackageInfo>, ModuleError> {
        self.authorize(caller, ManagerKind::Package)?;
        self.uninstall_package(package_name).await
    }

    /// Remove a package, destroying its running instances first
    pub async fn uninstall_package(&self, package_name: &str) -> Result<Arc<PackageInfo>, ModuleError> {
        self.shared
            .registry
            .set_state(package_name, PackageState::Uninstalling)?;
        self.release_package(package_name).await;
        self.unregister_factory(package_name);
        self.shared.registry.uninstall(package_name)
    }
}
