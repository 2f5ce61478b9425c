//! Service lifecycle
//!
//! A service instance is created on first start or bind, receives
//! `on_start` once, serves any number of concurrent bindings, and receives
//! `on_stop` when stopped. A service brought up only to serve a binding
//! stops again when its last binding goes away.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{same_binder, RuntimeShared};
use crate::module::channel::Channel;
use crate::module::message::Message;
use crate::module::messenger::Messenger;
use crate::module::resolver::ResolveInfo;
use crate::module::security::{Caller, ManagerKind};
use crate::module::traits::{
    describe, ComponentBinder, ComponentContext, ContextId, ModuleError, ModuleService, ScreenId,
};
use crate::utils::{isolate_panic, with_lock};

/// Snapshot of a running service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    pub package_name: String,
    pub component_id: String,
    pub context_id: ContextId,
    /// Started with `start_service` rather than brought up by a bind
    pub started: bool,
    pub bindings: usize,
}

struct ServiceBinding {
    message: Message,
    channel: Channel,
    binder: Arc<dyn ComponentBinder>,
}

struct ServiceEntry {
    package_name: String,
    component_id: String,
    instance: Arc<dyn ModuleService>,
    context: ComponentContext,
    started: bool,
    bindings: Vec<ServiceBinding>,
}

impl ServiceEntry {
    fn is(&self, package_name: &str, component_id: &str) -> bool {
        self.package_name == package_name && self.component_id == component_id
    }

    fn handle(&self) -> ServiceHandle {
        ServiceHandle {
            package_name: self.package_name.clone(),
            component_id: self.component_id.clone(),
            context_id: self.context.id(),
            started: self.started,
            bindings: self.bindings.len(),
        }
    }
}

fn release_binding(
    instance: &Arc<dyn ModuleService>,
    package_name: &str,
    component_id: &str,
    binding: ServiceBinding,
) {
    isolate_panic(|| instance.on_unbind(&binding.message), "service on_unbind");
    isolate_panic(
        || binding.binder.on_unbound(package_name, component_id),
        "binder on_unbound",
    );
    binding.channel.close();
    debug!(
        "Unbound {} from service {}/{}",
        describe(&binding.message),
        package_name,
        component_id
    );
}

/// Unbind every caller, then stop the instance
fn teardown(entry: ServiceEntry) {
    for binding in entry.bindings {
        release_binding(&entry.instance, &entry.package_name, &entry.component_id, binding);
    }
    isolate_panic(|| entry.instance.on_stop(), "service on_stop");
    info!("Stopped service {}/{}", entry.package_name, entry.component_id);
}

/// Manages running services
pub struct ServiceManager {
    shared: Arc<RuntimeShared>,
    table: Mutex<Vec<ServiceEntry>>,
}

impl ServiceManager {
    pub(crate) fn new(shared: Arc<RuntimeShared>) -> Self {
        Self {
            shared,
            table: Mutex::new(Vec::new()),
        }
    }

    /// Start the first resolved service that can be instantiated
    ///
    /// Starting a running service marks it as explicitly started, so it
    /// outlives its bindings until `stop_service`.
    pub async fn start_service(&self, message: &Message) -> Result<ServiceHandle, ModuleError> {
        let candidates = self.shared.resolver.query_service_info(message);
        if candidates.is_empty() {
            return Err(ModuleError::NoMatch(describe(message)));
        }

        for candidate in &candidates {
            if self.obtain(candidate).await.is_none() {
                continue;
            }
            let mut table = self.table.lock().await;
            if let Some(entry) = table
                .iter_mut()
                .find(|e| e.is(candidate.package_name(), candidate.component_id()))
            {
                entry.started = true;
                return Ok(entry.handle());
            }
        }

        Err(ModuleError::ComponentUnavailable(describe(message)))
    }

    /// Find the running instance for a candidate or create and start one
    ///
    /// Returns whether the instance was created by this call, or `None` if
    /// it cannot be instantiated.
    async fn obtain(&self, candidate: &ResolveInfo) -> Option<bool> {
        let (package_name, component_id) = (candidate.package_name(), candidate.component_id());
        if self
            .table
            .lock()
            .await
            .iter()
            .any(|e| e.is(package_name, component_id))
        {
            return Some(false);
        }

        let Some(factory) = self.shared.factory(package_name) else {
            warn!("No component factory for package {}", package_name);
            return None;
        };
        let context = ComponentContext::new(package_name, component_id, Arc::clone(&self.shared.host));
        let Some(instance) = isolate_panic(
            || factory.create_service(component_id, &context),
            "service factory",
        )
        .flatten() else {
            warn!("Service {}/{} could not be created", package_name, component_id);
            return None;
        };

        if !self.shared.registry.is_installed(package_name) {
            warn!(
                "Package {} left the registry while {} was being created",
                package_name, component_id
            );
            return None;
        }

        {
            let mut table = self.table.lock().await;
            if table.iter().any(|e| e.is(package_name, component_id)) {
                debug!("Service {}/{} created concurrently, discarding duplicate", package_name, component_id);
                return Some(false);
            }
            table.push(ServiceEntry {
                package_name: package_name.to_string(),
                component_id: component_id.to_string(),
                instance: Arc::clone(&instance),
                context: context.clone(),
                started: false,
                bindings: Vec::new(),
            });
        }

        info!("Starting service {}/{}", package_name, component_id);
        isolate_panic(|| instance.on_start(&context), "service on_start");
        Some(true)
    }

    /// Start a service on behalf of `caller`, which needs the service manager permission
    pub async fn start_service_as(&self, caller: &Caller, message: &Message) -> Result<ServiceHandle, ModuleError> {
        self.shared.authorize(caller, ManagerKind::Service)?;
        self.start_service(message).await
    }

    /// Bind the first resolved service that accepts `message`
    pub async fn bind_service(
        &self,
        message: &Message,
        binder: Arc<dyn ComponentBinder>,
    ) -> Result<ServiceHandle, ModuleError> {
        self.bind_with_surface(message, binder, None).await
    }

    /// Bind on behalf of components rendered on a screen
    ///
    /// The service's `on_bind` sees a context carrying that screen's id and
    /// messenger, so it can broadcast to the components on the surface.
    pub(crate) async fn bind_service_on_surface(
        &self,
        message: &Message,
        binder: Arc<dyn ComponentBinder>,
        screen_id: ScreenId,
        messenger: Messenger,
    ) -> Result<ServiceHandle, ModuleError> {
        self.bind_with_surface(message, binder, Some((screen_id, messenger)))
            .await
    }

    async fn bind_with_surface(
        &self,
        message: &Message,
        binder: Arc<dyn ComponentBinder>,
        surface: Option<(ScreenId, Messenger)>,
    ) -> Result<ServiceHandle, ModuleError> {
        let candidates = self.shared.resolver.query_service_info(message);
        if candidates.is_empty() {
            debug!("No service matches {}", describe(message));
            return Err(ModuleError::NoMatch(describe(message)));
        }

        for candidate in &candidates {
            let Some(created) = self.obtain(candidate).await else {
                continue;
            };
            if let Some(handle) = self
                .offer(candidate, message, &binder, created, surface.clone())
                .await
            {
                return Ok(handle);
            }
        }

        info!("Every service declined {}", describe(message));
        Err(ModuleError::BindRejected(describe(message)))
    }

    /// Bind on behalf of `caller`, which needs the service manager permission
    pub async fn bind_service_as(
        &self,
        caller: &Caller,
        message: &Message,
        binder: Arc<dyn ComponentBinder>,
    ) -> Result<ServiceHandle, ModuleError> {
        self.shared.authorize(caller, ManagerKind::Service)?;
        self.bind_service(message, binder).await
    }

    async fn offer(
        &self,
        candidate: &ResolveInfo,
        message: &Message,
        binder: &Arc<dyn ComponentBinder>,
        created: bool,
        surface: Option<(ScreenId, Messenger)>,
    ) -> Option<ServiceHandle> {
        let (package_name, component_id) = (candidate.package_name(), candidate.component_id());
        let (instance, context) = {
            let table = self.table.lock().await;
            let entry = table.iter().find(|e| e.is(package_name, component_id))?;
            (Arc::clone(&entry.instance), entry.context.clone())
        };
        let context = match surface {
            Some((screen_id, messenger)) => context.for_screen(screen_id, messenger),
            None => context,
        };

        let channel = Channel::new();
        let accepted = isolate_panic(
            || instance.on_bind(message, channel.component_end(), &context),
            "service on_bind",
        )
        .unwrap_or(false);

        let mut table = self.table.lock().await;
        let Some(index) = table.iter().position(|e| e.is(package_name, component_id)) else {
            channel.close();
            return None;
        };

        if !accepted {
            channel.close();
            debug!("Service {}/{} declined {}", package_name, component_id, describe(message));
            let entry = &table[index];
            if created && !entry.started && entry.bindings.is_empty() {
                let entry = table.remove(index);
                drop(table);
                teardown(entry);
            }
            return None;
        }

        // Fail closed if the package was removed while on_bind ran
        if !self.shared.registry.is_installed(package_name) {
            let entry = table.remove(index);
            drop(table);
            channel.close();
            isolate_panic(|| instance.on_unbind(message), "service on_unbind");
            warn!(
                "Service {}/{} accepted {} after its package was removed",
                package_name,
                component_id,
                describe(message)
            );
            teardown(entry);
            return None;
        }

        let caller_end = channel.caller_end();
        let entry = &mut table[index];
        entry.bindings.push(ServiceBinding {
            message: message.clone(),
            channel,
            binder: Arc::clone(binder),
        });
        let handle = entry.handle();
        drop(table);

        info!("Service {}/{} bound {}", package_name, component_id, describe(message));
        isolate_panic(
            || binder.on_bound(package_name, component_id, caller_end),
            "binder on_bound",
        );
        Some(handle)
    }

    /// Release the binding made for `(message, binder)`
    ///
    /// A service that was not explicitly started stops with its last binding.
    pub async fn unbind_service(
        &self,
        message: &Message,
        binder: &Arc<dyn ComponentBinder>,
    ) -> Result<(), ModuleError> {
        let (instance, package_name, component_id, binding, idle) = {
            let mut table = self.table.lock().await;
            let (index, position) = table
                .iter()
                .enumerate()
                .find_map(|(i, e)| {
                    e.bindings
                        .iter()
                        .position(|b| b.message == *message && same_binder(&b.binder, binder))
                        .map(|p| (i, p))
                })
                .ok_or_else(|| ModuleError::NotBound(describe(message)))?;
            let entry = &mut table[index];
            let binding = entry.bindings.remove(position);
            let instance = Arc::clone(&entry.instance);
            let package_name = entry.package_name.clone();
            let component_id = entry.component_id.clone();
            // Take an idle service out of the table before calling into it
            let idle = (!entry.started && entry.bindings.is_empty()).then(|| table.remove(index));
            (instance, package_name, component_id, binding, idle)
        };

        release_binding(&instance, &package_name, &component_id, binding);
        if let Some(entry) = idle {
            teardown(entry);
        }
        Ok(())
    }

    /// Stop every running service that handles `message`
    ///
    /// Bound callers are unbound first. Returns how many services stopped.
    pub async fn stop_service(&self, message: &Message) -> Result<usize, ModuleError> {
        let candidates = self.shared.resolver.query_service_info(message);
        if candidates.is_empty() {
            return Err(ModuleError::NoMatch(describe(message)));
        }

        let stopped: Vec<ServiceEntry> = {
            let mut table = self.table.lock().await;
            let (stopped, kept): (Vec<ServiceEntry>, Vec<ServiceEntry>) = std::mem::take(&mut *table)
                .into_iter()
                .partition(|e| {
                    candidates
                        .iter()
                        .any(|c| e.is(c.package_name(), c.component_id()))
                });
            *table = kept;
            stopped
        };
        let count = stopped.len();
        for entry in stopped {
            teardown(entry);
        }
        Ok(count)
    }

    /// Running services in start order
    pub async fn running_services(&self) -> Vec<ServiceHandle> {
        self.table.lock().await.iter().map(ServiceEntry::handle).collect()
    }

    pub async fn binding_count(&self, package_name: &str, component_id: &str) -> usize {
        with_lock(&self.table, |table| {
            table
                .iter()
                .find(|e| e.is(package_name, component_id))
                .map_or(0, |e| e.bindings.len())
        })
        .await
    }

    pub(crate) async fn release_package(&self, package_name: &str) -> usize {
        let released: Vec<ServiceEntry> = {
            let mut table = self.table.lock().await;
            let (released, kept): (Vec<ServiceEntry>, Vec<ServiceEntry>) = std::mem::take(&mut *table)
                .into_iter()
                .partition(|e| e.package_name == package_name);
            *table = kept;
            released
        };
        let count = released.len();
        for entry in released {
            teardown(entry);
        }
        count
    }
}
