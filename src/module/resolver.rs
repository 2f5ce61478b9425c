//! Message resolution
//!
//! Resolution is a pure function of a message and a registry snapshot:
//! installed packages are scanned in registration order, and within each
//! package the components of the requested kind in declaration order.

use std::sync::Arc;
use tracing::trace;

use crate::module::message::Message;
use crate::module::registry::{ComponentDescriptor, PackageInfo, PackageRegistry, RegistrySnapshot};
use crate::module::traits::{describe, ComponentKind};

/// One component that handles a message
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveInfo {
    pub package: Arc<PackageInfo>,
    pub component: ComponentDescriptor,
}

impl ResolveInfo {
    pub fn package_name(&self) -> &str {
        &self.package.name
    }

    pub fn component_id(&self) -> &str {
        &self.component.id
    }
}

/// Every component of `kind` in `snapshot` that handles `message`
pub fn resolve(snapshot: &RegistrySnapshot, kind: ComponentKind, message: &Message) -> Vec<ResolveInfo> {
    if !message.has_routing_fields() {
        return Vec::new();
    }

    let mut matches = Vec::new();
    for package in snapshot.installed() {
        for component in package.components(kind) {
            if component.matches(message) {
                matches.push(ResolveInfo {
                    package: Arc::clone(package),
                    component: component.clone(),
                });
            }
        }
    }
    trace!(
        "Resolved {} {} candidates for {}",
        matches.len(),
        kind,
        describe(message)
    );
    matches
}

/// Query front end over the live registry
#[derive(Clone)]
pub struct Resolver {
    registry: Arc<PackageRegistry>,
}

impl Resolver {
    pub fn new(registry: Arc<PackageRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<PackageRegistry> {
        &self.registry
    }

    pub fn query(&self, kind: ComponentKind, message: &Message) -> Vec<ResolveInfo> {
        resolve(&self.registry.snapshot(), kind, message)
    }

    pub fn query_screen_info(&self, message: &Message) -> Vec<ResolveInfo> {
        self.query(ComponentKind::Screen, message)
    }

    pub fn query_service_info(&self, message: &Message) -> Vec<ResolveInfo> {
        self.query(ComponentKind::Service, message)
    }

    pub fn query_database_info(&self, message: &Message) -> Vec<ResolveInfo> {
        self.query(ComponentKind::Database, message)
    }
}
