//! Messages and message filters
//!
//! A [`Message`] is the routing key a caller builds to reach a component; a
//! [`MessageFilter`] is the routing predicate a component declares in its
//! package manifest.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Opaque payload carried by a message. Never interpreted by the core.
pub type MessageData = BTreeMap<String, Value>;

/// Routing fields shared by messages and filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoutingField {
    Action,
    Category,
    PackageName,
    ComponentId,
}

/// Request to reach a component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: MessageData,
}

impl Message {
    /// Create an empty message
    ///
    /// An empty message resolves to nothing; set at least one routing field.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a message with an action
    pub fn action(action: impl Into<String>) -> Self {
        Self::new().with_action(action)
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_package(mut self, package_name: impl Into<String>) -> Self {
        self.package_name = Some(package_name.into());
        self
    }

    pub fn with_component(mut self, component_id: impl Into<String>) -> Self {
        self.component_id = Some(component_id.into());
        self
    }

    /// Attach an opaque payload entry
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Check whether any routing field is set
    pub fn has_routing_fields(&self) -> bool {
        !self.predicates().is_empty()
    }

    /// Routing fields the caller chose to specify, with their values
    fn predicates(&self) -> Vec<(RoutingField, &str)> {
        let mut predicates = Vec::with_capacity(4);
        if let Some(action) = &self.action {
            predicates.push((RoutingField::Action, action.as_str()));
        }
        if let Some(category) = &self.category {
            predicates.push((RoutingField::Category, category.as_str()));
        }
        if let Some(package_name) = &self.package_name {
            predicates.push((RoutingField::PackageName, package_name.as_str()));
        }
        if let Some(component_id) = &self.component_id {
            predicates.push((RoutingField::ComponentId, component_id.as_str()));
        }
        predicates
    }
}

/// Routing predicate declared by a component
///
/// A filter passes a message only if it agrees on every routing field the
/// message sets. Fields the message leaves unset are not checked, so a
/// filter with fewer fields matches fewer messages and a filter with no
/// fields matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_id: Option<String>,
}

impl MessageFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_package(mut self, package_name: impl Into<String>) -> Self {
        self.package_name = Some(package_name.into());
        self
    }

    pub fn with_component(mut self, component_id: impl Into<String>) -> Self {
        self.component_id = Some(component_id.into());
        self
    }

    /// True if no field is set (such a filter can never match)
    pub fn is_empty(&self) -> bool {
        self.action.is_none()
            && self.category.is_none()
            && self.package_name.is_none()
            && self.component_id.is_none()
    }

    /// Test a message against this filter
    pub fn matches(&self, message: &Message) -> bool {
        let predicates = message.predicates();
        if predicates.is_empty() {
            return false;
        }
        predicates
            .iter()
            .all(|(field, expected)| self.field(*field) == Some(*expected))
    }

    fn field(&self, field: RoutingField) -> Option<&str> {
        match field {
            RoutingField::Action => self.action.as_deref(),
            RoutingField::Category => self.category.as_deref(),
            RoutingField::PackageName => self.package_name.as_deref(),
            RoutingField::ComponentId => self.component_id.as_deref(),
        }
    }
}
