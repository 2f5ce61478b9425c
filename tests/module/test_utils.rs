//! Test utilities for module system testing
//!
//! Provides recording screens, services and binders plus a fixture that
//! wires a registry, a lifecycle manager and per-package factories.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use module_host::module::{
    ChannelEnd, ComponentBinder, ComponentContext, ComponentDescriptor, ComponentFactory,
    ComponentKind, ComponentLifecycleManager, DragEvent, LoggingHost, Message, MessageFilter,
    Messenger, ModuleScreen, ModuleService, PackageInfo, PackageRegistry, Permission, PermissionSet,
    ScreenMode,
};
use module_host::ScreensConfig;

/// Shared event log
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Screen that records every hook and accepts binds while `accept` is set
pub struct RecordingScreen {
    pub name: String,
    pub accept: AtomicBool,
    pub log: EventLog,
    pub channels: Mutex<Vec<ChannelEnd>>,
}

impl RecordingScreen {
    fn record(&self, event: impl AsRef<str>) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.name, event.as_ref()));
    }
}

impl ModuleScreen for RecordingScreen {
    fn on_bind(&self, message: &Message, channel: ChannelEnd, context: &ComponentContext) -> bool {
        let accept = self.accept.load(Ordering::SeqCst);
        self.record(format!(
            "bind({})={}",
            message.action.as_deref().unwrap_or("-"),
            accept
        ));
        if accept {
            let log = Arc::clone(&self.log);
            let name = self.name.clone();
            channel.receive("ping", move |args: &[Value]| {
                log.lock().unwrap().push(format!("{}:ping{:?}", name, args));
            });
            self.channels.lock().unwrap().push(channel);

            if let Some(messenger) = context.messenger() {
                if messenger.subscriber_count(NOTE_TOPIC) == 0 {
                    let log = Arc::clone(&self.log);
                    let name = self.name.clone();
                    messenger.subscribe(NOTE_TOPIC, move |args: &[Value]| {
                        log.lock().unwrap().push(format!("{}:note{:?}", name, args));
                    });
                }
            }
        }
        accept
    }

    fn on_unbind(&self, message: &Message) {
        self.record(format!("unbind({})", message.action.as_deref().unwrap_or("-")));
    }

    fn on_data_synchronized(&self) {
        self.record("synced");
    }

    fn on_screen_focused(&self, focused: bool) {
        self.record(format!("focused={}", focused));
    }

    fn on_screen_visible(&self, visible: bool) {
        self.record(format!("visible={}", visible));
    }

    fn on_screen_mode_changed(&self, mode: ScreenMode) {
        self.record(format!("mode={:?}", mode));
    }

    fn on_screen_dragged(&self, event: DragEvent) {
        self.record(format!("dragged={}", event.finished));
    }

    fn on_destroy(&self) {
        self.record("destroy");
    }
}

/// Topic recording screens listen to on their surface messenger
pub const NOTE_TOPIC: &str = "note";

/// Service that records every hook and keeps the messengers it was bound with
pub struct RecordingService {
    pub name: String,
    pub accept: AtomicBool,
    pub log: EventLog,
    pub messengers: Mutex<Vec<Messenger>>,
}

impl RecordingService {
    fn record(&self, event: impl AsRef<str>) {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}:{}", self.name, event.as_ref()));
    }
}

impl ModuleService for RecordingService {
    fn on_start(&self, _context: &ComponentContext) {
        self.record("start");
    }

    fn on_bind(&self, message: &Message, _channel: ChannelEnd, context: &ComponentContext) -> bool {
        let accept = self.accept.load(Ordering::SeqCst);
        self.record(format!(
            "bind({})={}",
            message.action.as_deref().unwrap_or("-"),
            accept
        ));
        if accept {
            if let Some(messenger) = context.messenger() {
                self.messengers.lock().unwrap().push(messenger.clone());
            }
        }
        accept
    }

    fn on_unbind(&self, message: &Message) {
        self.record(format!("unbind({})", message.action.as_deref().unwrap_or("-")));
    }

    fn on_stop(&self) {
        self.record("stop");
    }
}

/// Factory creating recording components for one package
///
/// Components listed in `declining` refuse every bind.
pub struct TestFactory {
    pub package_name: String,
    pub log: EventLog,
    pub declining: Mutex<Vec<String>>,
    pub screens: Mutex<Vec<Arc<RecordingScreen>>>,
    pub services: Mutex<Vec<Arc<RecordingService>>>,
    pub created: Mutex<HashMap<String, usize>>,
}

impl TestFactory {
    pub fn new(package_name: &str, log: EventLog) -> Arc<Self> {
        Arc::new(Self {
            package_name: package_name.to_string(),
            log,
            declining: Mutex::new(Vec::new()),
            screens: Mutex::new(Vec::new()),
            services: Mutex::new(Vec::new()),
            created: Mutex::new(HashMap::new()),
        })
    }

    pub fn decline(&self, component_id: &str) {
        self.declining.lock().unwrap().push(component_id.to_string());
    }

    pub fn created_count(&self, component_id: &str) -> usize {
        self.created
            .lock()
            .unwrap()
            .get(component_id)
            .copied()
            .unwrap_or(0)
    }

    fn accepts(&self, component_id: &str) -> bool {
        !self
            .declining
            .lock()
            .unwrap()
            .iter()
            .any(|c| c == component_id)
    }

    fn name(&self, component_id: &str) -> String {
        format!("{}/{}", self.package_name, component_id)
    }

    fn count(&self, component_id: &str) {
        *self
            .created
            .lock()
            .unwrap()
            .entry(component_id.to_string())
            .or_default() += 1;
    }
}

impl ComponentFactory for TestFactory {
    fn create_screen(
        &self,
        component_id: &str,
        _context: &ComponentContext,
    ) -> Option<Arc<dyn ModuleScreen>> {
        self.count(component_id);
        let screen = Arc::new(RecordingScreen {
            name: self.name(component_id),
            accept: AtomicBool::new(self.accepts(component_id)),
            log: Arc::clone(&self.log),
            channels: Mutex::new(Vec::new()),
        });
        self.screens.lock().unwrap().push(Arc::clone(&screen));
        Some(screen)
    }

    fn create_service(
        &self,
        component_id: &str,
        _context: &ComponentContext,
    ) -> Option<Arc<dyn ModuleService>> {
        self.count(component_id);
        let service = Arc::new(RecordingService {
            name: self.name(component_id),
            accept: AtomicBool::new(self.accepts(component_id)),
            log: Arc::clone(&self.log),
            messengers: Mutex::new(Vec::new()),
        });
        self.services.lock().unwrap().push(Arc::clone(&service));
        Some(service)
    }
}

/// Binder that records bound and unbound notifications
#[derive(Default)]
pub struct RecordingBinder {
    pub bound: Mutex<Vec<(String, String)>>,
    pub unbound: Mutex<Vec<(String, String)>>,
    pub channels: Mutex<Vec<ChannelEnd>>,
}

impl RecordingBinder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn bound(&self) -> Vec<(String, String)> {
        self.bound.lock().unwrap().clone()
    }

    pub fn unbound(&self) -> Vec<(String, String)> {
        self.unbound.lock().unwrap().clone()
    }

    pub fn last_channel(&self) -> Option<ChannelEnd> {
        self.channels.lock().unwrap().last().cloned()
    }
}

impl ComponentBinder for RecordingBinder {
    fn on_bound(&self, package_name: &str, component_id: &str, channel: ChannelEnd) {
        self.bound
            .lock()
            .unwrap()
            .push((package_name.to_string(), component_id.to_string()));
        self.channels.lock().unwrap().push(channel);
    }

    fn on_unbound(&self, package_name: &str, component_id: &str) {
        self.unbound
            .lock()
            .unwrap()
            .push((package_name.to_string(), component_id.to_string()));
    }
}

pub fn pair(package: &str, component: &str) -> (String, String) {
    (package.to_string(), component.to_string())
}

pub fn open_filter(action: &str) -> MessageFilter {
    MessageFilter::new().with_action(action).with_category("SCREEN")
}

pub fn open_message(action: &str) -> Message {
    Message::action(action).with_category("SCREEN")
}

/// Package with one screen and one service per listed id
pub fn package(name: &str, screens: &[(&str, &str)], services: &[(&str, &str)]) -> PackageInfo {
    let mut info = PackageInfo::new(name, "1.0.0");
    for (id, action) in screens {
        info = info.with_component(ComponentDescriptor::new(
            ComponentKind::Screen,
            *id,
            vec![open_filter(action)],
        ));
    }
    for (id, action) in services {
        info = info.with_component(ComponentDescriptor::new(
            ComponentKind::Service,
            *id,
            vec![MessageFilter::new().with_action(*action)],
        ));
    }
    info
}

/// Registry, manager and factories for lifecycle tests
pub struct LifecycleFixture {
    pub registry: Arc<PackageRegistry>,
    pub manager: ComponentLifecycleManager,
    pub log: EventLog,
    pub factories: HashMap<String, Arc<TestFactory>>,
}

impl LifecycleFixture {
    pub fn new() -> Self {
        Self::with_config(ScreensConfig::default())
    }

    pub fn with_config(config: ScreensConfig) -> Self {
        let registry = Arc::new(PackageRegistry::new());
        let manager = ComponentLifecycleManager::with_config(
            Arc::clone(&registry),
            Arc::new(LoggingHost::default()),
            config,
        );
        Self {
            registry,
            manager,
            log: new_log(),
            factories: HashMap::new(),
        }
    }

    /// Install a package and register a recording factory for it
    pub fn install(&mut self, info: PackageInfo, permissions: &[Permission]) -> Arc<TestFactory> {
        let mut info = info;
        info.permissions = PermissionSet::from_vec(permissions.to_vec());
        let name = info.name.clone();
        self.registry.install(info).unwrap();
        let factory = TestFactory::new(&name, Arc::clone(&self.log));
        self.manager
            .register_factory(name.clone(), Arc::clone(&factory) as Arc<dyn ComponentFactory>);
        self.factories.insert(name, Arc::clone(&factory));
        factory
    }

    pub fn events(&self) -> Vec<String> {
        events(&self.log)
    }

    pub fn clear_events(&self) {
        self.log.lock().unwrap().clear();
    }
}
