//! Screen lifecycle
//!
//! One live instance per `(package, component, screen type)` for tab,
//! full-screen and picture-in-picture surfaces. Popups are keyed by screen
//! id as well, so several popups of one component can coexist. Binding and
//! destruction are independent: unbinding leaves the rendered screen alive
//! until it is stopped.

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
    describe, ComponentBinder, ComponentContext, ComponentKind, DragEvent, ModuleError,
    ModuleScreen, ScreenId, ScreenMode, ScreenType,
};
use crate::utils::{isolate_panic, with_lock};

/// Request to show a screen
#[derive(Debug, Clone)]
pub struct ScreenRequest {
    pub message: Message,
    pub screen_type: ScreenType,
    /// Rebind an already open popup instead of opening a new one
    pub screen_id: Option<ScreenId>,
    pub mode: ScreenMode,
    pub caller: Caller,
}

impl ScreenRequest {
    pub fn new(message: Message, screen_type: ScreenType) -> Self {
        Self {
            message,
            screen_type,
            screen_id: None,
            mode: ScreenMode::default(),
            caller: Caller::Host,
        }
    }

    pub fn tab(message: Message) -> Self {
        Self::new(message, ScreenType::Tab)
    }

    pub fn with_screen_id(mut self, screen_id: ScreenId) -> Self {
        self.screen_id = Some(screen_id);
        self
    }

    pub fn with_mode(mut self, mode: ScreenMode) -> Self {
        self.mode = mode;
        self
    }

    /// Issue the request on behalf of a package
    pub fn from_package(mut self, package_name: impl Into<String>) -> Self {
        self.caller = Caller::Package(package_name.into());
        self
    }
}

/// Binding state of a screen instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenBindState {
    Unbound,
    Bound,
    /// The instance declined the last message offered to it
    Discarded,
}

/// Snapshot of a live screen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenHandle {
    pub screen_id: ScreenId,
    pub package_name: String,
    pub component_id: String,
    pub screen_type: ScreenType,
    pub mode: ScreenMode,
    pub state: ScreenBindState,
    pub focused: bool,
    /// True if the instance was created by the call that returned this handle
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ScreenKey {
    package_name: String,
    component_id: String,
    screen_type: ScreenType,
}

struct ScreenBinding {
    message: Message,
    channel: Channel,
    binder: Arc<dyn ComponentBinder>,
}

struct ScreenEntry {
    screen_id: ScreenId,
    key: ScreenKey,
    instance: Arc<dyn ModuleScreen>,
    context: ComponentContext,
    messenger: Messenger,
    state: ScreenBindState,
    binding: Option<ScreenBinding>,
    focused: bool,
    visible: bool,
    mode: ScreenMode,
}

impl ScreenEntry {
    fn handle(&self, created: bool) -> ScreenHandle {
        ScreenHandle {
            screen_id: self.screen_id,
            package_name: self.key.package_name.clone(),
            component_id: self.key.component_id.clone(),
            screen_type: self.key.screen_type,
            mode: self.mode,
            state: self.state,
            focused: self.focused,
            created,
        }
    }
}

/// Call `on_unbind`, notify the binder, then tear the channel down
fn release_binding(instance: &Arc<dyn ModuleScreen>, key: &ScreenKey, binding: ScreenBinding) {
    isolate_panic(|| instance.on_unbind(&binding.message), "screen on_unbind");
    isolate_panic(
        || binding.binder.on_unbound(&key.package_name, &key.component_id),
        "binder on_unbound",
    );
    binding.channel.close();
    debug!(
        "Unbound {} from screen {}/{}",
        describe(&binding.message),
        key.package_name,
        key.component_id
    );
}

/// Release the binding, destroy the instance and close its messenger
fn teardown(entry: ScreenEntry) {
    if let Some(binding) = entry.binding {
        release_binding(&entry.instance, &entry.key, binding);
    }
    isolate_panic(|| entry.instance.on_destroy(), "screen on_destroy");
    entry.messenger.close();
    info!(
        "Stopped {:?} screen {} ({}/{})",
        entry.key.screen_type, entry.screen_id, entry.key.package_name, entry.key.component_id
    );
}

/// Manages rendered screens
pub struct ScreenManager {
    shared: Arc<RuntimeShared>,
    table: Mutex<Vec<ScreenEntry>>,
}

impl ScreenManager {
    pub(crate) fn new(shared: Arc<RuntimeShared>) -> Self {
        Self {
            shared,
            table: Mutex::new(Vec::new()),
        }
    }

    /// Resolve a message and show the first screen that accepts it
    ///
    /// Candidates whose package may not open `screen_type` are dropped
    /// before anything is instantiated. The remaining ones are offered the
    /// message in resolution order until one accepts.
    pub async fn start_screen(
        &self,
        request: ScreenRequest,
        binder: Arc<dyn ComponentBinder>,
    ) -> Result<ScreenHandle, ModuleError> {
        self.shared.authorize(&request.caller, ManagerKind::Screen)?;

        if let Some(screen_id) = request.screen_id {
            if !self.table.lock().await.iter().any(|e| e.screen_id == screen_id) {
                return Err(ModuleError::ScreenNotFound(screen_id));
            }
        }

        let candidates = self.shared.resolver.query_screen_info(&request.message);
        if candidates.is_empty() {
            debug!("No screen matches {}", describe(&request.message));
            return Err(ModuleError::NoMatch(describe(&request.message)));
        }

        let mut denied = None;
        let mut permitted = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match self
                .shared
                .permissions
                .check_screen_type(&candidate.package, request.screen_type)
            {
                Ok(()) => permitted.push(candidate),
                Err(e) => {
                    denied.get_or_insert(e);
                }
            }
        }
        if permitted.is_empty() {
            return Err(denied.unwrap_or_else(|| {
                ModuleError::PermissionDenied(describe(&request.message))
            }));
        }

        let mut popup_limit = None;
        let mut offered = false;
        for candidate in &permitted {
            match self.try_candidate(candidate, &request, &binder).await {
                Ok(Some(handle)) => return Ok(handle),
                Ok(None) => offered = true,
                Err(e @ ModuleError::PopupLimit(_)) => {
                    popup_limit.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }

        match popup_limit {
            Some(e) if !offered => Err(e),
            _ => {
                info!("Every screen declined {}", describe(&request.message));
                Err(ModuleError::BindRejected(describe(&request.message)))
            }
        }
    }

    /// Obtain an instance for one candidate and offer it the message
    async fn try_candidate(
        &self,
        candidate: &ResolveInfo,
        request: &ScreenRequest,
        binder: &Arc<dyn ComponentBinder>,
    ) -> Result<Option<ScreenHandle>, ModuleError> {
        let key = ScreenKey {
            package_name: candidate.package_name().to_string(),
            component_id: candidate.component_id().to_string(),
            screen_type: request.screen_type,
        };
        let Some((screen_id, created)) = self.obtain(&key, request).await? else {
            return Ok(None);
        };

        if !self.bind_entry(screen_id, &request.message, binder).await? {
            if created || !self.shared.registry.is_installed(&key.package_name) {
                if let Some(entry) = self.take_entry(screen_id).await {
                    teardown(entry);
                }
            }
            return Ok(None);
        }

        if request.screen_type == ScreenType::Pip {
            self.stop_other_pips(screen_id).await;
        }
        self.set_screen_mode(screen_id, request.mode).await?;
        self.focus_screen(screen_id).await?;

        let table = self.table.lock().await;
        let entry = table
            .iter()
            .find(|e| e.screen_id == screen_id)
            .ok_or(ModuleError::ScreenNotFound(screen_id))?;
        Ok(Some(entry.handle(created)))
    }

    /// Find the live instance for `key` or create one
    ///
    /// Returns `None` if the component cannot be instantiated.
    async fn obtain(
        &self,
        key: &ScreenKey,
        request: &ScreenRequest,
    ) -> Result<Option<(ScreenId, bool)>, ModuleError> {
        {
            let table = self.table.lock().await;
            if let Some(screen_id) = request.screen_id {
                return Ok(table
                    .iter()
                    .find(|e| e.screen_id == screen_id && e.key == *key)
                    .map(|e| (e.screen_id, false)));
            }
            if key.screen_type.allows_multiple() {
                let open = table.iter().filter(|e| e.key == *key).count();
                if open >= self.shared.screens_config.max_popups_per_component {
                    warn!(
                        "{}/{} already has {} popups open",
                        key.package_name, key.component_id, open
                    );
                    return Err(ModuleError::PopupLimit(format!(
                        "{}/{}",
                        key.package_name, key.component_id
                    )));
                }
            } else if let Some(entry) = table.iter().find(|e| e.key == *key) {
                return Ok(Some((entry.screen_id, false)));
            }
        }

        let Some(factory) = self.shared.factory(&key.package_name) else {
            warn!(
                "{}",
                ModuleError::ComponentUnavailable(format!(
                    "no factory for package {}",
                    key.package_name
                ))
            );
            return Ok(None);
        };

        let screen_id = ScreenId::new();
        let messenger = Messenger::new();
        let context = ComponentContext::new(
            key.package_name.clone(),
            key.component_id.clone(),
            Arc::clone(&self.shared.host),
        )
        .for_screen(screen_id, messenger.clone());

        let created = isolate_panic(
            || factory.create_screen(&key.component_id, &context),
            "screen factory",
        )
        .flatten();
        let Some(instance) = created else {
            warn!(
                "{}",
                ModuleError::ComponentUnavailable(format!(
                    "{}/{} could not be created",
                    key.package_name, key.component_id
                ))
            );
            return Ok(None);
        };

        if !self.shared.registry.is_installed(&key.package_name) {
            warn!(
                "Package {} left the registry while {} was being created",
                key.package_name, key.component_id
            );
            isolate_panic(|| instance.on_destroy(), "screen on_destroy");
            messenger.close();
            return Ok(None);
        }

        let mut table = self.table.lock().await;
        if !key.screen_type.allows_multiple() {
            if let Some(existing) = table.iter().find(|e| e.key == *key) {
                let existing_id = existing.screen_id;
                drop(table);
                debug!("Screen {}/{} created concurrently, discarding duplicate", key.package_name, key.component_id);
                isolate_panic(|| instance.on_destroy(), "screen on_destroy");
                messenger.close();
                return Ok(Some((existing_id, false)));
            }
        }

        info!(
            "Created {:?} screen {} for {}/{}",
            key.screen_type, screen_id, key.package_name, key.component_id
        );
        table.push(ScreenEntry {
            screen_id,
            key: key.clone(),
            instance,
            context,
            messenger,
            state: ScreenBindState::Unbound,
            binding: None,
            focused: false,
            visible: true,
            mode: request.mode,
        });
        Ok(Some((screen_id, true)))
    }

    /// Offer `message` to an existing instance
    ///
    /// A previous binding is released first. Returns whether the instance
    /// accepted.
    async fn bind_entry(
        &self,
        screen_id: ScreenId,
        message: &Message,
        binder: &Arc<dyn ComponentBinder>,
    ) -> Result<bool, ModuleError> {
        let (instance, context, key, previous) = {
            let mut table = self.table.lock().await;
            let entry = table
                .iter_mut()
                .find(|e| e.screen_id == screen_id)
                .ok_or(ModuleError::ScreenNotFound(screen_id))?;
            let previous = entry.binding.take();
            if previous.is_some() {
                entry.state = ScreenBindState::Unbound;
            }
            (
                Arc::clone(&entry.instance),
                entry.context.clone(),
                entry.key.clone(),
                previous,
            )
        };
        if let Some(previous) = previous {
            release_binding(&instance, &key, previous);
        }

        let channel = Channel::new();
        let accepted = isolate_panic(
            || instance.on_bind(message, channel.component_end(), &context),
            "screen on_bind",
        )
        .unwrap_or(false);

        let mut table = self.table.lock().await;
        let Some(entry) = table.iter_mut().find(|e| e.screen_id == screen_id) else {
            // Stopped while on_bind ran
            channel.close();
            return Err(ModuleError::ScreenNotFound(screen_id));
        };

        if !accepted {
            entry.state = ScreenBindState::Discarded;
            drop(table);
            channel.close();
            debug!(
                "Screen {}/{} declined {}",
                key.package_name,
                key.component_id,
                describe(message)
            );
            return Ok(false);
        }

        // Fail closed if the package was removed while on_bind ran
        if !self.shared.registry.is_installed(&key.package_name) {
            entry.state = ScreenBindState::Discarded;
            drop(table);
            channel.close();
            isolate_panic(|| instance.on_unbind(message), "screen on_unbind");
            warn!(
                "Screen {}/{} accepted {} after its package was removed",
                key.package_name,
                key.component_id,
                describe(message)
            );
            return Ok(false);
        }

        let caller_end = channel.caller_end();
        let displaced = entry.binding.replace(ScreenBinding {
            message: message.clone(),
            channel,
            binder: Arc::clone(binder),
        });
        entry.state = ScreenBindState::Bound;
        drop(table);

        if let Some(displaced) = displaced {
            release_binding(&instance, &key, displaced);
        }
        info!(
            "Screen {}/{} bound {}",
            key.package_name,
            key.component_id,
            describe(message)
        );
        isolate_panic(
            || binder.on_bound(&key.package_name, &key.component_id, caller_end),
            "binder on_bound",
        );
        Ok(true)
    }

    /// Bind a new message to an open screen
    ///
    /// The screen's component must still be installed and declare a filter
    /// matching `message`.
    pub async fn bind_screen(
        &self,
        screen_id: ScreenId,
        message: Message,
        binder: Arc<dyn ComponentBinder>,
    ) -> Result<(), ModuleError> {
        let key = {
            let table = self.table.lock().await;
            table
                .iter()
                .find(|e| e.screen_id == screen_id)
                .map(|e| e.key.clone())
                .ok_or(ModuleError::ScreenNotFound(screen_id))?
        };

        let snapshot = self.shared.registry.snapshot();
        if !snapshot.is_installed(&key.package_name) {
            return Err(ModuleError::ComponentUnavailable(key.package_name));
        }
        let matches = snapshot
            .get(&key.package_name)
            .and_then(|p| p.component(ComponentKind::Screen, &key.component_id))
            .is_some_and(|c| c.matches(&message));
        if !matches {
            return Err(ModuleError::NoMatch(describe(&message)));
        }

        if self.bind_entry(screen_id, &message, &binder).await? {
            Ok(())
        } else {
            Err(ModuleError::BindRejected(describe(&message)))
        }
    }

    /// Release the binding made for `(message, binder)`
    ///
    /// The screen stays open in the `Unbound` state.
    pub async fn unbind_screen(
        &self,
        message: &Message,
        binder: &Arc<dyn ComponentBinder>,
    ) -> Result<(), ModuleError> {
        let (instance, key, binding) = {
            let mut table = self.table.lock().await;
            let entry = table
                .iter_mut()
                .find(|e| {
                    e.binding
                        .as_ref()
                        .is_some_and(|b| b.message == *message && same_binder(&b.binder, binder))
                })
                .ok_or_else(|| ModuleError::NotBound(describe(message)))?;
            entry.state = ScreenBindState::Unbound;
            let binding = entry
                .binding
                .take()
                .ok_or_else(|| ModuleError::NotBound(describe(message)))?;
            (Arc::clone(&entry.instance), entry.key.clone(), binding)
        };
        release_binding(&instance, &key, binding);
        Ok(())
    }

    /// Close a screen, releasing its binding first
    pub async fn stop_screen(&self, screen_id: ScreenId) -> Result<(), ModuleError> {
        let entry = self
            .take_entry(screen_id)
            .await
            .ok_or(ModuleError::ScreenNotFound(screen_id))?;
        teardown(entry);
        Ok(())
    }

    /// Show a picture-in-picture screen, replacing any other one
    pub async fn start_pip_screen(
        &self,
        message: Message,
        binder: Arc<dyn ComponentBinder>,
    ) -> Result<ScreenHandle, ModuleError> {
        self.start_screen(ScreenRequest::new(message, ScreenType::Pip), binder)
            .await
    }

    /// Close the picture-in-picture screen, if one is open
    pub async fn stop_pip_screen(&self) -> Option<ScreenId> {
        let entry = {
            let mut table = self.table.lock().await;
            let index = table
                .iter()
                .position(|e| e.key.screen_type == ScreenType::Pip)?;
            table.remove(index)
        };
        let screen_id = entry.screen_id;
        teardown(entry);
        Some(screen_id)
    }

    async fn stop_other_pips(&self, keep: ScreenId) {
        let stale: Vec<ScreenEntry> = {
            let mut table = self.table.lock().await;
            let (stale, kept): (Vec<ScreenEntry>, Vec<ScreenEntry>) = std::mem::take(&mut *table)
                .into_iter()
                .partition(|e| e.key.screen_type == ScreenType::Pip && e.screen_id != keep);
            *table = kept;
            stale
        };
        for entry in stale {
            teardown(entry);
        }
    }

    async fn take_entry(&self, screen_id: ScreenId) -> Option<ScreenEntry> {
        let mut table = self.table.lock().await;
        let index = table.iter().position(|e| e.screen_id == screen_id)?;
        Some(table.remove(index))
    }

    /// Give focus to one screen; every other focused screen loses it
    pub async fn focus_screen(&self, screen_id: ScreenId) -> Result<(), ModuleError> {
        let mut changes: Vec<(Arc<dyn ModuleScreen>, bool)> = {
            let mut table = self.table.lock().await;
            if !table.iter().any(|e| e.screen_id == screen_id) {
                return Err(ModuleError::ScreenNotFound(screen_id));
            }
            table
                .iter_mut()
                .filter_map(|e| {
                    let focused = e.screen_id == screen_id;
                    (e.focused != focused).then(|| {
                        e.focused = focused;
                        (Arc::clone(&e.instance), focused)
                    })
                })
                .collect()
        };
        // Blur before focus
        changes.sort_by_key(|(_, focused)| *focused);
        for (instance, focused) in changes {
            isolate_panic(|| instance.on_screen_focused(focused), "screen on_screen_focused");
        }
        Ok(())
    }

    pub async fn set_screen_visible(&self, screen_id: ScreenId, visible: bool) -> Result<(), ModuleError> {
        let changed = {
            let mut table = self.table.lock().await;
            let entry = table
                .iter_mut()
                .find(|e| e.screen_id == screen_id)
                .ok_or(ModuleError::ScreenNotFound(screen_id))?;
            (entry.visible != visible).then(|| {
                entry.visible = visible;
                Arc::clone(&entry.instance)
            })
        };
        if let Some(instance) = changed {
            isolate_panic(|| instance.on_screen_visible(visible), "screen on_screen_visible");
        }
        Ok(())
    }

    pub async fn set_screen_mode(&self, screen_id: ScreenId, mode: ScreenMode) -> Result<(), ModuleError> {
        let changed = {
            let mut table = self.table.lock().await;
            let entry = table
                .iter_mut()
                .find(|e| e.screen_id == screen_id)
                .ok_or(ModuleError::ScreenNotFound(screen_id))?;
            (entry.mode != mode).then(|| {
                entry.mode = mode;
                Arc::clone(&entry.instance)
            })
        };
        if let Some(instance) = changed {
            isolate_panic(|| instance.on_screen_mode_changed(mode), "screen on_screen_mode_changed");
        }
        Ok(())
    }

    pub async fn notify_screen_dragged(&self, screen_id: ScreenId, event: DragEvent) -> Result<(), ModuleError> {
        let instance = self.instance(screen_id).await?;
        isolate_panic(|| instance.on_screen_dragged(event), "screen on_screen_dragged");
        Ok(())
    }

    /// Tell open screens their host-side data finished synchronizing
    ///
    /// With `package_name` only that package's screens are told. Returns
    /// how many screens were notified.
    pub async fn notify_data_synchronized(&self, package_name: Option<&str>) -> usize {
        let instances: Vec<Arc<dyn ModuleScreen>> = {
            let table = self.table.lock().await;
            table
                .iter()
                .filter(|e| package_name.map_or(true, |p| e.key.package_name == p))
                .map(|e| Arc::clone(&e.instance))
                .collect()
        };
        for instance in &instances {
            isolate_panic(|| instance.on_data_synchronized(), "screen on_data_synchronized");
        }
        instances.len()
    }

    async fn instance(&self, screen_id: ScreenId) -> Result<Arc<dyn ModuleScreen>, ModuleError> {
        let table = self.table.lock().await;
        table
            .iter()
            .find(|e| e.screen_id == screen_id)
            .map(|e| Arc::clone(&e.instance))
            .ok_or(ModuleError::ScreenNotFound(screen_id))
    }

    /// Open screens in creation order
    pub async fn list_screens(&self) -> Vec<ScreenHandle> {
        self.table
            .lock()
            .await
            .iter()
            .map(|e| e.handle(false))
            .collect()
    }

    /// Messenger shared by the components on a screen surface
    pub async fn messenger(&self, screen_id: ScreenId) -> Option<Messenger> {
        with_lock(&self.table, |table| {
            table
                .iter()
                .find(|e| e.screen_id == screen_id)
                .map(|e| e.messenger.clone())
        })
        .await
    }

    pub async fn bind_state(&self, screen_id: ScreenId) -> Option<ScreenBindState> {
        with_lock(&self.table, |table| {
            table
                .iter()
                .find(|e| e.screen_id == screen_id)
                .map(|e| e.state)
        })
        .await
    }

    pub async fn focused_screen(&self) -> Option<ScreenId> {
        with_lock(&self.table, |table| {
            table.iter().find(|e| e.focused).map(|e| e.screen_id)
        })
        .await
    }

    pub async fn screen_count(&self) -> usize {
        with_lock(&self.table, |table| table.len()).await
    }

    /// Stop every screen of a package, returning how many were stopped
    pub(crate) async fn release_package(&self, package_name: &str) -> usize {
        let released: Vec<ScreenEntry> = {
            let mut table = self.table.lock().await;
            let (released, kept): (Vec<ScreenEntry>, Vec<ScreenEntry>) = std::mem::take(&mut *table)
                .into_iter()
                .partition(|e| e.key.package_name == package_name);
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
