//! Package lifecycle tests
//!
//! Discovery from disk into a running manager, plus uninstall and update
//! of packages with live instances.

use serde_json::{json, Value};
use std::fs;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use module_host::module::registry::{discover_and_install, MANIFEST_FILE};
use module_host::module::{
    Caller, ChannelEnd, ComponentBinder, ComponentContext, ComponentFactory, ContextId, Message,
    ModuleError, ModuleScreen, ModuleService, PackageInfo, PackageRegistry, PackageState, Permission,
    ProgramState, RunningProgramInfo, ScreenRequest, ScreenType,
};
use module_host::PackagesConfig;

use super::test_utils::*;

fn as_binder(binder: &Arc<RecordingBinder>) -> Arc<dyn ComponentBinder> {
    Arc::clone(binder) as Arc<dyn ComponentBinder>
}

fn write_manifest(root: &TempDir, dir: &str, body: &str) {
    let path = root.path().join(dir);
    fs::create_dir_all(&path).unwrap();
    fs::write(path.join(MANIFEST_FILE), body).unwrap();
}

/// When the package manager removes a package during a bind
#[derive(Clone, Copy)]
enum Removal {
    OnCreate,
    OnBind,
}

/// Factory whose package is uninstalled underneath the lifecycle manager
struct RemovingFactory {
    registry: Arc<PackageRegistry>,
    inner: Arc<TestFactory>,
    removal: Removal,
}

impl RemovingFactory {
    fn remove(&self) {
        let _ = self.registry.uninstall(&self.inner.package_name);
    }
}

impl ComponentFactory for RemovingFactory {
    fn create_screen(&self, component_id: &str, context: &ComponentContext) -> Option<Arc<dyn ModuleScreen>> {
        let screen = self.inner.create_screen(component_id, context)?;
        match self.removal {
            Removal::OnCreate => {
                self.remove();
                Some(screen)
            }
            Removal::OnBind => Some(Arc::new(RemovingComponent {
                registry: Arc::clone(&self.registry),
                package_name: self.inner.package_name.clone(),
                screen: Some(screen),
                service: None,
            })),
        }
    }

    fn create_service(&self, component_id: &str, context: &ComponentContext) -> Option<Arc<dyn ModuleService>> {
        let service = self.inner.create_service(component_id, context)?;
        match self.removal {
            Removal::OnCreate => {
                self.remove();
                Some(service)
            }
            Removal::OnBind => Some(Arc::new(RemovingComponent {
                registry: Arc::clone(&self.registry),
                package_name: self.inner.package_name.clone(),
                screen: None,
                service: Some(service),
            })),
        }
    }
}

/// Accepts through the wrapped component, then uninstalls its own package
struct RemovingComponent {
    registry: Arc<PackageRegistry>,
    package_name: String,
    screen: Option<Arc<dyn ModuleScreen>>,
    service: Option<Arc<dyn ModuleService>>,
}

impl ModuleScreen for RemovingComponent {
    fn on_bind(&self, message: &Message, channel: ChannelEnd, context: &ComponentContext) -> bool {
        let accepted = self
            .screen
            .as_ref()
            .is_some_and(|s| s.on_bind(message, channel, context));
        let _ = self.registry.uninstall(&self.package_name);
        accepted
    }

    fn on_unbind(&self, message: &Message) {
        if let Some(screen) = &self.screen {
            screen.on_unbind(message);
        }
    }

    fn on_destroy(&self) {
        if let Some(screen) = &self.screen {
            screen.on_destroy();
        }
    }
}

impl ModuleService for RemovingComponent {
    fn on_start(&self, context: &ComponentContext) {
        if let Some(service) = &self.service {
            service.on_start(context);
        }
    }

    fn on_bind(&self, message: &Message, channel: ChannelEnd, context: &ComponentContext) -> bool {
        let accepted = self
            .service
            .as_ref()
            .is_some_and(|s| s.on_bind(message, channel, context));
        let _ = self.registry.uninstall(&self.package_name);
        accepted
    }

    fn on_unbind(&self, message: &Message) {
        if let Some(service) = &self.service {
            service.on_unbind(message);
        }
    }

    fn on_stop(&self) {
        if let Some(service) = &self.service {
            service.on_stop();
        }
    }
}

fn install_removing(
    fixture: &LifecycleFixture,
    info: PackageInfo,
    removal: Removal,
) -> Arc<TestFactory> {
    let name = info.name.clone();
    fixture.registry.install(info).unwrap();
    let inner = TestFactory::new(&name, Arc::clone(&fixture.log));
    let factory = RemovingFactory {
        registry: Arc::clone(&fixture.registry),
        inner: Arc::clone(&inner),
        removal,
    };
    fixture
        .manager
        .register_factory(name, Arc::new(factory) as Arc<dyn ComponentFactory>);
    inner
}

#[tokio::test]
async fn test_screen_of_package_removed_during_create_is_skipped() {
    let mut fixture = LifecycleFixture::new();
    install_removing(&fixture, package("com.a", &[("main", "X")], &[]), Removal::OnCreate);
    fixture.install(package("com.b", &[("main", "X")], &[]), &[]);
    let binder = RecordingBinder::new();

    let handle = fixture
        .manager
        .screens()
        .start_screen(ScreenRequest::tab(open_message("X")), as_binder(&binder))
        .await
        .unwrap();

    assert_eq!(handle.package_name, "com.b");
    assert!(!fixture.registry.is_installed("com.a"));
    assert_eq!(binder.bound(), vec![pair("com.b", "main")]);
    assert_eq!(fixture.manager.screens().screen_count().await, 1);
    let events = fixture.events();
    assert!(events.contains(&"com.a/main:destroy".to_string()));
    assert!(!events.iter().any(|e| e.starts_with("com.a/main:bind")));
}

#[tokio::test]
async fn test_screen_of_package_removed_during_bind_fails_closed() {
    let fixture = LifecycleFixture::new();
    let inner = install_removing(&fixture, package("com.a", &[("main", "X")], &[]), Removal::OnBind);
    let binder = RecordingBinder::new();

    let result = fixture
        .manager
        .screens()
        .start_screen(ScreenRequest::tab(open_message("X")), as_binder(&binder))
        .await;

    assert!(matches!(result, Err(ModuleError::BindRejected(_))));
    assert!(binder.bound().is_empty());
    assert_eq!(fixture.manager.screens().screen_count().await, 0);
    assert_eq!(
        fixture.events(),
        vec!["com.a/main:bind(X)=true", "com.a/main:unbind(X)", "com.a/main:destroy"]
    );
    let component_end = inner.screens.lock().unwrap()[0].channels.lock().unwrap()[0].clone();
    assert!(!component_end.is_open());
}

#[tokio::test]
async fn test_service_of_package_removed_during_create_is_never_started() {
    let fixture = LifecycleFixture::new();
    let inner = install_removing(&fixture, package("com.a", &[], &[("worker", "SYNC")]), Removal::OnCreate);
    let binder = RecordingBinder::new();

    let result = fixture
        .manager
        .services()
        .bind_service(&Message::action("SYNC"), as_binder(&binder))
        .await;

    assert!(matches!(result, Err(ModuleError::BindRejected(_))));
    assert_eq!(inner.created_count("worker"), 1);
    assert!(fixture.events().is_empty());
    assert!(fixture.manager.services().running_services().await.is_empty());
}

#[tokio::test]
async fn test_service_of_package_removed_during_bind_falls_through() {
    let mut fixture = LifecycleFixture::new();
    install_removing(&fixture, package("com.a", &[], &[("worker", "SYNC")]), Removal::OnBind);
    fixture.install(package("com.b", &[], &[("worker", "SYNC")]), &[]);
    let binder = RecordingBinder::new();

    let handle = fixture
        .manager
        .services()
        .bind_service(&Message::action("SYNC"), as_binder(&binder))
        .await
        .unwrap();

    assert_eq!(handle.package_name, "com.b");
    assert_eq!(binder.bound(), vec![pair("com.b", "worker")]);
    assert_eq!(
        fixture.events(),
        vec![
            "com.a/worker:start",
            "com.a/worker:bind(SYNC)=true",
            "com.a/worker:unbind(SYNC)",
            "com.a/worker:stop",
            "com.b/worker:start",
            "com.b/worker:bind(SYNC)=true",
        ]
    );
    let running = fixture.manager.services().running_services().await;
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].package_name, "com.b");
}

#[tokio::test]
async fn test_package_callers_need_package_manager() {
    let mut fixture = LifecycleFixture::new();
    fixture.install(package("com.a", &[("main", "X")], &[]), &[]);
    fixture.install(package("com.caller", &[], &[]), &[]);
    fixture.install(package("com.store", &[], &[]), &[Permission::PackageManager]);
    let caller = Caller::Package("com.caller".into());
    let store = Caller::Package("com.store".into());

    assert!(matches!(
        fixture
            .manager
            .update_package_as(&caller, package("com.a", &[("main", "Y")], &[]))
            .await,
        Err(ModuleError::PermissionDenied(_))
    ));
    assert!(matches!(
        fixture.manager.uninstall_package_as(&caller, "com.a").await,
        Err(ModuleError::PermissionDenied(_))
    ));
    assert!(fixture.registry.is_installed("com.a"));

    fixture
        .manager
        .update_package_as(&store, package("com.a", &[("main", "Y")], &[]))
        .await
        .unwrap();
    fixture.manager.uninstall_package_as(&store, "com.a").await.unwrap();
    assert!(!fixture.registry.is_installed("com.a"));
}

#[tokio::test]
async fn test_uninstall_destroys_instances() {
    let mut fixture = LifecycleFixture::new();
    fixture.install(package("com.a", &[("main", "X")], &[("worker", "SYNC")]), &[]);
    let binder = RecordingBinder::new();

    fixture
        .manager
        .screens()
        .start_screen(ScreenRequest::tab(open_message("X")), as_binder(&binder))
        .await
        .unwrap();
    fixture
        .manager
        .services()
        .bind_service(&Message::action("SYNC"), as_binder(&binder))
        .await
        .unwrap();
    fixture.clear_events();

    let removed = fixture.manager.uninstall_package("com.a").await.unwrap();
    assert_eq!(removed.name, "com.a");
    let events = fixture.events();
    assert!(events.contains(&"com.a/main:destroy".to_string()));
    assert!(events.contains(&"com.a/worker:stop".to_string()));
    assert_eq!(binder.unbound().len(), 2);
    assert_eq!(fixture.manager.screens().screen_count().await, 0);
    assert!(fixture.manager.services().running_services().await.is_empty());

    let result = fixture
        .manager
        .screens()
        .start_screen(ScreenRequest::tab(open_message("X")), as_binder(&binder))
        .await;
    assert!(matches!(result, Err(ModuleError::NoMatch(_))));
    assert!(matches!(
        fixture.manager.uninstall_package("com.a").await,
        Err(ModuleError::PackageNotFound(_))
    ));
}

#[tokio::test]
async fn test_update_restarts_from_new_metadata() {
    let mut fixture = LifecycleFixture::new();
    let factory = fixture.install(package("com.a", &[("main", "X")], &[]), &[]);
    let binder = RecordingBinder::new();
    let screens = fixture.manager.screens();

    screens
        .start_screen(ScreenRequest::tab(open_message("X")), as_binder(&binder))
        .await
        .unwrap();

    fixture
        .manager
        .update_package(package("com.a", &[("main", "Y")], &[]))
        .await
        .unwrap();
    assert_eq!(screens.screen_count().await, 0);
    assert_eq!(fixture.registry.state("com.a"), PackageState::Installed);

    let old = screens
        .start_screen(ScreenRequest::tab(open_message("X")), as_binder(&binder))
        .await;
    assert!(matches!(old, Err(ModuleError::NoMatch(_))));
    screens
        .start_screen(ScreenRequest::tab(open_message("Y")), as_binder(&binder))
        .await
        .unwrap();
    assert_eq!(factory.created_count("main"), 2);

    assert!(matches!(
        fixture
            .manager
            .update_package(package("com.missing", &[], &[]))
            .await,
        Err(ModuleError::PackageNotFound(_))
    ));
}

#[tokio::test]
async fn test_discovered_packages_route_messages() {
    let dir = TempDir::new().unwrap();
    write_manifest(
        &dir,
        "pallet",
        r#"
name = "com.example.pallet"
version = "1.0.0"
permissions = ["system"]

[[screens]]
id = "main"
filters = [{ action = "X", category = "SCREEN" }]
"#,
    );
    write_manifest(
        &dir,
        "broken",
        r#"
name = "not a valid name"
version = "1"
"#,
    );

    let fixture = LifecycleFixture::new();
    let config = PackagesConfig {
        packages_dir: dir.path().to_path_buf(),
        enabled_packages: Vec::new(),
        auto_discover: true,
    };
    assert_eq!(discover_and_install(&config, &fixture.registry), 1);

    let factory = TestFactory::new("com.example.pallet", Arc::clone(&fixture.log));
    fixture
        .manager
        .register_factory("com.example.pallet", Arc::clone(&factory) as Arc<dyn ComponentFactory>);

    let binder = RecordingBinder::new();
    let handle = fixture
        .manager
        .screens()
        .start_screen(
            ScreenRequest::new(open_message("X"), ScreenType::FullScreen),
            as_binder(&binder),
        )
        .await
        .unwrap();
    assert_eq!(handle.package_name, "com.example.pallet");
    assert_eq!(factory.created_count("main"), 1);
}

#[tokio::test]
async fn test_program_state_reaches_bound_caller() {
    let mut fixture = LifecycleFixture::new();
    let factory = fixture.install(package("com.a", &[("main", "X")], &[]), &[]);
    let binder = RecordingBinder::new();

    fixture
        .manager
        .screens()
        .start_screen(ScreenRequest::tab(open_message("X")), as_binder(&binder))
        .await
        .unwrap();

    let received: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    binder
        .last_channel()
        .unwrap()
        .receive("program_state", move |args: &[Value]| {
            sink.lock().unwrap().extend(args.iter().cloned());
        });

    // The screen pushes program state to its caller
    let component_end = factory.screens.lock().unwrap()[0].channels.lock().unwrap()[0].clone();
    let program = RunningProgramInfo::new();
    let owner = ContextId::new();
    let callback = program.forward_to_channel(owner, component_end);
    program.start("pallet.prog").unwrap();
    program.pause().unwrap();

    assert_eq!(
        *received.lock().unwrap(),
        vec![json!("IDLE"), json!("RUNNING"), json!("PAUSED")]
    );

    assert!(program.state().unregister(owner, &callback));
    program.stop().unwrap();
    assert_eq!(received.lock().unwrap().len(), 3);
    assert_eq!(program.state().value(), ProgramState::Stopped);
}
