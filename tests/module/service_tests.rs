//! Service lifecycle tests

use serde_json::json;
use std::sync::Arc;

use module_host::module::{
    Caller, ComponentBinder, Message, ModuleError, Permission, ScreenId, ScreenRequest,
};

use super::test_utils::*;

fn as_binder(binder: &Arc<RecordingBinder>) -> Arc<dyn ComponentBinder> {
    Arc::clone(binder) as Arc<dyn ComponentBinder>
}

#[tokio::test]
async fn test_bind_creates_and_starts_service() {
    let mut fixture = LifecycleFixture::new();
    let factory = fixture.install(package("com.sync", &[], &[("worker", "SYNC")]), &[]);
    let services = fixture.manager.services();

    let first = RecordingBinder::new();
    let second = RecordingBinder::new();
    let handle = services
        .bind_service(&Message::action("SYNC"), as_binder(&first))
        .await
        .unwrap();
    assert_eq!(handle.package_name, "com.sync");
    assert!(!handle.started);
    assert_eq!(handle.bindings, 1);

    let handle = services
        .bind_service(&Message::action("SYNC"), as_binder(&second))
        .await
        .unwrap();
    assert_eq!(handle.bindings, 2);
    assert_eq!(factory.created_count("worker"), 1);
    assert_eq!(
        fixture.events(),
        vec![
            "com.sync/worker:start",
            "com.sync/worker:bind(SYNC)=true",
            "com.sync/worker:bind(SYNC)=true",
        ]
    );
    assert_eq!(first.bound(), vec![pair("com.sync", "worker")]);
}

#[tokio::test]
async fn test_last_unbind_stops_unstarted_service() {
    let mut fixture = LifecycleFixture::new();
    fixture.install(package("com.sync", &[], &[("worker", "SYNC")]), &[]);
    let services = fixture.manager.services();
    let message = Message::action("SYNC");

    let first = as_binder(&RecordingBinder::new());
    let second = as_binder(&RecordingBinder::new());
    services.bind_service(&message, Arc::clone(&first)).await.unwrap();
    services.bind_service(&message, Arc::clone(&second)).await.unwrap();
    fixture.clear_events();

    services.unbind_service(&message, &first).await.unwrap();
    assert_eq!(services.binding_count("com.sync", "worker").await, 1);
    assert_eq!(services.running_services().await.len(), 1);

    services.unbind_service(&message, &second).await.unwrap();
    assert!(services.running_services().await.is_empty());
    assert_eq!(
        fixture.events(),
        vec![
            "com.sync/worker:unbind(SYNC)",
            "com.sync/worker:unbind(SYNC)",
            "com.sync/worker:stop",
        ]
    );

    assert!(matches!(
        services.unbind_service(&message, &second).await,
        Err(ModuleError::NotBound(_))
    ));
}

#[tokio::test]
async fn test_started_service_outlives_bindings() {
    let mut fixture = LifecycleFixture::new();
    fixture.install(package("com.sync", &[], &[("worker", "SYNC")]), &[]);
    let services = fixture.manager.services();
    let message = Message::action("SYNC");

    let handle = services.start_service(&message).await.unwrap();
    assert!(handle.started);

    let binder = RecordingBinder::new();
    let dyn_binder = as_binder(&binder);
    services.bind_service(&message, Arc::clone(&dyn_binder)).await.unwrap();
    services.unbind_service(&message, &dyn_binder).await.unwrap();
    assert_eq!(services.running_services().await.len(), 1);
    assert!(!fixture.events().contains(&"com.sync/worker:stop".to_string()));

    // Stopping unbinds remaining callers first
    services.bind_service(&message, Arc::clone(&dyn_binder)).await.unwrap();
    fixture.clear_events();
    assert_eq!(services.stop_service(&message).await.unwrap(), 1);
    assert_eq!(
        fixture.events(),
        vec!["com.sync/worker:unbind(SYNC)", "com.sync/worker:stop"]
    );
    assert_eq!(binder.unbound().len(), 2);
    assert!(services.running_services().await.is_empty());
}

#[tokio::test]
async fn test_declining_service_is_skipped_and_stopped() {
    let mut fixture = LifecycleFixture::new();
    let first = fixture.install(package("com.a", &[], &[("worker", "SYNC")]), &[]);
    fixture.install(package("com.b", &[], &[("worker", "SYNC")]), &[]);
    first.decline("worker");
    let services = fixture.manager.services();

    let binder = RecordingBinder::new();
    let handle = services
        .bind_service(&Message::action("SYNC"), as_binder(&binder))
        .await
        .unwrap();
    assert_eq!(handle.package_name, "com.b");
    assert_eq!(
        fixture.events(),
        vec![
            "com.a/worker:start",
            "com.a/worker:bind(SYNC)=false",
            "com.a/worker:stop",
            "com.b/worker:start",
            "com.b/worker:bind(SYNC)=true",
        ]
    );
    let running = services.running_services().await;
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].package_name, "com.b");
}

#[tokio::test]
async fn test_service_errors() {
    let mut fixture = LifecycleFixture::new();
    let factory = fixture.install(package("com.a", &[], &[("worker", "SYNC")]), &[]);
    factory.decline("worker");
    let services = fixture.manager.services();
    let binder = RecordingBinder::new();

    assert!(matches!(
        services.bind_service(&Message::action("NOPE"), as_binder(&binder)).await,
        Err(ModuleError::NoMatch(_))
    ));
    assert!(matches!(
        services.bind_service(&Message::action("SYNC"), as_binder(&binder)).await,
        Err(ModuleError::BindRejected(_))
    ));
    assert!(matches!(
        services.stop_service(&Message::action("NOPE")).await,
        Err(ModuleError::NoMatch(_))
    ));
    assert_eq!(services.stop_service(&Message::action("SYNC")).await.unwrap(), 0);
}

#[tokio::test]
async fn test_bind_as_package_needs_service_manager() {
    let mut fixture = LifecycleFixture::new();
    fixture.install(package("com.sync", &[], &[("worker", "SYNC")]), &[]);
    fixture.install(package("com.client", &[], &[]), &[]);
    fixture.install(package("com.trusted", &[], &[]), &[Permission::ServiceManager]);
    let services = fixture.manager.services();
    let binder = RecordingBinder::new();
    let message = Message::action("SYNC");

    let denied = services
        .bind_service_as(&Caller::Package("com.client".into()), &message, as_binder(&binder))
        .await;
    assert!(matches!(denied, Err(ModuleError::PermissionDenied(_))));

    let unknown = services
        .bind_service_as(&Caller::Package("com.ghost".into()), &message, as_binder(&binder))
        .await;
    assert!(matches!(unknown, Err(ModuleError::PackageNotFound(_))));

    services
        .bind_service_as(&Caller::Package("com.trusted".into()), &message, as_binder(&binder))
        .await
        .unwrap();
    services
        .bind_service_as(&Caller::Host, &message, as_binder(&binder))
        .await
        .unwrap();
    assert_eq!(services.binding_count("com.sync", "worker").await, 2);
}

#[tokio::test]
async fn test_start_as_package_needs_service_manager() {
    let mut fixture = LifecycleFixture::new();
    let factory = fixture.install(package("com.sync", &[], &[("worker", "SYNC")]), &[]);
    fixture.install(package("com.client", &[], &[]), &[]);
    let services = fixture.manager.services();
    let message = Message::action("SYNC");

    let denied = services
        .start_service_as(&Caller::Package("com.client".into()), &message)
        .await;
    assert!(matches!(denied, Err(ModuleError::PermissionDenied(_))));
    assert_eq!(factory.created_count("worker"), 0);
    assert!(services.running_services().await.is_empty());

    let handle = services.start_service_as(&Caller::Host, &message).await.unwrap();
    assert!(handle.started);
}

#[tokio::test]
async fn test_service_bound_from_screen_shares_its_messenger() {
    let mut fixture = LifecycleFixture::new();
    fixture.install(package("com.ui", &[("main", "X"), ("other", "Y")], &[]), &[]);
    let worker = fixture.install(package("com.sync", &[], &[("worker", "SYNC")]), &[]);
    let binder = RecordingBinder::new();
    let screens = fixture.manager.screens();

    let main = screens
        .start_screen(ScreenRequest::tab(open_message("X")), as_binder(&binder))
        .await
        .unwrap();
    let other = screens
        .start_screen(ScreenRequest::tab(open_message("Y")), as_binder(&binder))
        .await
        .unwrap();
    fixture.clear_events();

    fixture
        .manager
        .bind_service_from_screen(main.screen_id, &Message::action("SYNC"), as_binder(&binder))
        .await
        .unwrap();
    // A plain bind carries no surface
    fixture
        .manager
        .services()
        .bind_service(&Message::action("SYNC"), as_binder(&RecordingBinder::new()))
        .await
        .unwrap();

    let service = Arc::clone(&worker.services.lock().unwrap()[0]);
    let messengers = service.messengers.lock().unwrap().clone();
    assert_eq!(messengers.len(), 1);
    assert_eq!(messengers[0].broadcast(NOTE_TOPIC, &[json!("saved")]), 1);

    let notes: Vec<String> = fixture
        .events()
        .into_iter()
        .filter(|e| e.contains(":note"))
        .collect();
    assert_eq!(notes, vec![r#"com.ui/main:note[String("saved")]"#.to_string()]);

    // The other surface has its own messenger
    let other_messenger = screens.messenger(other.screen_id).await.unwrap();
    assert_eq!(other_messenger.broadcast(NOTE_TOPIC, &[json!(1)]), 1);
    assert!(fixture.events().contains(&"com.ui/other:note[Number(1)]".to_string()));

    // Closing the surface closes its messenger
    screens.stop_screen(main.screen_id).await.unwrap();
    assert_eq!(messengers[0].broadcast(NOTE_TOPIC, &[json!("late")]), 0);

    let missing = fixture
        .manager
        .bind_service_from_screen(ScreenId::new(), &Message::action("SYNC"), as_binder(&binder))
        .await;
    assert!(matches!(missing, Err(ModuleError::ScreenNotFound(_))));
}
