use std::sync::Arc;

use futures::future::join_all;

use crate::config::data::{ComponentDescriptor, ConfigurationData};
use crate::config::manager::ConfigurationManager;
use crate::config::persistent::{FileConfigurationList, PersistentConfigurationList};
use crate::config::store::InMemoryConfigurationStore;
use crate::kernel::error::Error;
use crate::lifecycle::State;
use crate::registry::name::ComponentName;
use crate::registry::query::NameQuery;
use crate::tests::integration::common::{
    PROBE_INTERFACE, PROBE_TYPE, Probe, artifact, entries, interfaces, position, probe, probe_configuration,
    recording_listener, setup_kernel, setup_manager,
};

#[tokio::test]
async fn test_dependent_configuration_starts_after_its_parent() {
    let (manager, store, log) = setup_manager().await;
    let a = artifact("a");
    let b = artifact("b");
    store.install(probe_configuration(&a, &["x"])).await;
    store.install(probe_configuration(&b, &["y"]).with_parent(a.clone())).await;
    let (events, listener) = recording_listener();
    manager.kernel().monitor().add_listener(None, listener).await;

    manager.load_configuration(&b).await.unwrap();
    manager.start_configuration(&b).await.unwrap();

    let events = events.lock().unwrap().clone();
    let sequence_of = |name: &ComponentName, to: State| {
        events
            .iter()
            .find(|e| &e.name == name && e.to == to)
            .map(|e| e.sequence)
            .unwrap_or_else(|| panic!("no {} event for {}", to, name))
    };
    // every component of A is running before any component of B starts
    let last_a = sequence_of(&probe(&a, "x"), State::Running).max(sequence_of(&ComponentName::configuration(&a), State::Running));
    let first_b = sequence_of(&ComponentName::configuration(&b), State::Starting);
    assert!(last_a < first_b);
    assert!(sequence_of(&probe(&b, "y"), State::Starting) > first_b);

    let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
    assert!(sequences.windows(2).all(|w| w[0] < w[1]), "sequence numbers are strictly increasing");
    assert_eq!(entries(&log), vec!["start:x", "start:y"]);
}

#[tokio::test]
async fn test_load_then_unload_leaves_nothing_behind() {
    let (manager, store, _log) = setup_manager().await;
    let db = artifact("db");
    let web = artifact("web");
    store.install(probe_configuration(&db, &["pool", "cache"])).await;
    store
        .install(
            ConfigurationData::new(web.clone())
                .with_parent(db.clone())
                .with_component(ComponentDescriptor::new("server", PROBE_TYPE).with_reference("peer", probe(&db, "pool")))
                .with_child(probe_configuration(&artifact("web-admin"), &["console"])),
        )
        .await;
    let kernel = manager.kernel().clone();

    manager.load_configuration(&web).await.unwrap();
    assert_eq!(kernel.registry().len().await, 7);
    manager.start_configuration(&web).await.unwrap();
    manager.stop_configuration(&db).await.unwrap();
    manager.unload_configuration(&web).await.unwrap();
    manager.unload_configuration(&db).await.unwrap();

    assert!(kernel.registry().is_empty().await);
    assert!(manager.loaded_configurations().await.is_empty());
    assert_eq!(kernel.proxies().live_count(), 0);
}

#[tokio::test]
async fn test_dependency_on_stopped_configuration_blocks_start() {
    let (manager, store, _log) = setup_manager().await;
    let db = artifact("db");
    let web = artifact("web");
    store.install(probe_configuration(&db, &["pool"])).await;
    store
        .install(
            ConfigurationData::new(web.clone())
                .with_parent(db.clone())
                .with_component(
                    ComponentDescriptor::new("server", PROBE_TYPE).with_dependency(NameQuery::exact(&probe(&db, "pool"))),
                ),
        )
        .await;
    manager.load_configuration(&web).await.unwrap();
    manager.start_configuration(&web).await.unwrap();
    let kernel = manager.kernel();

    // the parent's representative going down takes the child with it
    manager.stop_configuration(&db).await.unwrap();
    assert!(!manager.is_running(&web).await);

    // starting the component directly fails: its peer is not running
    kernel.start(&ComponentName::configuration(&db)).await.unwrap();
    kernel.start(&ComponentName::configuration(&web)).await.unwrap();
    let err = kernel.start(&probe(&web, "server")).await.unwrap_err();
    assert!(matches!(err, Error::MissingDependency { .. }), "got {:?}", err);
    assert_eq!(kernel.state(&probe(&web, "server")).await.unwrap(), State::Stopped);
    assert!(kernel.state_reason(&probe(&web, "server")).await.unwrap().is_some());

    kernel.start(&probe(&db, "pool")).await.unwrap();
    kernel.retry(&probe(&web, "server")).await.unwrap();
    assert_eq!(kernel.state(&probe(&web, "server")).await.unwrap(), State::Running);
}

#[tokio::test]
async fn test_proxy_into_configuration_survives_restart() {
    let (manager, store, _log) = setup_manager().await;
    let web = artifact("web");
    store.install(probe_configuration(&web, &["server"])).await;
    manager.load_configuration(&web).await.unwrap();
    manager.start_configuration(&web).await.unwrap();
    let kernel = manager.kernel();

    let proxy = kernel
        .create_proxy(probe(&web, "server"), interfaces(&[PROBE_INTERFACE]))
        .await
        .unwrap();
    let first = proxy.get::<Probe>().await.unwrap();
    assert_eq!(kernel.generation(&probe(&web, "server")).await.unwrap(), 1);

    manager.stop_configuration(&web).await.unwrap();
    assert!(matches!(proxy.get::<Probe>().await, Err(Error::IllegalState(_))));
    manager.start_configuration(&web).await.unwrap();

    let second = proxy.get::<Probe>().await.expect("proxy follows the new instance");
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(kernel.generation(&probe(&web, "server")).await.unwrap(), 2);
    kernel.destroy_proxy(&proxy).unwrap();
}

#[tokio::test]
async fn test_concurrent_starts_of_shared_parent() {
    let (manager, store, log) = setup_manager().await;
    let base = artifact("base");
    store.install(probe_configuration(&base, &["core"])).await;
    let apps: Vec<_> = (0..4).map(|i| artifact(&format!("app{}", i))).collect();
    for app in &apps {
        store
            .install(probe_configuration(app, &["worker"]).with_parent(base.clone()))
            .await;
    }
    for app in &apps {
        manager.load_configuration(app).await.unwrap();
    }

    let starts = apps.iter().map(|app| {
        let manager = manager.clone();
        let app = app.clone();
        async move { manager.start_configuration(&app).await }
    });
    let results = join_all(starts).await;
    assert!(results.iter().all(|r| r.is_ok()), "results: {:?}", results);

    assert!(manager.is_running(&base).await);
    for app in &apps {
        assert!(manager.is_running(app).await);
    }
    let log = entries(&log);
    assert_eq!(log.iter().filter(|e| *e == "start:core").count(), 1, "shared parent started once");
    assert_eq!(log.iter().filter(|e| *e == "start:worker").count(), 4);
    assert_eq!(log.iter().position(|e| e == "start:core"), Some(0));
}

#[tokio::test]
async fn test_file_list_restores_after_restart() {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let list_path = dir.path().join("state").join("configurations.json");
    let store = Arc::new(InMemoryConfigurationStore::new());
    let db = artifact("db");
    let web = artifact("web");
    let tool = artifact("tool");
    store.install(probe_configuration(&db, &["pool"])).await;
    store.install(probe_configuration(&web, &["server"]).with_parent(db.clone())).await;
    store.install(probe_configuration(&tool, &["cli"])).await;

    {
        let (kernel, _log) = setup_kernel().await;
        let list = Arc::new(FileConfigurationList::open(&list_path).unwrap());
        let manager = ConfigurationManager::builder(kernel.clone())
            .store(store.clone())
            .persistent_list(list)
            .build()
            .await;
        manager.restore().await;
        for id in [&web, &tool] {
            manager.load_configuration(id).await.unwrap();
            manager.start_configuration(id).await.unwrap();
        }
        manager.stop_configuration(&tool).await.unwrap();
        kernel.shutdown().await;
        assert!(kernel.registry().is_empty().await);
    }

    let (kernel, log) = setup_kernel().await;
    let list = Arc::new(FileConfigurationList::open(&list_path).unwrap());
    assert!(!list.is_kernel_fully_started().await);
    assert_eq!(list.restore().await.unwrap(), vec![db.clone(), web.clone()]);
    let manager = ConfigurationManager::builder(kernel)
        .store(store)
        .persistent_list(list.clone())
        .build()
        .await;

    let results = manager.restore().await;
    assert!(results.failed.is_empty(), "failed: {:?}", results.failed);
    assert!(manager.is_running(&db).await && manager.is_running(&web).await);
    assert!(!manager.is_loaded(&tool).await);
    assert!(position(&log, "start:pool") < position(&log, "start:server"));
    assert!(list.is_kernel_fully_started().await);
}
