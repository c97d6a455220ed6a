use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::data::{ComponentDescriptor, ConfigurationData};
use crate::config::manager::ConfigurationManager;
use crate::config::store::InMemoryConfigurationStore;
use crate::kernel::bootstrap::{Kernel, ShutdownHook};
use crate::tests::integration::common::{PROBE_TYPE, artifact, entries, position, probe_configuration, setup_kernel};

struct CountingHook {
    name: &'static str,
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ShutdownHook for CountingHook {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, kernel: &Kernel) {
        let loaded = kernel.registry().len().await;
        self.calls.lock().unwrap().push(format!("{}:{}", self.name, loaded));
    }
}

/// `a` (probe x) and `b` (probe y, parent `a`, stop hook fails).
async fn two_configurations() -> Arc<InMemoryConfigurationStore> {
    let store = Arc::new(InMemoryConfigurationStore::new());
    store.install(probe_configuration(&artifact("a"), &["x"])).await;
    store
        .install(
            ConfigurationData::new(artifact("b"))
                .with_parent(artifact("a"))
                .with_component(ComponentDescriptor::new("y", PROBE_TYPE).with_attribute("failStop", true)),
        )
        .await;
    store
}

#[tokio::test]
async fn test_shutdown_stops_dependents_first_despite_failures() {
    let (kernel, log) = setup_kernel().await;
    let manager = ConfigurationManager::builder(kernel.clone())
        .store(two_configurations().await)
        .build()
        .await;
    manager.load_configuration(&artifact("b")).await.unwrap();
    manager.start_configuration(&artifact("b")).await.unwrap();

    kernel.shutdown().await;

    assert!(position(&log, "stop:y") < position(&log, "stop:x"));
    assert!(manager.loaded_configurations().await.is_empty());
    assert!(kernel.registry().is_empty().await);
    assert!(kernel.is_shut_down());
}

#[tokio::test]
async fn test_hooks_run_around_the_manager_in_registration_order() {
    let (kernel, _log) = setup_kernel().await;
    let calls = Arc::new(Mutex::new(Vec::new()));
    kernel
        .register_shutdown_hook(Arc::new(CountingHook {
            name: "before",
            calls: calls.clone(),
        }))
        .await;
    let manager = ConfigurationManager::builder(kernel.clone())
        .store(two_configurations().await)
        .build()
        .await;
    kernel
        .register_shutdown_hook(Arc::new(CountingHook {
            name: "after",
            calls: calls.clone(),
        }))
        .await;
    manager.load_configuration(&artifact("b")).await.unwrap();

    kernel.shutdown().await;
    assert_eq!(*calls.lock().unwrap(), vec!["before:4".to_string(), "after:0".to_string()]);
}

#[tokio::test]
async fn test_dropped_manager_leaves_cleanup_to_the_kernel() {
    let (kernel, log) = setup_kernel().await;
    {
        let manager = ConfigurationManager::builder(kernel.clone())
            .store(two_configurations().await)
            .build()
            .await;
        manager.load_configuration(&artifact("b")).await.unwrap();
        manager.start_configuration(&artifact("b")).await.unwrap();
    }

    kernel.shutdown().await;
    assert_eq!(entries(&log), vec!["start:x", "start:y", "stop:y", "stop:x"]);
    assert!(kernel.registry().is_empty().await);
}

#[tokio::test]
async fn test_removed_hook_does_not_run() {
    let (kernel, _log) = setup_kernel().await;
    let manager = ConfigurationManager::builder(kernel.clone())
        .store(two_configurations().await)
        .shutdown_hook(false)
        .build()
        .await;
    let hook = manager.install_shutdown_hook().await;
    assert!(kernel.unregister_shutdown_hook(hook).await);
    manager.load_configuration(&artifact("a")).await.unwrap();

    kernel.shutdown().await;
    assert_eq!(manager.loaded_configurations().await, vec![artifact("a")]);
    assert!(kernel.registry().is_empty().await);
}

#[tokio::test]
async fn test_manager_after_shutdown() {
    let (kernel, _log) = setup_kernel().await;
    let manager = ConfigurationManager::builder(kernel.clone())
        .store(two_configurations().await)
        .build()
        .await;
    kernel.shutdown().await;
    kernel.shutdown().await;

    assert!(manager.load_configuration(&artifact("a")).await.is_err());
    assert!(!manager.is_loaded(&artifact("a")).await);
}
