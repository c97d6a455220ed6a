use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::kernel::Kernel;
use crate::kernel::error::{Error, Result};
use crate::lifecycle::State;
use crate::registry::component::{
    AttributeAware, AttributeInfo, AttributeKind, ComponentContext, ComponentData, ComponentType, ManagedComponent,
    Startable, Stoppable,
};
use crate::registry::name::ComponentName;
use crate::registry::query::NameQuery;
use crate::tests::integration::common::{
    EventLog, PROBE_TYPE, Probe, artifact, entries, new_log, position, probe, setup_kernel,
};

// ===== SLOW AND ECHO COMPONENTS =====

const SLOW_TYPE: &str = "test.Slow";
const ECHO_TYPE: &str = "test.Echo";

/// Stops a couple of milliseconds after being asked to.
#[derive(Debug)]
struct Slow {
    log: EventLog,
}

impl ManagedComponent for Slow {
    fn startable(&self) -> Option<&dyn Startable> {
        Some(self)
    }

    fn stoppable(&self) -> Option<&dyn Stoppable> {
        Some(self)
    }
}

#[async_trait]
impl Startable for Slow {
    async fn start(&self) -> Result<()> {
        self.log.lock().unwrap().push("start".to_string());
        Ok(())
    }
}

#[async_trait]
impl Stoppable for Slow {
    async fn stop(&self) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.log.lock().unwrap().push("stop".to_string());
        Ok(())
    }
}

fn slow_type(log: EventLog) -> ComponentType {
    let factory = move |_context: ComponentContext| -> Result<Arc<dyn ManagedComponent>> {
        Ok(Arc::new(Slow { log: log.clone() }))
    };
    ComponentType::builder(SLOW_TYPE, factory).build()
}

/// Reads the current value back through the kernel whenever an attribute changes.
#[derive(Debug)]
struct Echo {
    name: ComponentName,
    kernel: Kernel,
    log: EventLog,
}

impl ManagedComponent for Echo {
    fn attribute_aware(&self) -> Option<&dyn AttributeAware> {
        Some(self)
    }
}

impl AttributeAware for Echo {
    fn attribute_changed(&self, name: &str, value: &Value) -> Result<()> {
        let current = futures::executor::block_on(self.kernel.get_attribute(&self.name, name))?;
        self.log.lock().unwrap().push(format!("{}:{}->{}", name, current, value));
        Ok(())
    }
}

fn echo_type(log: EventLog) -> ComponentType {
    let factory = move |context: ComponentContext| -> Result<Arc<dyn ManagedComponent>> {
        Ok(Arc::new(Echo {
            name: context.name.clone(),
            kernel: context.kernel.clone(),
            log: log.clone(),
        }))
    };
    ComponentType::builder(ECHO_TYPE, factory)
        .attribute(AttributeInfo::new("greeting", AttributeKind::String).mutable())
        .build()
}

#[tokio::test]
async fn test_start_and_stop_run_hooks() {
    let (kernel, log) = setup_kernel().await;
    let name = probe(&artifact("web"), "server");
    kernel.load_component(ComponentData::new(name.clone(), PROBE_TYPE)).await.unwrap();

    kernel.start(&name).await.expect("start");
    assert_eq!(kernel.state(&name).await.unwrap(), State::Running);
    assert!(kernel.instance(&name).await.unwrap().is_some());

    kernel.stop(&name).await.expect("stop");
    assert_eq!(kernel.state(&name).await.unwrap(), State::Stopped);
    assert!(kernel.instance(&name).await.unwrap().is_none());
    assert_eq!(entries(&log), vec!["start:server", "stop:server"]);
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let (kernel, log) = setup_kernel().await;
    let name = probe(&artifact("web"), "server");
    kernel.load_component(ComponentData::new(name.clone(), PROBE_TYPE)).await.unwrap();

    kernel.stop(&name).await.expect("stop while stopped");
    kernel.start(&name).await.unwrap();
    kernel.start(&name).await.expect("start while running");
    kernel.stop(&name).await.unwrap();
    kernel.stop(&name).await.unwrap();
    assert_eq!(entries(&log), vec!["start:server", "stop:server"]);
}

#[tokio::test]
async fn test_start_with_missing_dependency_stays_stopped() {
    let (kernel, log) = setup_kernel().await;
    let web = artifact("web");
    let db = probe(&web, "db");
    let app = probe(&web, "app");
    kernel.load_component(ComponentData::new(db.clone(), PROBE_TYPE)).await.unwrap();
    kernel
        .load_component(ComponentData::new(app.clone(), PROBE_TYPE).with_dependency(NameQuery::exact(&db)))
        .await
        .unwrap();

    let err = kernel.start(&app).await.unwrap_err();
    assert!(matches!(err, Error::MissingDependency { .. }), "got {:?}", err);
    assert_eq!(kernel.state(&app).await.unwrap(), State::Stopped);
    let reason = kernel.state_reason(&app).await.unwrap().expect("reason recorded");
    assert!(reason.contains("db"), "reason: {}", reason);
    assert!(entries(&log).is_empty());

    kernel.start(&db).await.unwrap();
    kernel.start(&app).await.expect("dependency now running");
    assert_eq!(kernel.state_reason(&app).await.unwrap(), None);
}

#[tokio::test]
async fn test_failed_start_hook_moves_to_failed() {
    let (kernel, log) = setup_kernel().await;
    let name = probe(&artifact("web"), "server");
    kernel
        .load_component(ComponentData::new(name.clone(), PROBE_TYPE).with_attribute("failStart", true))
        .await
        .unwrap();

    let err = kernel.start(&name).await.unwrap_err();
    assert!(matches!(err, Error::LifecycleFailure { .. }), "got {:?}", err);
    assert_eq!(kernel.state(&name).await.unwrap(), State::Failed);
    assert!(kernel.state_reason(&name).await.unwrap().unwrap().contains("refused to start"));
    assert!(kernel.instance(&name).await.unwrap().is_none());
    assert_eq!(entries(&log), vec!["start:server", "fail:server"]);

    // FAILED only leaves through retry or stop
    let err = kernel.start(&name).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { action: "start", state: State::Failed, .. }));
}

#[tokio::test]
async fn test_retry_after_fixing_attribute() {
    let (kernel, _log) = setup_kernel().await;
    let name = probe(&artifact("web"), "server");
    kernel
        .load_component(ComponentData::new(name.clone(), PROBE_TYPE).with_attribute("failStart", true))
        .await
        .unwrap();
    assert!(kernel.start(&name).await.is_err());

    // Only mutable attributes may change outside STOPPED
    let err = kernel.set_attribute(&name, "failStart", false).await.unwrap_err();
    assert!(matches!(err, Error::AttributeNotMutable { state: State::Failed, .. }));

    kernel.stop(&name).await.expect("FAILED -> STOPPED");
    assert_eq!(kernel.state(&name).await.unwrap(), State::Stopped);
    kernel.set_attribute(&name, "failStart", false).await.unwrap();
    kernel.start(&name).await.expect("start after fix");
    assert_eq!(kernel.state(&name).await.unwrap(), State::Running);
}

#[tokio::test]
async fn test_retry_only_from_failed() {
    let (kernel, _log) = setup_kernel().await;
    let name = probe(&artifact("web"), "server");
    kernel.load_component(ComponentData::new(name.clone(), PROBE_TYPE)).await.unwrap();

    let err = kernel.retry(&name).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { action: "retry", state: State::Stopped, .. }));

    kernel.start(&name).await.unwrap();
    kernel.stop(&name).await.unwrap();
    kernel
        .set_attribute(&name, "failStart", true)
        .await
        .unwrap();
    assert!(kernel.start(&name).await.is_err());
    // Still failing: retry runs the start hook again and fails again
    assert!(kernel.retry(&name).await.is_err());
    assert_eq!(kernel.state(&name).await.unwrap(), State::Failed);
}

#[tokio::test]
async fn test_failed_stop_hook_moves_to_failed() {
    let (kernel, log) = setup_kernel().await;
    let name = probe(&artifact("web"), "server");
    kernel
        .load_component(ComponentData::new(name.clone(), PROBE_TYPE).with_attribute("failStop", true))
        .await
        .unwrap();
    kernel.start(&name).await.unwrap();

    let err = kernel.stop(&name).await.unwrap_err();
    assert!(matches!(err, Error::LifecycleFailure { .. }));
    assert_eq!(kernel.state(&name).await.unwrap(), State::Failed);
    assert_eq!(entries(&log), vec!["start:server", "stop:server", "fail:server"]);

    kernel.stop(&name).await.expect("FAILED -> STOPPED");
    assert_eq!(kernel.state(&name).await.unwrap(), State::Stopped);
}

#[tokio::test]
async fn test_force_stop_ignores_hook_failure() {
    let (kernel, log) = setup_kernel().await;
    let name = probe(&artifact("web"), "server");
    kernel
        .load_component(ComponentData::new(name.clone(), PROBE_TYPE).with_attribute("failStop", true))
        .await
        .unwrap();
    kernel.start(&name).await.unwrap();

    kernel.force_stop(&name).await;
    assert_eq!(kernel.state(&name).await.unwrap(), State::Stopped);
    assert_eq!(entries(&log), vec!["start:server", "stop:server"]);

    // Unknown names are ignored
    kernel.force_stop(&probe(&artifact("web"), "ghost")).await;
}

#[tokio::test]
async fn test_references_resolve_at_start() {
    let (kernel, _log) = setup_kernel().await;
    let web = artifact("web");
    let db = probe(&web, "db");
    let app = probe(&web, "app");
    kernel.load_component(ComponentData::new(db.clone(), PROBE_TYPE)).await.unwrap();
    kernel
        .load_component(ComponentData::new(app.clone(), PROBE_TYPE).with_reference("peer", db.clone()))
        .await
        .unwrap();

    // Optional reference: a stopped target just resolves to nothing
    kernel.start(&app).await.unwrap();
    let proxy = kernel.create_proxy(app.clone(), Default::default()).await.unwrap();
    assert_eq!(proxy.invoke(|p: &Probe| p.peer().cloned()).await.unwrap(), None);

    kernel.stop(&app).await.unwrap();
    kernel.start(&db).await.unwrap();
    kernel.start(&app).await.unwrap();
    assert_eq!(proxy.invoke(|p: &Probe| p.peer().cloned()).await.unwrap(), Some(db));
    kernel.destroy_proxy(&proxy).unwrap();
}

#[tokio::test]
async fn test_mutable_attribute_reaches_running_instance() {
    let (kernel, log) = setup_kernel().await;
    let name = probe(&artifact("web"), "server");
    kernel
        .load_component(ComponentData::new(name.clone(), PROBE_TYPE).with_attribute("greeting", "hello"))
        .await
        .unwrap();
    kernel.start(&name).await.unwrap();

    kernel.set_attribute(&name, "greeting", "bonjour").await.unwrap();
    assert_eq!(kernel.get_attribute(&name, "greeting").await.unwrap(), json!("bonjour"));
    let proxy = kernel.create_scoped_proxy(name.clone(), Default::default()).await.unwrap();
    assert_eq!(proxy.invoke(|p: &Probe| p.greeting()).await.unwrap(), "bonjour");
    assert!(position(&log, "attr:server=\"bonjour\"") > position(&log, "start:server"));
}

#[tokio::test]
async fn test_attribute_callback_can_read_back_through_kernel() {
    let kernel = Kernel::new("test");
    let log = new_log();
    kernel.register_type(echo_type(log.clone())).await.unwrap();
    let name = probe(&artifact("web"), "echo");
    kernel
        .load_component(ComponentData::new(name.clone(), ECHO_TYPE).with_attribute("greeting", "hello"))
        .await
        .unwrap();
    kernel.start(&name).await.unwrap();

    kernel.set_attribute(&name, "greeting", "bonjour").await.expect("set while running");
    assert_eq!(entries(&log), vec![r#"greeting:"hello"->"bonjour""#]);
    assert_eq!(kernel.get_attribute(&name, "greeting").await.unwrap(), json!("bonjour"));
}

#[tokio::test]
async fn test_unregister_requires_stopped_component() {
    let (kernel, _log) = setup_kernel().await;
    let name = probe(&artifact("web"), "server");
    kernel.load_component(ComponentData::new(name.clone(), PROBE_TYPE)).await.unwrap();
    kernel.start(&name).await.unwrap();

    let err = kernel.registry().unregister(&name).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { action: "unregister", .. }), "got {:?}", err);
    assert!(kernel.is_loaded(&name).await);

    kernel.stop(&name).await.unwrap();
    kernel.registry().unregister(&name).await.expect("unregister stopped");
    assert!(kernel.start(&name).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_generation_counts_started_instances() {
    let (kernel, _log) = setup_kernel().await;
    let name = probe(&artifact("web"), "server");
    kernel.load_component(ComponentData::new(name.clone(), PROBE_TYPE)).await.unwrap();
    assert_eq!(kernel.generation(&name).await.unwrap(), 0);

    kernel.start(&name).await.unwrap();
    kernel.start(&name).await.unwrap();
    assert_eq!(kernel.generation(&name).await.unwrap(), 1);

    kernel.stop(&name).await.unwrap();
    kernel.start(&name).await.unwrap();
    assert_eq!(kernel.generation(&name).await.unwrap(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_start_racing_unload_never_outlives_it() {
    for _ in 0..50 {
        let kernel = Kernel::new("test");
        let log = new_log();
        kernel.register_type(slow_type(log.clone())).await.unwrap();
        let name = probe(&artifact("web"), "slow");
        kernel.load_component(ComponentData::new(name.clone(), SLOW_TYPE)).await.unwrap();
        kernel.start(&name).await.unwrap();

        let unload = tokio::spawn({
            let kernel = kernel.clone();
            let name = name.clone();
            async move { kernel.unload_component(&name).await }
        });
        tokio::time::sleep(Duration::from_micros(500)).await;
        let started = kernel.start(&name).await;
        unload.await.unwrap().expect("unload");

        if let Err(e) = started {
            assert!(e.is_not_found(), "got {:?}", e);
        }
        assert!(!kernel.is_loaded(&name).await);
        // Whatever instance was started last has been stopped
        assert_eq!(entries(&log).last().map(String::as_str), Some("stop"));
    }
}
