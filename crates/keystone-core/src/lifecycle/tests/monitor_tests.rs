use std::sync::Arc;

use crate::lifecycle::State;
use crate::lifecycle::monitor::LifecycleEvent;
use crate::registry::component::ComponentData;
use crate::registry::query::NameQuery;
use crate::tests::integration::common::{PROBE_TYPE, artifact, probe, recording_listener, setup_kernel};

fn transitions(events: &[LifecycleEvent]) -> Vec<(State, State)> {
    events.iter().map(|e| (e.from, e.to)).collect()
}

#[tokio::test]
async fn test_listener_sees_every_transition_in_order() {
    let (kernel, _log) = setup_kernel().await;
    let (events, listener) = recording_listener();
    kernel.monitor().add_listener(None, listener).await;

    let name = probe(&artifact("web"), "server");
    kernel.load_component(ComponentData::new(name.clone(), PROBE_TYPE)).await.unwrap();
    kernel.start(&name).await.unwrap();
    kernel.stop(&name).await.unwrap();

    let events = events.lock().unwrap().clone();
    assert_eq!(
        transitions(&events),
        vec![
            (State::Stopped, State::Starting),
            (State::Starting, State::Running),
            (State::Running, State::Stopping),
            (State::Stopping, State::Stopped),
        ]
    );
    assert!(events.windows(2).all(|w| w[0].sequence < w[1].sequence));
    assert!(events.iter().all(|e| e.name == name));
}

#[tokio::test]
async fn test_listener_filter() {
    let (kernel, _log) = setup_kernel().await;
    let web = artifact("web");
    let watched = probe(&web, "watched");
    let ignored = probe(&web, "ignored");
    let (events, listener) = recording_listener();
    kernel
        .monitor()
        .add_listener(Some(NameQuery::exact(&watched)), listener)
        .await;

    for name in [&watched, &ignored] {
        kernel.load_component(ComponentData::new(name.clone(), PROBE_TYPE)).await.unwrap();
        kernel.start(name).await.unwrap();
    }

    let events = events.lock().unwrap().clone();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.name == watched));
}

#[tokio::test]
async fn test_remove_listener() {
    let (kernel, _log) = setup_kernel().await;
    let (events, listener) = recording_listener();
    let id = kernel.monitor().add_listener(None, Arc::clone(&listener)).await;
    assert!(kernel.monitor().remove_listener(id).await);
    assert!(!kernel.monitor().remove_listener(id).await);

    let name = probe(&artifact("web"), "server");
    kernel.load_component(ComponentData::new(name.clone(), PROBE_TYPE)).await.unwrap();
    kernel.start(&name).await.unwrap();
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_failure_is_reported() {
    let (kernel, _log) = setup_kernel().await;
    let (events, listener) = recording_listener();
    kernel.monitor().add_listener(None, listener).await;

    let name = probe(&artifact("web"), "server");
    kernel
        .load_component(ComponentData::new(name.clone(), PROBE_TYPE).with_attribute("failStart", true))
        .await
        .unwrap();
    let _ = kernel.start(&name).await;

    let events = events.lock().unwrap().clone();
    assert_eq!(
        transitions(&events),
        vec![(State::Stopped, State::Starting), (State::Starting, State::Failed)]
    );
}
