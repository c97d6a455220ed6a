use crate::lifecycle::State;
use crate::registry::component::ComponentData;
use crate::registry::query::NameQuery;
use crate::tests::integration::common::{
    PROBE_INTERFACE, PROBE_TYPE, Probe, artifact, entries, interfaces, probe, recording_listener, setup_kernel,
};

#[tokio::test]
async fn test_single_reference_binds_lowest_running_candidate() {
    let (kernel, _log) = setup_kernel().await;
    let web = artifact("web");
    let beta = probe(&web, "beta");
    let alpha = probe(&web, "alpha");
    let client = probe(&web, "client");
    for name in [&beta, &alpha] {
        kernel.load_component(ComponentData::new(name.clone(), PROBE_TYPE)).await.unwrap();
    }
    kernel
        .load_component(ComponentData::new(client.clone(), PROBE_TYPE).with_reference("peer", NameQuery::interface(PROBE_INTERFACE)))
        .await
        .unwrap();

    kernel.start(&client).await.unwrap();
    let proxy = kernel.create_proxy(client.clone(), Default::default()).await.unwrap();
    assert_eq!(proxy.get::<Probe>().await.unwrap().peer(), None, "nothing else was running");

    kernel.stop(&client).await.unwrap();
    kernel.start(&beta).await.unwrap();
    kernel.start(&alpha).await.unwrap();
    kernel.start(&client).await.unwrap();
    assert_eq!(proxy.get::<Probe>().await.unwrap().peer(), Some(&alpha));

    kernel.destroy_proxy(&proxy).unwrap();
}

#[tokio::test]
async fn test_monitor_filters_by_artifact_and_interface() {
    let (kernel, _log) = setup_kernel().await;
    let web = probe(&artifact("web"), "server");
    let db = probe(&artifact("db"), "pool");
    for name in [&web, &db] {
        kernel.load_component(ComponentData::new(name.clone(), PROBE_TYPE)).await.unwrap();
    }
    let (web_events, web_listener) = recording_listener();
    let (probe_events, probe_listener) = recording_listener();
    kernel
        .monitor()
        .add_listener(Some(NameQuery::any().with_artifact(artifact("web"))), web_listener)
        .await;
    kernel
        .monitor()
        .add_listener(Some(NameQuery::interface(PROBE_INTERFACE)), probe_listener)
        .await;

    kernel.start(&db).await.unwrap();
    kernel.start(&web).await.unwrap();

    let web_events = web_events.lock().unwrap().clone();
    assert_eq!(
        web_events.iter().map(|e| (e.from, e.to)).collect::<Vec<_>>(),
        vec![(State::Stopped, State::Starting), (State::Starting, State::Running)]
    );
    assert!(web_events.iter().all(|e| e.name == web));
    assert_eq!(probe_events.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn test_running_attribute_change_is_visible_through_proxy() {
    let (kernel, log) = setup_kernel().await;
    let name = probe(&artifact("web"), "server");
    kernel
        .load_component(ComponentData::new(name.clone(), PROBE_TYPE).with_attribute("greeting", "hello"))
        .await
        .unwrap();
    kernel.start(&name).await.unwrap();
    let proxy = kernel
        .create_scoped_proxy(name.clone(), interfaces(&[PROBE_INTERFACE]))
        .await
        .unwrap();

    kernel.set_attribute(&name, "greeting", "bonjour").await.unwrap();
    let greeting = proxy.invoke(|p: &Probe| p.greeting()).await.unwrap();
    assert_eq!(greeting, "bonjour");
    assert_eq!(kernel.get_attribute(&name, "greeting").await.unwrap(), "bonjour");
    assert!(entries(&log).contains(&"attr:server=\"bonjour\"".to_string()));

    drop(proxy);
    assert_eq!(kernel.proxies().live_count(), 0);
}
