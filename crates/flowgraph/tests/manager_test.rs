mod common;

use common::{entries, journal, manager, registry};
use flowgraph::{
    load_flows, load_flows_from_str, FlowManager, ManagerConfig, DEFAULT_START_TIMEOUT,
};
use std::time::Duration;
use serde_json::json;
use stepcore::{
    parse_flows, DefinitionError, FlowError, LifecycleEvent, Step, StepError, StepState,
};

fn document(value: serde_json::Value) -> String {
    value.to_string()
}

#[tokio::test]
async fn test_autostart_flows_start_on_registration() {
    let journal = journal();
    let manager = manager(&journal);
    let mut events = manager.subscribe_events();

    load_flows_from_str(
        &manager,
        &document(json!({
            "auto": { "autostart": true, "steps": { "a": { "type": "record" } } },
            "manual": { "steps": { "b": { "type": "record" } } }
        })),
    )
    .await
    .unwrap();

    assert_eq!(manager.flow("auto").await.unwrap().state(), StepState::Running);
    assert_eq!(manager.flow("manual").await.unwrap().state(), StepState::Stopped);

    let first = events.recv().await.unwrap();
    assert!(matches!(first, LifecycleEvent::FlowRegistered { ref flow, .. } if flow == "auto"));
    let second = events.recv().await.unwrap();
    assert!(matches!(
        second,
        LifecycleEvent::FlowStateChanged { state: StepState::Running, .. }
    ));
}

#[tokio::test]
async fn test_autostart_can_be_disabled() {
    let journal = journal();
    let config = ManagerConfig {
        honor_autostart: false,
        ..Default::default()
    };
    let manager = FlowManager::with_registry(registry(&journal), config);
    load_flows_from_str(
        &manager,
        &document(json!({ "auto": { "autostart": true, "steps": { "a": { "type": "record" } } } })),
    )
    .await
    .unwrap();

    assert_eq!(manager.flow("auto").await.unwrap().state(), StepState::Stopped);
    assert!(entries(&journal).is_empty());
}

#[tokio::test]
async fn test_failing_batch_registers_nothing() {
    let journal = journal();
    let manager = manager(&journal);

    let err = load_flows_from_str(
        &manager,
        &document(json!({
            "good": { "steps": { "a": { "type": "record" } } },
            "bad": { "steps": { "a": { "type": "nope" } } }
        })),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        FlowError::Definition(DefinitionError::UnknownStepType { .. })
    ));
    assert!(manager.flow_names().await.is_empty());
    assert!(!manager.has_step_type("good"));
}

#[tokio::test]
async fn test_failing_autostart_unregisters_the_batch() {
    let journal = journal();
    let config = ManagerConfig {
        start_timeout_ms: 50,
        ..Default::default()
    };
    let manager = FlowManager::with_registry(registry(&journal), config);

    let err = load_flows_from_str(
        &manager,
        &document(json!({
            "first": { "autostart": true, "steps": { "a": { "type": "record" } } },
            "waiting": {
                "autostart": true,
                "steps": { "b": { "type": "record", "endpoints": { "out": "service(cfg).in" } } }
            }
        })),
    )
    .await
    .unwrap_err();

    match err {
        FlowError::Step(StepError::StartTimeout { pending, .. }) => {
            assert_eq!(pending, vec!["cfg".to_string()])
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(manager.flow_names().await.is_empty());
    assert!(!manager.has_step_type("first"));
    assert!(entries(&journal).contains(&"stopped:a".to_string()));
}

#[tokio::test]
async fn test_flow_names_are_unique() {
    let journal = journal();
    let manager = manager(&journal);
    let json = document(json!({ "dup": { "steps": { "a": { "type": "record" } } } }));

    load_flows_from_str(&manager, &json).await.unwrap();
    let err = load_flows_from_str(&manager, &json).await.unwrap_err();

    assert!(matches!(err, FlowError::FlowExists(ref name) if name == "dup"));
    assert_eq!(manager.flow_names().await, vec!["dup"]);
    // the first load's step type survives the failed second load
    assert!(manager.has_step_type("dup"));
}

#[tokio::test]
async fn test_empty_document_is_rejected() {
    let manager = manager(&journal());
    let err = load_flows(&manager, parse_flows("{}").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Definition(DefinitionError::Empty)));
}

#[tokio::test]
async fn test_unregister_stops_and_removes() {
    let journal = journal();
    let manager = manager(&journal);
    load_flows_from_str(
        &manager,
        &document(json!({ "live": { "autostart": true, "steps": { "a": { "type": "record" } } } })),
    )
    .await
    .unwrap();
    let live = manager.flow("live").await.unwrap();

    manager.unregister_flow("live").await.unwrap();

    assert_eq!(live.state(), StepState::Removed);
    assert!(manager.flow("live").await.is_none());
    let log = entries(&journal);
    assert!(log.contains(&"stopped:a".to_string()));
    assert!(log.contains(&"remove:a".to_string()));

    let err = manager.unregister_flow("live").await.unwrap_err();
    assert!(matches!(err, FlowError::FlowNotFound(_)));
}

#[tokio::test]
async fn test_unregister_removes_even_when_stop_fails() {
    let journal = journal();
    let manager = manager(&journal);
    load_flows_from_str(
        &manager,
        &document(json!({
            "stubborn": {
                "autostart": true,
                "steps": { "a": { "type": "record", "fail_stop": true } }
            }
        })),
    )
    .await
    .unwrap();
    let stubborn = manager.flow("stubborn").await.unwrap();

    let err = manager.unregister_flow("stubborn").await.unwrap_err();
    assert!(
        matches!(err, FlowError::Step(ref e) if matches!(e.root(), StepError::StopFailed { .. })),
        "{err}"
    );
    assert_eq!(stubborn.state(), StepState::Removed);
    assert!(entries(&journal).contains(&"remove:a".to_string()));
    assert!(manager.flow("stubborn").await.is_none());
}

#[tokio::test]
async fn test_registered_flows_take_the_configured_start_timeout() {
    assert_eq!(
        ManagerConfig::default().start_timeout_ms,
        DEFAULT_START_TIMEOUT.as_millis() as u64
    );

    let journal = journal();
    let config = ManagerConfig {
        start_timeout_ms: 50,
        ..Default::default()
    };
    let manager = FlowManager::with_registry(registry(&journal), config);
    load_flows_from_str(
        &manager,
        &document(json!({ "quick": { "steps": { "a": { "type": "record" } } } })),
    )
    .await
    .unwrap();

    let quick = manager.flow("quick").await.unwrap();
    assert_eq!(quick.start_timeout(), Duration::from_millis(50));
}

#[tokio::test]
async fn test_shutdown_stops_running_flows() {
    let journal = journal();
    let manager = manager(&journal);
    load_flows_from_str(
        &manager,
        &document(json!({
            "one": { "autostart": true, "steps": { "a": { "type": "record" } } },
            "two": { "autostart": true, "steps": { "b": { "type": "record" } } },
            "idle": { "steps": { "c": { "type": "record" } } }
        })),
    )
    .await
    .unwrap();

    manager.shutdown().await.unwrap();

    for name in ["one", "two", "idle"] {
        assert_eq!(manager.flow(name).await.unwrap().state(), StepState::Stopped, "{name}");
    }
    assert!(!entries(&journal).contains(&"stop:c".to_string()));
}
