mod common;

use common::{journal, registry, Journal};
use flowgraph::{build_flow, BasicService, Flow, ServiceRegistry, DEFAULT_START_TIMEOUT};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use stepcore::{
    DefinitionError, Endpoint, EndpointError, FlowDefinition, JsonOptions, Step, StepError,
    StepState,
};

fn definition(value: serde_json::Value) -> FlowDefinition {
    let mut definition: FlowDefinition = serde_json::from_value(value).unwrap();
    definition.name = "test".into();
    definition
}

fn build(journal: &Journal, services: &ServiceRegistry, value: serde_json::Value) -> Flow {
    build_flow(&definition(value), &registry(journal), services).unwrap()
}

fn build_err(value: serde_json::Value) -> DefinitionError {
    build_flow(&definition(value), &registry(&journal()), &ServiceRegistry::new())
        .err()
        .expect("construction should fail")
}

fn endpoint(flow: &Flow, step: &str, name: &str) -> Arc<Endpoint> {
    flow.step(step).unwrap().endpoint(name).unwrap().clone()
}

#[tokio::test]
async fn test_slash_and_dot_references_bind_the_same_endpoint() {
    for expression in ["a/in", "a.in"] {
        let flow = build(
            &journal(),
            &ServiceRegistry::new(),
            json!({
                "steps": {
                    "b": { "type": "record", "endpoints": { "out": expression } },
                    "a": { "type": "record" }
                }
            }),
        );
        let out = endpoint(&flow, "b", "out");
        let target = out.connected_to().expect("connected");
        assert!(Arc::ptr_eq(&target, &endpoint(&flow, "a", "in")), "{expression}");
        assert_eq!(out.target_expression().as_deref(), Some(expression));
    }
}

#[tokio::test]
async fn test_definition_round_trips_through_json() {
    let flow = build(
        &journal(),
        &ServiceRegistry::new(),
        json!({
            "steps": {
                "a": { "type": "record" },
                "b": { "type": "record", "endpoints": { "out": "a/in" } }
            }
        }),
    );

    let json = flow.to_json_with_options(&JsonOptions::default());
    assert_eq!(
        json,
        json!({
            "type": "flow",
            "steps": {
                "a": { "type": "record" },
                "b": { "type": "record", "endpoints": { "out": "a/in" } }
            }
        })
    );

    let rebuilt = build(&journal(), &ServiceRegistry::new(), json.clone());
    assert_eq!(rebuilt.to_json_with_options(&JsonOptions::default()), json);
}

#[tokio::test]
async fn test_runtime_info_and_defaults_in_json() {
    let flow = build(
        &journal(),
        &ServiceRegistry::new(),
        json!({ "steps": { "a": { "type": "record" } } }),
    );
    let json = flow.to_json_with_options(&JsonOptions::all());

    assert_eq!(json["name"], "test");
    assert_eq!(json["state"], "stopped");
    assert_eq!(json["description"], "General step collection");
    assert_eq!(json["steps"]["a"]["state"], "stopped");
    assert!(json["steps"]["a"]["endpoints"]["in"].is_object());
}

#[tokio::test]
async fn test_mandatory_missing_service_blocks_start() {
    let journal = journal();
    let services = ServiceRegistry::new();
    let flow = build(
        &journal,
        &services,
        json!({
            "steps": {
                "b": { "type": "record", "endpoints": { "out": "service(cfg).in" } }
            }
        }),
    );
    assert_eq!(flow.pending_services(), vec!["cfg".to_string()]);

    let err = flow.start_within(Duration::from_millis(50)).await.unwrap_err();
    match &err {
        StepError::StartTimeout { pending, .. } => assert_eq!(pending, &vec!["cfg".to_string()]),
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("cfg"));
    assert_eq!(flow.state(), StepState::Stopped);
    assert!(common::entries(&journal).is_empty());
}

#[tokio::test]
async fn test_plain_start_gives_up_after_the_start_timeout() {
    let journal = journal();
    let services = ServiceRegistry::new();
    let mut flow = build(
        &journal,
        &services,
        json!({
            "steps": {
                "b": { "type": "record", "endpoints": { "out": "service(cfg).in" } }
            }
        }),
    );
    assert_eq!(flow.start_timeout(), DEFAULT_START_TIMEOUT);
    flow.set_start_timeout(Duration::from_millis(50));

    let err = flow.start().await.unwrap_err();
    assert!(matches!(err, StepError::StartTimeout { .. }), "{err}");
    assert!(err.to_string().contains("cfg"), "{err}");
    assert_eq!(flow.state(), StepState::Stopped);
    assert!(common::entries(&journal).is_empty());
}

fn waiting_for_cfg() -> serde_json::Value {
    json!({
        "steps": {
            "b": { "type": "record", "endpoints": { "out": "service(cfg).in" } }
        }
    })
}

#[tokio::test]
async fn test_dropped_flow_stops_waiting_for_services() {
    let services = ServiceRegistry::new();
    let flow = build(&journal(), &services, waiting_for_cfg());
    let out = endpoint(&flow, "b", "out");
    drop(flow);

    let (inbox, _messages) = Endpoint::receiving("in", "cfg");
    services.register(Arc::new(BasicService::new("cfg").with_endpoint(inbox)));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(!out.is_connected());
}

#[tokio::test]
async fn test_failed_build_leaves_service_links_alone() {
    let services = ServiceRegistry::new();
    let live = build(&journal(), &services, waiting_for_cfg());

    let failed = build_flow(
        &definition(json!({
            "steps": {
                "b": { "type": "record", "endpoints": { "out": "service(cfg).in" } },
                "c": { "type": "record", "endpoints": { "out": "ghost/in" } }
            }
        })),
        &registry(&journal()),
        &services,
    );
    assert!(failed.is_err());

    let (inbox, _messages) = Endpoint::receiving("in", "cfg");
    services.register(Arc::new(BasicService::new("cfg").with_endpoint(inbox)));
    live.start_within(Duration::from_secs(5)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let cfg = services.lookup("cfg").unwrap();
    let cfg_in = cfg.endpoints().get("in").unwrap();
    let linked = cfg_in.connected_to().expect("service endpoint connected");
    assert!(Arc::ptr_eq(&linked, &endpoint(&live, "b", "out")));
}

#[tokio::test]
async fn test_service_registered_later_is_connected_before_start() {
    let services = ServiceRegistry::new();
    let flow = build(
        &journal(),
        &services,
        json!({
            "steps": {
                "b": { "type": "record", "endpoints": { "out": "service(cfg).in" } }
            }
        }),
    );
    assert!(!endpoint(&flow, "b", "out").is_connected());

    let (inbox, mut messages) = Endpoint::receiving("in", "cfg");
    services.register(Arc::new(BasicService::new("cfg").with_endpoint(inbox)));

    flow.start_within(Duration::from_secs(5)).await.unwrap();
    assert!(flow.outstanding_connections().iter().all(|c| c.is_complete()));
    assert!(flow.pending_services().is_empty());

    endpoint(&flow, "b", "out").send(json!({ "hello": "cfg" })).unwrap();
    assert_eq!(messages.recv().await, Some(json!({ "hello": "cfg" })));
}

#[tokio::test]
async fn test_present_service_connects_during_construction() {
    let services = ServiceRegistry::new();
    let (inbox, _messages) = Endpoint::receiving("in", "cfg");
    services.register(Arc::new(BasicService::new("cfg").with_endpoint(inbox)));

    // legacy colon notation still names a service
    let flow = build(
        &journal(),
        &services,
        json!({ "steps": { "b": { "type": "record", "endpoints": { "out": "cfg:in" } } } }),
    );
    assert!(endpoint(&flow, "b", "out").is_connected());
    assert!(flow.outstanding_connections().is_empty());
}

#[tokio::test]
async fn test_optional_missing_service_drops_the_endpoint() {
    let flow = build(
        &journal(),
        &ServiceRegistry::new(),
        json!({
            "steps": {
                "b": {
                    "type": "record",
                    "endpoints": { "out": { "target": "service(missing).x", "mandatory": false } }
                }
            }
        }),
    );
    let b = flow.step("b").unwrap();
    assert!(b.endpoint("out").is_none());
    assert!(b.endpoint("in").is_some());

    flow.start().await.unwrap();
}

#[tokio::test]
async fn test_unresolvable_targets_fail_construction() {
    let err = build_err(json!({
        "steps": { "b": { "type": "record", "endpoints": { "out": "ghost/in" } } }
    }));
    assert!(matches!(err, DefinitionError::UnresolvedTarget { .. }), "{err}");

    // out -> out
    let err = build_err(json!({
        "steps": {
            "a": { "type": "record" },
            "b": { "type": "record", "endpoints": { "out": "a/out" } }
        }
    }));
    assert!(matches!(err, DefinitionError::UnresolvedTarget { .. }), "{err}");

    let err = build_err(json!({
        "steps": { "b": { "type": "record", "endpoints": { "out": "a//in" } } }
    }));
    assert!(err.to_string().contains("Malformed"), "{err}");
}

#[tokio::test]
async fn test_endpoint_declared_in_definition_is_created() {
    let flow = build(
        &journal(),
        &ServiceRegistry::new(),
        json!({
            "steps": {
                "a": { "type": "record" },
                "b": {
                    "type": "record",
                    "endpoints": { "extra": { "out": true, "target": "a/in" } }
                }
            }
        }),
    );
    let extra = endpoint(&flow, "b", "extra");
    assert!(!extra.is_default());
    assert!(extra.is_connected());
}

#[tokio::test]
async fn test_flow_endpoint_forwards_to_child() {
    let flow = build(
        &journal(),
        &ServiceRegistry::new(),
        json!({
            "endpoints": { "input": "a/in" },
            "steps": { "a": { "type": "record" } }
        }),
    );
    let input = flow.endpoint("input").unwrap();
    assert!(!input.is_proxy());
    assert!(Arc::ptr_eq(input, &endpoint(&flow, "a", "in")));
}

#[tokio::test]
async fn test_child_back_reference_replaces_the_proxy() {
    for expression in ["flow:input", "input", "test/input"] {
        let flow = build(
            &journal(),
            &ServiceRegistry::new(),
            json!({
                "endpoints": { "input": { "in": true } },
                "steps": { "a": { "type": "record", "endpoints": { "in": expression } } }
            }),
        );
        let input = flow.endpoint("input").unwrap();
        assert!(Arc::ptr_eq(input, &endpoint(&flow, "a", "in")), "{expression}");
    }
}

#[tokio::test]
async fn test_back_reference_to_a_targeted_proxy_connects_through_it() {
    for expression in ["flow:out", "out", "test/out"] {
        let flow = build(
            &journal(),
            &ServiceRegistry::new(),
            json!({
                "endpoints": { "out": "a/out" },
                "steps": {
                    "a": { "type": "record" },
                    "b": { "type": "record", "endpoints": { "in": expression } }
                }
            }),
        );
        let a_out = endpoint(&flow, "a", "out");
        let b_in = endpoint(&flow, "b", "in");

        assert!(Arc::ptr_eq(flow.endpoint("out").unwrap(), &a_out), "{expression}");
        assert!(Arc::ptr_eq(&b_in.connected_to().unwrap(), &a_out), "{expression}");
        assert!(Arc::ptr_eq(&a_out.connected_to().unwrap(), &b_in), "{expression}");
        assert_eq!(b_in.target_expression().as_deref(), Some(expression));
    }

    // the proxy's own target cannot be resolved, so neither can the reference
    let err = build_err(json!({
        "endpoints": { "out": { "out": true, "target": "ghost/out", "default": true } },
        "steps": { "b": { "type": "record", "endpoints": { "in": "flow:out" } } }
    }));
    assert!(matches!(err, DefinitionError::UnresolvedTarget { .. }), "{err}");
}

#[tokio::test]
async fn test_unbacked_flow_endpoints() {
    let err = build_err(json!({
        "endpoints": { "input": { "in": true } },
        "steps": { "a": { "type": "record" } }
    }));
    assert!(matches!(err, DefinitionError::DanglingProxy { .. }), "{err}");

    let err = build_err(json!({
        "endpoints": { "input": "ghost/in" },
        "steps": { "a": { "type": "record" } }
    }));
    assert!(matches!(err, DefinitionError::UnresolvedProxy { .. }), "{err}");

    let err = build_err(json!({
        "endpoints": { "input": { "out": true, "target": "a/in" } },
        "steps": { "a": { "type": "record" } }
    }));
    assert!(matches!(err, DefinitionError::UnresolvedProxy { .. }), "{err}");

    // a default proxy may stay unresolved, but nothing can go through it
    let flow = build(
        &journal(),
        &ServiceRegistry::new(),
        json!({
            "endpoints": { "input": { "in": true, "default": true } },
            "steps": { "a": { "type": "record" } }
        }),
    );
    let input = flow.endpoint("input").unwrap().clone();
    assert!(input.is_proxy());
    let source = Arc::new(Endpoint::sending("out", "outside"));
    assert!(matches!(
        source.connect(&input),
        Err(EndpointError::Proxy { .. })
    ));
}

#[tokio::test]
async fn test_definition_errors() {
    let err = build_err(json!({}));
    assert!(matches!(err, DefinitionError::NoSteps { .. }), "{err}");

    let err = build_err(json!({ "steps": {} }));
    assert!(matches!(err, DefinitionError::EmptySteps { .. }), "{err}");

    let err = build_err(json!({ "steps": { "a": {} } }));
    assert!(matches!(err, DefinitionError::MissingStepType { .. }), "{err}");

    let err = build_err(json!({ "steps": { "a": { "type": "nope" } } }));
    assert!(matches!(err, DefinitionError::UnknownStepType { .. }), "{err}");

    let err = build_err(json!({
        "steps": { "a": { "type": "record" } },
        "inbound_steps": ["b"]
    }));
    assert!(matches!(err, DefinitionError::UnknownInboundStep { .. }), "{err}");
}
