mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;
use switchyard_backend::RequestError;
use switchyard_engine::{Engine, EngineConfig, EngineError};

use common::{Recording, call, component, multi, registry, script};

fn engine() -> Engine {
  let (registry, _) = registry(false);
  Engine::with_registry(EngineConfig::default(), registry)
}

#[tokio::test]
async fn test_dispatch_is_concurrent_and_ordered() {
  let engine = engine();
  let mut sandbox = Recording::default();
  let components = vec![multi(vec![
    call("fetchUser", "http", 10),
    call("fetchOrders", "postgres", 50),
  ])];

  let outcome = engine.run_components(&mut sandbox, &components).await.unwrap();

  assert_eq!(sandbox.inserted.len(), 1);
  let (names, responses) = &sandbox.inserted[0];
  assert_eq!(names, &vec!["fetchUser".to_string(), "fetchOrders".to_string()]);
  assert_eq!(responses[0]["data"]["name"], json!("fetchUser"));
  assert_eq!(responses[1]["data"]["name"], json!("fetchOrders"));
  assert!(outcome.backend_time >= Duration::from_millis(50));
  assert!(outcome.backend_time < Duration::from_millis(150));
}

#[tokio::test]
async fn test_total_time_is_max_not_sum() {
  let engine = engine();
  let mut sandbox = Recording::default();
  let calls = (0..5).map(|i| call(&format!("call{i}"), "http", 100)).collect();

  let outcome = engine.run_components(&mut sandbox, &[multi(calls)]).await.unwrap();

  assert!(outcome.backend_time >= Duration::from_millis(100));
  assert!(outcome.backend_time < Duration::from_millis(400));
}

#[tokio::test]
async fn test_order_survives_shuffled_delays() {
  let engine = engine();
  let mut sandbox = Recording::default();
  let delays = [50, 5, 40, 0, 20];
  let calls = delays
    .iter()
    .enumerate()
    .map(|(i, ms)| call(&format!("call{i}"), "http", *ms))
    .collect();

  engine.run_components(&mut sandbox, &[multi(calls)]).await.unwrap();

  let (names, responses) = &sandbox.inserted[0];
  for (i, (name, response)) in names.iter().zip(responses).enumerate() {
    assert_eq!(name, &format!("call{i}"));
    assert_eq!(response["data"]["name"], json!(name));
  }
}

#[tokio::test]
async fn test_backend_error_is_isolated() {
  let engine = engine();
  let mut sandbox = Recording::default();
  let mut broken = call("broken", "http", 5);
  broken["remote_endpoint"]["data"]["fail"] = json!(true);
  let components = vec![multi(vec![call("before", "http", 20), broken, call("after", "postgres", 10)])];

  engine.run_components(&mut sandbox, &components).await.unwrap();

  let (_, responses) = &sandbox.inserted[0];
  assert_eq!(responses[0]["data"]["name"], json!("before"));
  assert_eq!(responses[1], json!({ "error": "broken failed" }));
  assert_eq!(responses[2]["data"]["name"], json!("after"));
}

#[tokio::test]
async fn test_payload_comes_from_call_object() {
  let engine = engine();
  let mut sandbox = Recording::default();
  sandbox.payloads.insert("users".to_string(), json!({ "id": 7 }));

  engine
    .run_components(&mut sandbox, &[multi(vec![call("users", "http", 0)])])
    .await
    .unwrap();

  assert_eq!(sandbox.inserted[0].1[0]["data"]["payload"], json!({ "id": 7 }));
}

#[tokio::test]
async fn test_negated_conditional() {
  let engine = engine();
  let negated = component(json!({
    "type": "script",
    "script": "body",
    "conditional": "  x ",
    "conditional_positive": false
  }));

  let mut falsy = Recording::default();
  let outcome = engine.run_components(&mut falsy, &[negated.clone()]).await.unwrap();
  assert_eq!(outcome.components_run, 1);
  assert_eq!(falsy.steps, vec!["cond:x", "run:body"]);

  let mut truthy = Recording::truthy(&["x"]);
  let outcome = engine.run_components(&mut truthy, &[negated]).await.unwrap();
  assert_eq!(outcome.components_run, 0);
  assert_eq!(truthy.steps, vec!["cond:x"]);
}

#[tokio::test]
async fn test_empty_conditional_always_runs() {
  let engine = engine();
  let mut sandbox = Recording::default();
  let outcome = engine
    .run_components(&mut sandbox, &[script("one"), script("two")])
    .await
    .unwrap();

  assert_eq!(outcome.components_run, 2);
  assert_eq!(sandbox.steps, vec!["run:one", "run:two"]);
}

#[tokio::test]
async fn test_hook_order() {
  let engine = engine();
  let mut sandbox = Recording::truthy(&["a?", "b?"]);
  let mut a = call("a", "http", 5);
  a["conditional"] = json!("a?");
  a["before"] = json!([{ "script": "a_before" }]);
  a["after"] = json!([{ "script": "a_after" }]);
  let mut b = call("b", "postgres", 1);
  b["conditional"] = json!("b?");
  b["before"] = json!([{ "script": "b_before" }]);
  b["after"] = json!([{ "script": "b_after" }]);
  let mut skipped = call("c", "http", 1);
  skipped["conditional"] = json!("c?");
  skipped["before"] = json!([{ "script": "c_before" }]);

  let components = vec![component(json!({
    "type": "multi",
    "calls": [a, b, skipped],
    "before": [{ "script": "component_before" }],
    "after": [{ "script": "component_after" }]
  }))];
  engine.run_components(&mut sandbox, &components).await.unwrap();

  assert_eq!(
    sandbox.steps,
    vec![
      "declare:a,b,c",
      "run:component_before",
      "cond:a?",
      "cond:b?",
      "cond:c?",
      "run:a_before",
      "run:b_before",
      "insert:a,b",
      "run:a_after",
      "run:b_after",
      "run:component_after",
    ]
  );
}

#[tokio::test]
async fn test_no_active_calls_dispatches_nothing() {
  let engine = engine();
  let mut sandbox = Recording::default();
  let mut inactive = call("inactive", "http", 5);
  inactive["conditional"] = json!("never");

  let outcome = engine
    .run_components(&mut sandbox, &[multi(vec![inactive])])
    .await
    .unwrap();

  assert!(sandbox.inserted.is_empty());
  assert_eq!(outcome.backend_time, Duration::ZERO);
}

#[tokio::test]
async fn test_stop_skips_after_and_remaining_components() {
  let engine = engine();
  let mut sandbox = Recording::default();
  let stopper = component(json!({
    "type": "script",
    "script": "stop",
    "before": [{ "script": "stop_before" }],
    "after": [{ "script": "stop_after" }]
  }));

  let outcome = engine
    .run_components(&mut sandbox, &[script("first"), stopper, script("never")])
    .await
    .unwrap();

  assert!(outcome.stopped);
  assert_eq!(outcome.components_run, 2);
  assert_eq!(sandbox.steps, vec!["run:first", "run:stop_before", "run:stop"]);
}

#[tokio::test]
async fn test_timeout_is_soft_and_closes_connections() {
  let (registry, sticky) = registry(false);
  let engine = Engine::with_registry(EngineConfig::default(), registry);
  let mut sandbox = Recording::default();
  let components = vec![
    multi(vec![call("directory", "ldap", 1), call("again", "ldap", 1)]),
    script("timeout"),
    script("never"),
  ];

  let outcome = engine.run_components(&mut sandbox, &components).await.unwrap();

  assert!(outcome.timed_out);
  assert!(!sandbox.steps.contains(&"run:never".to_string()));
  assert_eq!(sticky.opened.load(Ordering::SeqCst), 1);
  assert_eq!(sticky.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_build_error_aborts_and_closes_connections() {
  let (registry, sticky) = registry(false);
  let engine = Engine::with_registry(EngineConfig::default(), registry);
  let mut sandbox = Recording::default();
  let components = vec![
    multi(vec![call("directory", "ldap", 1)]),
    multi(vec![call("mail", "smtp", 1)]),
  ];

  let err = engine.run_components(&mut sandbox, &components).await.unwrap_err();

  assert!(matches!(err, EngineError::Request(RequestError::Configuration { .. })));
  assert_eq!(sticky.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_disabled_kind_is_rejected() {
  let (registry, _) = registry(false);
  let mut config = EngineConfig::default();
  config.remote_endpoints.enabled = vec![switchyard_model::RemoteEndpointType::Postgres];
  let engine = Engine::with_registry(config, registry);
  let mut sandbox = Recording::default();

  let err = engine
    .run_components(&mut sandbox, &[multi(vec![call("users", "http", 1)])])
    .await
    .unwrap_err();

  assert!(err.to_string().contains("not enabled"));
}

#[tokio::test]
async fn test_script_error_propagates() {
  let engine = engine();
  let mut sandbox = Recording::default();
  let err = engine
    .run_components(&mut sandbox, &[script("fail"), script("never")])
    .await
    .unwrap_err();

  assert!(matches!(err, EngineError::Script(_)));
  assert!(!err.is_timeout());
}

#[tokio::test]
async fn test_call_without_remote_endpoint() {
  let engine = engine();
  let mut sandbox = Recording::default();
  let components = vec![multi(vec![json!({ "endpoint_name_override": "orphan" })])];

  let err = engine.run_components(&mut sandbox, &components).await.unwrap_err();
  assert!(matches!(err, EngineError::Configuration { .. }));
}

#[tokio::test]
async fn test_invalid_call_name() {
  let engine = engine();
  let mut sandbox = Recording::default();
  let components = vec![multi(vec![call("not a name", "http", 1)])];

  let err = engine.run_components(&mut sandbox, &components).await.unwrap_err();
  assert!(matches!(err, EngineError::Configuration { .. }));
  assert!(sandbox.steps.is_empty());
}

#[tokio::test]
async fn test_close_failure_after_success() {
  let (registry, sticky) = registry(true);
  let engine = Engine::with_registry(EngineConfig::default(), registry);
  let mut sandbox = Recording::default();

  let err = engine
    .run_components(&mut sandbox, &[multi(vec![call("directory", "ldap", 1)])])
    .await
    .unwrap_err();

  assert!(matches!(err, EngineError::ConnectionClose(_)));
  assert_eq!(sticky.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_close_failure_keeps_original_error() {
  let (registry, _) = registry(true);
  let engine = Engine::with_registry(EngineConfig::default(), registry);
  let mut sandbox = Recording::default();
  let components = vec![multi(vec![call("directory", "ldap", 1)]), script("fail")];

  let err = engine.run_components(&mut sandbox, &components).await.unwrap_err();
  assert!(matches!(err, EngineError::Script(_)));
}

#[tokio::test]
async fn test_shared_component_runs_in_place() {
  let engine = engine();
  let mut sandbox = Recording::default();
  let reference = component(json!({
    "type": "script",
    "script": "ignored",
    "shared_component": { "type": "script", "script": "shared" }
  }));

  engine.run_components(&mut sandbox, &[reference]).await.unwrap();
  assert_eq!(sandbox.steps, vec!["run:shared"]);
}
