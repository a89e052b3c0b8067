use std::time::{Duration, Instant};

use serde_json::json;
use switchyard_sandbox::{Sandbox, SandboxError};
use switchyard_sandbox_lua::LuaSandbox;

fn names(list: &[&str]) -> Vec<String> {
  list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_conditions_follow_lua_truthiness() {
  let mut sandbox = LuaSandbox::new().unwrap();
  sandbox.set("request", &json!({ "method": "GET", "count": 0 })).unwrap();

  assert!(sandbox.evaluate_condition("request.method == 'GET'").unwrap());
  assert!(!sandbox.evaluate_condition("request.method == 'POST'").unwrap());
  // 0 is truthy in Lua
  assert!(sandbox.evaluate_condition("request.count").unwrap());
  assert!(!sandbox.evaluate_condition("request.missing").unwrap());
}

#[test]
fn test_run_returns_json_and_keeps_state() {
  let mut sandbox = LuaSandbox::new().unwrap();
  sandbox.run("total = 40").unwrap();
  let value = sandbox.run("total + 2").unwrap();
  assert_eq!(value, json!(42));

  sandbox.run("response = { statusCode = 201, body = 'ok' }").unwrap();
  assert_eq!(
    sandbox.get("response").unwrap(),
    json!({ "statusCode": 201, "body": "ok" })
  );
  assert_eq!(sandbox.get("nothing").unwrap(), serde_json::Value::Null);
}

#[test]
fn test_run_with_stop() {
  let mut sandbox = LuaSandbox::new().unwrap();

  let (_, stopped) = sandbox.run_with_stop("if true then return stop end").unwrap();
  assert!(stopped);

  let (value, stopped) = sandbox.run_with_stop("local x = 1\nreturn x + 1").unwrap();
  assert!(!stopped);
  assert_eq!(value, json!(2));

  // A look-alike table is not the stop signal.
  let (_, stopped) = sandbox.run_with_stop("return {}").unwrap();
  assert!(!stopped);
}

#[test]
fn test_script_errors_are_reported() {
  let mut sandbox = LuaSandbox::new().unwrap();
  let err = sandbox.run("error('boom')").unwrap_err();
  assert!(matches!(err, SandboxError::Script { ref message } if message.contains("boom")));
  assert!(!err.is_timeout());
}

#[test]
fn test_os_library_is_not_available() {
  let mut sandbox = LuaSandbox::new().unwrap();
  assert!(!sandbox.evaluate_condition("os ~= nil").unwrap());
  assert!(!sandbox.evaluate_condition("io ~= nil").unwrap());
}

#[test]
fn test_infinite_loop_hits_budget() {
  let mut sandbox = LuaSandbox::with_budget(Duration::from_millis(50)).unwrap();
  let started = Instant::now();
  let err = sandbox.run("while true do end").unwrap_err();
  assert!(err.is_timeout());
  assert!(started.elapsed() < Duration::from_secs(2));

  // The budget is spent; later scripts fail immediately.
  assert!(sandbox.run("1 + 1").unwrap_err().is_timeout());
}

#[test]
fn test_time_outside_lua_is_not_charged() {
  let mut sandbox = LuaSandbox::with_budget(Duration::from_millis(100)).unwrap();
  sandbox.run("x = 1").unwrap();
  std::thread::sleep(Duration::from_millis(150));
  assert_eq!(sandbox.run("x").unwrap(), json!(1));
}

#[test]
fn test_declare_calls_is_idempotent() {
  let mut sandbox = LuaSandbox::new().unwrap();
  sandbox.declare_calls(&names(&["fetchUser"])).unwrap();
  sandbox.run("fetchUser.request = { url = 'http://users' }").unwrap();
  sandbox.declare_calls(&names(&["fetchUser", "fetchOrders"])).unwrap();

  let requests = sandbox
    .prepare_raw_requests(&names(&["fetchUser", "fetchOrders", "undeclared"]))
    .unwrap();
  assert_eq!(requests, vec![json!({ "url": "http://users" }), json!({}), json!({})]);
}

#[test]
fn test_declare_calls_rejects_invalid_names() {
  let mut sandbox = LuaSandbox::new().unwrap();
  let err = sandbox.declare_calls(&names(&["ok", "not ok"])).unwrap_err();
  assert!(matches!(err, SandboxError::InvalidName { ref name } if name == "not ok"));
}

#[test]
fn test_insert_responses_in_order() {
  let mut sandbox = LuaSandbox::new().unwrap();
  sandbox.declare_calls(&names(&["fetchUser", "fetchOrders"])).unwrap();
  sandbox
    .insert_responses(
      &names(&["fetchUser", "fetchOrders"]),
      &[
        json!({ "statusCode": 200, "body": "]]user" }),
        json!({ "data": [{ "id": 1 }] }),
      ],
    )
    .unwrap();

  assert_eq!(sandbox.run("fetchUser.response.body").unwrap(), json!("]]user"));
  assert_eq!(sandbox.run("fetchOrders.response.data[1].id").unwrap(), json!(1));
}

#[test]
fn test_insert_plain_responses() {
  let mut sandbox = LuaSandbox::new().unwrap();
  sandbox.declare_calls(&names(&["fetchUser"])).unwrap();
  sandbox
    .insert_responses(&names(&["fetchUser"]), &[json!({ "data": 1 })])
    .unwrap();

  assert_eq!(sandbox.run("fetchUser.response.data").unwrap(), json!(1));
}

#[test]
fn test_call_objects_survive_json_export() {
  let mut sandbox = LuaSandbox::new().unwrap();
  sandbox.declare_calls(&names(&["lookup"])).unwrap();
  sandbox.run("lookup.request = { method = 'GET' }").unwrap();
  assert_eq!(
    sandbox.get("lookup").unwrap(),
    json!({ "request": { "method": "GET" } })
  );
}

#[test]
fn test_log_is_callable() {
  let mut sandbox = LuaSandbox::new().unwrap();
  sandbox.run("log('hello', 1, true, nil)").unwrap();
}
