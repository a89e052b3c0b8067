use serde::{Deserialize, Serialize};

use crate::call::{Call, default_true};

/// A script snippet run before or after a component or call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transformation {
  pub script: String,
}

impl Transformation {
  pub fn new(script: impl Into<String>) -> Self {
    Self {
      script: script.into(),
    }
  }
}

/// What a component does when its conditional passes.
///
/// Exactly one of "run calls" or "run raw script" executes per component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComponentKind {
  Single {
    call: Call,
  },
  Multi {
    calls: Vec<Call>,
  },
  #[serde(alias = "js")]
  Script {
    script: String,
  },
}

/// A node in a proxy endpoint's execution tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
  #[serde(default)]
  pub id: i64,
  #[serde(flatten)]
  pub kind: ComponentKind,
  #[serde(default)]
  pub conditional: String,
  #[serde(default = "default_true")]
  pub conditional_positive: bool,
  #[serde(default)]
  pub before: Vec<Transformation>,
  #[serde(default)]
  pub after: Vec<Transformation>,
  /// When set, this component is a reference and the shared definition runs
  /// in its place.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub shared_component: Option<Box<Component>>,
}

impl Component {
  /// Follow the shared-component indirection, if any.
  pub fn resolve(&self) -> &Component {
    match &self.shared_component {
      Some(shared) => shared,
      None => self,
    }
  }

  /// All calls of a `Single` or `Multi` component as one list.
  pub fn calls(&self) -> &[Call] {
    match &self.kind {
      ComponentKind::Single { call } => std::slice::from_ref(call),
      ComponentKind::Multi { calls } => calls,
      ComponentKind::Script { .. } => &[],
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_single_component_flattens_calls() {
    let component: Component = serde_json::from_value(json!({
      "type": "single",
      "call": { "endpoint_name_override": "users" },
      "conditional": "request.method == 'GET'"
    }))
    .unwrap();

    assert!(component.conditional_positive);
    assert_eq!(component.calls().len(), 1);
    assert_eq!(component.calls()[0].name().unwrap(), "users");
  }

  #[test]
  fn test_script_component_accepts_js_alias() {
    let component: Component = serde_json::from_value(json!({
      "type": "js",
      "script": "return stop"
    }))
    .unwrap();

    assert!(matches!(component.kind, ComponentKind::Script { ref script } if script == "return stop"));
    assert!(component.calls().is_empty());
  }

  #[test]
  fn test_resolve_follows_shared_component() {
    let component: Component = serde_json::from_value(json!({
      "type": "multi",
      "calls": [],
      "shared_component": {
        "type": "script",
        "script": "response.body = 'shared'"
      }
    }))
    .unwrap();

    assert!(matches!(component.resolve().kind, ComponentKind::Script { .. }));
  }
}
