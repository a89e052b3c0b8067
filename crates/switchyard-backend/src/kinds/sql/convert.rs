//! Typed parameter conversion.
//!
//! Scripts cannot always produce the exact numeric type a driver expects, so
//! a parameter may be wrapped as
//! `{"_type": "Converter", "convertTo": "int64", "value": "0x1f"}` and is
//! normalised before binding.

use serde_json::{Number, Value};

use crate::RequestError;

const CONVERTER_TAG: &str = "Converter";

/// Replace every converter object in `parameters` with its converted value.
pub fn normalize_parameters(parameters: &[Value]) -> Result<Vec<Value>, RequestError> {
  parameters.iter().map(normalize).collect()
}

fn normalize(parameter: &Value) -> Result<Value, RequestError> {
  let Some(fields) = parameter.as_object() else {
    return Ok(parameter.clone());
  };
  if fields.get("_type").and_then(Value::as_str) != Some(CONVERTER_TAG) {
    return Ok(parameter.clone());
  }

  let target = fields
    .get("convertTo")
    .and_then(Value::as_str)
    .filter(|target| !target.is_empty())
    .ok_or_else(|| RequestError::validation("No 'convertTo' specified"))?;
  let value = fields
    .get("value")
    .filter(|value| !value.is_null())
    .ok_or_else(|| RequestError::validation("No 'value' specified"))?;

  match target {
    "int64" => to_int64(value).map(Value::from),
    "float64" => to_float64(value).map(|float| Number::from_f64(float).map_or(Value::Null, Value::Number)),
    "bool" => to_bool(value).map(Value::Bool),
    "string" => Ok(Value::String(match value {
      Value::String(text) => text.clone(),
      other => other.to_string(),
    })),
    other => Err(RequestError::validation(format!("cannot convert to '{other}'"))),
  }
}

fn conversion_error(value: &Value, target: &str) -> RequestError {
  RequestError::validation(format!("cannot convert {value} to {target}"))
}

fn to_int64(value: &Value) -> Result<i64, RequestError> {
  match value {
    Value::Bool(flag) => Ok(i64::from(*flag)),
    Value::Number(number) => number
      .as_i64()
      .or_else(|| number.as_f64().map(|float| float.trunc() as i64))
      .ok_or_else(|| conversion_error(value, "int64")),
    Value::String(text) => parse_int(text).ok_or_else(|| conversion_error(value, "int64")),
    _ => Err(conversion_error(value, "int64")),
  }
}

/// Integer literal with an optional sign and `0x`, `0o`, `0b` or leading-zero
/// octal prefix. Underscores may separate digits after a prefix.
fn parse_int(text: &str) -> Option<i64> {
  let text = text.trim();
  let (negative, digits) = match text.strip_prefix('-') {
    Some(rest) => (true, rest),
    None => (false, text.strip_prefix('+').unwrap_or(text)),
  };

  let lower = digits.to_ascii_lowercase();
  let (radix, body) = if let Some(rest) = lower.strip_prefix("0x") {
    (16, rest.to_string())
  } else if let Some(rest) = lower.strip_prefix("0o") {
    (8, rest.to_string())
  } else if let Some(rest) = lower.strip_prefix("0b") {
    (2, rest.to_string())
  } else if lower.len() > 1 && lower.starts_with('0') {
    (8, lower[1..].to_string())
  } else {
    (10, lower.clone())
  };

  let body = if radix == 10 { body } else { body.replace('_', "") };
  if body.is_empty() {
    return None;
  }
  let magnitude = i128::from_str_radix(&body, radix).ok()?;
  i64::try_from(if negative { -magnitude } else { magnitude }).ok()
}

fn to_float64(value: &Value) -> Result<f64, RequestError> {
  match value {
    Value::Bool(flag) => Ok(if *flag { 1.0 } else { 0.0 }),
    Value::Number(number) => number.as_f64().ok_or_else(|| conversion_error(value, "float64")),
    Value::String(text) => text.trim().parse().map_err(|_| conversion_error(value, "float64")),
    _ => Err(conversion_error(value, "float64")),
  }
}

fn to_bool(value: &Value) -> Result<bool, RequestError> {
  match value {
    Value::Bool(flag) => Ok(*flag),
    Value::Number(number) => Ok(number.as_f64() == Some(1.0)),
    Value::String(text) => match text.trim() {
      "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
      "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
      _ => Err(conversion_error(value, "bool")),
    },
    _ => Err(conversion_error(value, "bool")),
  }
}
