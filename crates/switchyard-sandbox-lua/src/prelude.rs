use mlua::{DeserializeOptions, Lua, LuaSerdeExt, SerializeOptions, Table, Value as LuaValue, Variadic};
use tracing::info;

const PRELUDE: &str = r#"
AP.Call = {}
AP.Call.__index = AP.Call

function AP.Call.new()
  return setmetatable({}, AP.Call)
end

function AP.insertResponses(names, responses)
  for i, name in ipairs(names) do
    local call = _G[name]
    if call == nil then
      call = AP.Call.new()
      _G[name] = call
    end
    call.response = responses[i]
  end
end
"#;

/// JSON `null` becomes `nil` on the way in.
pub(crate) fn serialize_options() -> SerializeOptions {
  SerializeOptions::new()
    .serialize_none_to_null(false)
    .serialize_unit_to_null(false)
}

/// Functions and userdata are skipped on the way out.
pub(crate) fn deserialize_options() -> DeserializeOptions {
  DeserializeOptions::new()
    .deny_unsupported_types(false)
    .deny_recursive_tables(false)
}

pub(crate) fn to_lua(lua: &Lua, value: &serde_json::Value) -> mlua::Result<LuaValue> {
  lua.to_value_with(value, serialize_options())
}

pub(crate) fn from_lua(lua: &Lua, value: LuaValue) -> mlua::Result<serde_json::Value> {
  lua.from_value_with(value, deserialize_options())
}

/// Install the `AP` table, `log` and the `stop` signal. Returns the stop
/// signal so the sandbox can recognise it by identity.
pub(crate) fn install(lua: &Lua) -> mlua::Result<Table> {
  let globals = lua.globals();

  let json = lua.create_table()?;
  json.set(
    "decode",
    lua.create_function(|lua, text: String| {
      let value: serde_json::Value = serde_json::from_str(&text).map_err(mlua::Error::external)?;
      to_lua(lua, &value)
    })?,
  )?;
  json.set(
    "encode",
    lua.create_function(|lua, value: LuaValue| {
      let value = from_lua(lua, value)?;
      serde_json::to_string(&value).map_err(mlua::Error::external)
    })?,
  )?;

  let ap = lua.create_table()?;
  ap.set("json", json)?;
  globals.set("AP", ap)?;

  globals.set(
    "log",
    lua.create_function(|lua, args: Variadic<LuaValue>| {
      let tostring: mlua::Function = lua.globals().get("tostring")?;
      let mut parts = Vec::with_capacity(args.len());
      for arg in args {
        parts.push(tostring.call::<String>(arg)?);
      }
      info!(target: "switchyard::script", output = %parts.join(" "), "script_log");
      Ok(())
    })?,
  )?;

  lua.load(PRELUDE).set_name("prelude").exec()?;

  let stop = lua.create_table()?;
  globals.set("stop", stop.clone())?;
  Ok(stop)
}

/// Wrap `text` in a Lua long bracket that cannot be closed from inside it.
///
/// The closer must first appear right after `text`: a trailing `]` would
/// otherwise merge with the level-0 closer.
pub(crate) fn long_string(text: &str) -> String {
  let mut level = 0;
  loop {
    let eq = "=".repeat(level);
    let close = format!("]{eq}]");
    let wrapped = format!("{text}{close}");
    if wrapped.find(&close) == Some(text.len()) {
      return format!("[{eq}[{wrapped}");
    }
    level += 1;
  }
}
