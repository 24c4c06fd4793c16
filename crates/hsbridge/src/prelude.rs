//! Lua snippets sent to the remote runtime.
//!
//! `__NS__` is replaced with the namespace table name. Helpers live next to the
//! table as `__NS___literal` and `__NS___call`.

const BOOTSTRAP: &str = r#"
__NS__ = __NS__ or {}
local function literal(v)
  local t = type(v)
  if t == "string" then
    return "'" .. v .. "'"
  elseif t == "number" then
    if math.type and math.type(v) == "float" then
      local s = string.format("%.17g", v)
      if not s:find("[%.eEn]") then s = s .. ".0" end
      return s
    end
    return tostring(v)
  elseif t == "boolean" or t == "nil" then
    return tostring(v)
  elseif t == "table" then
    local n, count = #v, 0
    for _ in pairs(v) do count = count + 1 end
    local parts = {}
    if n == count then
      for i = 1, n do parts[i] = literal(v[i]) end
    else
      for k, x in pairs(v) do
        parts[#parts + 1] = "[" .. literal(k) .. "] = " .. literal(x)
      end
    end
    if #parts == 0 then return "{}" end
    return "{ " .. table.concat(parts, ", ") .. " }"
  end
  error("cannot marshal a " .. t .. " value to the host")
end
__NS___literal = literal
"#;

const CALL_ENABLED: &str = r#"
function __NS___call(id, args)
  local status, body = __POST__("__ENDPOINT__/call/" .. id, __NS___literal(args), { ["Content-Type"] = "text/plain" })
  if status ~= 200 then
    error("host callback " .. id .. " failed (" .. tostring(status) .. "): " .. tostring(body))
  end
  return load("return " .. body)()
end
return true
"#;

const CALL_DISABLED: &str = r#"
function __NS___call(id)
  error("host callbacks are disabled, cannot invoke " .. id)
end
return true
"#;

/// Remote side of a callback listener: base URL and the Lua HTTP post function.
pub(crate) struct Endpoint<'a> {
    pub(crate) url: &'a str,
    pub(crate) post_function: &'a str,
}

/// Idempotent setup: creates the namespace only if it is missing and
/// (re)defines the helper functions.
pub(crate) fn bootstrap(namespace: &str, endpoint: Option<&Endpoint<'_>>) -> String {
    let call = endpoint.map_or_else(
        || CALL_DISABLED.to_string(),
        |e| {
            CALL_ENABLED
                .replace("__POST__", e.post_function)
                .replace("__ENDPOINT__", e.url)
        },
    );
    format!("{BOOTSTRAP}{call}").replace("__NS__", namespace)
}

/// Right-hand side installing a variadic stub that forwards to the host.
pub(crate) fn stub(namespace: &str, id: u64) -> String {
    format!("function(...) return {namespace}_call({id}, {{...}}) end")
}

pub(crate) fn store(accessor: &str, expr: &str) -> String {
    format!("{accessor} = (function () return {expr} end)()")
}

pub(crate) fn is_array(accessor: &str) -> String {
    format!(
        "(function () local t = {accessor} local i = 0 for _ in pairs(t) do i = i + 1 end return #t == i end)()"
    )
}

pub(crate) fn keys(accessor: &str) -> String {
    format!(
        "(function () local keys = {{}} for k, _ in pairs({accessor}) do table.insert(keys, k) end return keys end)()"
    )
}
