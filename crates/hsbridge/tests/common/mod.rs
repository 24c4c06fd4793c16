#![allow(dead_code)]

//! In-memory stand-in for the remote Lua runtime.
//!
//! Understands the statement shapes the bridge sends: the bootstrap prelude,
//! slot assignments, index assignments, the array probe and key listing, and
//! expressions built from literals, globals, `.field`, `[key]`, calls, `#` and
//! integer `+`. Stubs installed for host callbacks post to the dispatch
//! listener the way the prelude's `NS_call` does.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use hsbridge::{Channel, Error, Value, convert};
use parking_lot::Mutex;

type NativeFn = dyn Fn(Vec<Lua>) -> Result<Lua, String> + Send + Sync;

#[derive(Clone)]
pub enum Lua {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Table(Arc<Mutex<Vec<(Lua, Lua)>>>),
    Native(Arc<NativeFn>),
    Stub(u64),
}

impl fmt::Debug for Lua {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tostring())
    }
}

impl Lua {
    pub fn table(entries: impl IntoIterator<Item = (Self, Self)>) -> Self {
        Self::Table(Arc::new(Mutex::new(entries.into_iter().collect())))
    }

    pub fn native<F>(f: F) -> Self
    where
        F: Fn(Vec<Self>) -> Result<Self, String> + Send + Sync + 'static,
    {
        Self::Native(Arc::new(f))
    }

    pub fn str(s: &str) -> Self {
        Self::Str(s.to_string())
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "boolean",
            Self::Int(_) | Self::Float(_) => "number",
            Self::Str(_) => "string",
            Self::Table(_) => "table",
            Self::Native(_) | Self::Stub(_) => "function",
        }
    }

    fn tostring(&self) -> String {
        match self {
            Self::Nil => "nil".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => format!("{f:?}"),
            Self::Str(s) => s.clone(),
            Self::Table(t) => format!("table: {:p}", Arc::as_ptr(t)),
            Self::Native(f) => format!("function: {:p}", Arc::as_ptr(f)),
            Self::Stub(id) => format!("function: stub {id}"),
        }
    }

    #[allow(clippy::cast_precision_loss, clippy::float_cmp)]
    fn key_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Int(b)) | (Self::Int(b), Self::Float(a)) => *a == *b as f64,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Table(a), Self::Table(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn index(&self, key: &Self) -> Result<Self, String> {
        match self {
            Self::Table(t) => Ok(t
                .lock()
                .iter()
                .find(|(k, _)| k.key_eq(key))
                .map_or(Self::Nil, |(_, v)| v.clone())),
            other => Err(format!(
                "error: attempt to index a {} value",
                other.type_name()
            )),
        }
    }

    fn set(&self, key: Self, value: Self) -> Result<(), String> {
        let Self::Table(t) = self else {
            return Err(format!(
                "error: attempt to index a {} value",
                self.type_name()
            ));
        };
        let mut entries = t.lock();
        entries.retain(|(k, _)| !k.key_eq(&key));
        if !matches!(value, Self::Nil) {
            entries.push((key, value));
        }
        Ok(())
    }

    fn border(&self) -> Result<i64, String> {
        match self {
            Self::Str(s) => Ok(i64::try_from(s.len()).unwrap_or_default()),
            Self::Table(_) => {
                let mut n = 0;
                while !matches!(self.index(&Self::Int(n + 1))?, Self::Nil) {
                    n += 1;
                }
                Ok(n)
            }
            other => Err(format!(
                "error: attempt to get length of a {} value",
                other.type_name()
            )),
        }
    }

    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Nil | Value::Callable(_) => Self::Nil,
            Value::Boolean(b) => Self::Bool(b),
            Value::Int(i) => Self::Int(i),
            Value::Float(f) => Self::Float(f),
            Value::Text(s) => Self::Str(s),
            Value::Array(items) => Self::table(
                (1_i64..)
                    .zip(items)
                    .map(|(i, v)| (Self::Int(i), Self::from_value(v))),
            ),
            Value::Map(entries) => Self::table(
                entries
                    .into_iter()
                    .filter(|(_, v)| !v.is_nil())
                    .map(|(k, v)| (Self::from_value(k), Self::from_value(v))),
            ),
        }
    }

    fn to_value(&self) -> Result<Value, String> {
        Ok(match self {
            Self::Nil => Value::Nil,
            Self::Bool(b) => Value::Boolean(*b),
            Self::Int(i) => Value::Int(*i),
            Self::Float(f) => Value::Float(*f),
            Self::Str(s) => Value::Text(s.clone()),
            Self::Table(t) => {
                let entries = t.lock().clone();
                let len = self.border()?;
                if usize::try_from(len).ok() == Some(entries.len()) {
                    let items = (1..=len)
                        .map(|i| self.index(&Self::Int(i))?.to_value())
                        .collect::<Result<Vec<_>, _>>()?;
                    Value::Array(items)
                } else {
                    Value::Map(
                        entries
                            .iter()
                            .map(|(k, v)| Ok((k.to_value()?, v.to_value()?)))
                            .collect::<Result<Vec<_>, String>>()?,
                    )
                }
            }
            Self::Native(_) | Self::Stub(_) => {
                return Err("error: cannot marshal a function value to the host".to_string());
            }
        })
    }
}

enum Step<'a> {
    Field(&'a str),
    Index(&'a str),
    Call(&'a str),
}

#[derive(Default)]
pub struct FakeRuntime {
    globals: Mutex<HashMap<String, Lua>>,
    endpoint: Mutex<Option<String>>,
    log: Mutex<Vec<String>>,
    namespaces_created: Mutex<usize>,
    fail_when: Mutex<Option<String>>,
}

impl FakeRuntime {
    /// A runtime with `tostring`, `type` and a small `hs` table:
    /// `hs.double(n)`, `hs.counter` with `value` and `counter:bump(n)`.
    pub fn new() -> Arc<Self> {
        let runtime = Self::default();
        runtime.define(
            "tostring",
            Lua::native(|args| {
                Ok(Lua::Str(
                    args.first().map_or_else(|| "nil".to_string(), Lua::tostring),
                ))
            }),
        );
        runtime.define(
            "type",
            Lua::native(|args| Ok(Lua::str(args.first().map_or("nil", Lua::type_name)))),
        );

        let counter = Lua::table([
            (Lua::str("value"), Lua::Int(10)),
            (
                Lua::str("bump"),
                Lua::native(|args| {
                    let receiver = args.first().cloned().unwrap_or(Lua::Nil);
                    let by = match args.get(1) {
                        Some(Lua::Int(n)) => *n,
                        _ => 1,
                    };
                    let Lua::Int(current) = receiver.index(&Lua::str("value"))? else {
                        return Err("error: counter has no value".to_string());
                    };
                    receiver.set(Lua::str("value"), Lua::Int(current + by))?;
                    Ok(Lua::Int(current + by))
                }),
            ),
        ]);
        runtime.define(
            "hs",
            Lua::table([
                (
                    Lua::str("double"),
                    Lua::native(|args| match args.first() {
                        Some(Lua::Int(n)) => Ok(Lua::Int(n * 2)),
                        _ => Err("error: bad argument #1 to 'double'".to_string()),
                    }),
                ),
                (Lua::str("counter"), counter),
            ]),
        );
        Arc::new(runtime)
    }

    pub fn define(&self, name: &str, value: Lua) {
        self.globals.lock().insert(name.to_string(), value);
    }

    pub fn global(&self, name: &str) -> Lua {
        self.globals.lock().get(name).cloned().unwrap_or(Lua::Nil)
    }

    /// Every snippet received, in order.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn namespaces_created(&self) -> usize {
        *self.namespaces_created.lock()
    }

    pub fn endpoint(&self) -> Option<String> {
        self.endpoint.lock().clone()
    }

    /// Fail every snippet containing `pattern` with a timeout.
    pub fn fail_when(&self, pattern: Option<&str>) {
        *self.fail_when.lock() = pattern.map(ToString::to_string);
    }

    fn run(&self, code: &str) -> Result<String, String> {
        if let Some(ns) = bootstrap_namespace(code) {
            let mut globals = self.globals.lock();
            if !globals.contains_key(ns) {
                globals.insert(ns.to_string(), Lua::table([]));
                *self.namespaces_created.lock() += 1;
            }
            *self.endpoint.lock() = bootstrap_endpoint(code).map(ToString::to_string);
            return Ok("true".to_string());
        }

        let mut output = String::new();
        for line in code.lines() {
            if let Some(value) = self.statement(line)? {
                output = value.tostring();
            }
        }
        Ok(output)
    }

    fn statement(&self, line: &str) -> Result<Option<Lua>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        if let Some(eq) = find_assign(line) {
            let value = self.rhs(line[eq + 1..].trim())?;
            self.assign(line[..eq].trim(), value)?;
            return Ok(None);
        }
        self.eval(line).map(Some)
    }

    fn rhs(&self, rhs: &str) -> Result<Lua, String> {
        if rhs.starts_with("function(...)") {
            let id = rhs
                .split_once("_call(")
                .and_then(|(_, rest)| rest.split_once(','))
                .and_then(|(id, _)| id.trim().parse().ok())
                .ok_or_else(|| format!("error: unexpected function body {rhs}"))?;
            return Ok(Lua::Stub(id));
        }
        if let Some(expr) = rhs
            .strip_prefix("(function () return ")
            .and_then(|r| r.strip_suffix(" end)()"))
        {
            return self.eval(expr);
        }
        self.eval(rhs)
    }

    fn assign(&self, lhs: &str, value: Lua) -> Result<(), String> {
        let (name, steps) =
            parse_chain(lhs).ok_or_else(|| format!("error: cannot assign to {lhs}"))?;
        let Some((last, prefix)) = steps.split_last() else {
            self.define(name, value);
            return Ok(());
        };
        let target = self.walk(name, prefix)?;
        let key = match last {
            Step::Field(f) => Lua::str(f),
            Step::Index(k) => self.eval(k)?,
            Step::Call(_) => return Err(format!("error: cannot assign to {lhs}")),
        };
        target.set(key, value)
    }

    fn eval(&self, expr: &str) -> Result<Lua, String> {
        let e = expr.trim();
        if let Some(inner) = e.strip_prefix('#') {
            return self.eval(inner)?.border().map(Lua::Int);
        }
        if e.starts_with("(function () local keys") {
            let target = between(e, "pairs(", ") do")
                .ok_or_else(|| format!("error: bad key listing {e}"))?;
            let Lua::Table(t) = self.eval(target)? else {
                return Err("error: bad argument #1 to 'pairs'".to_string());
            };
            // Reverse insertion order, standing in for unspecified `pairs` order.
            let keys: Vec<Lua> = t.lock().iter().rev().map(|(k, _)| k.clone()).collect();
            return Ok(Lua::table(
                (1_i64..).zip(keys).map(|(i, k)| (Lua::Int(i), k)),
            ));
        }
        if e.starts_with("(function () local t = ") {
            let target = between(e, "local t = ", " local i = 0")
                .ok_or_else(|| format!("error: bad probe {e}"))?;
            let value = self.eval(target)?;
            let Lua::Table(t) = &value else {
                return Err("error: bad argument #1 to 'pairs'".to_string());
            };
            let count = t.lock().len();
            return Ok(Lua::Bool(
                usize::try_from(value.border()?).ok() == Some(count),
            ));
        }
        if let Some((a, b)) = e.split_once('+') {
            if let (Ok(a), Ok(b)) = (a.trim().parse::<i64>(), b.trim().parse::<i64>()) {
                return Ok(Lua::Int(a + b));
            }
        }
        if is_literal(e) {
            return convert::deserialize(convert::infer_type(e), e)
                .map(Lua::from_value)
                .map_err(|err| format!("error: {err}"));
        }
        let (name, steps) = parse_chain(e).ok_or_else(|| format!("error: unexpected symbol near '{e}'"))?;
        self.walk(name, &steps)
    }

    fn walk(&self, name: &str, steps: &[Step<'_>]) -> Result<Lua, String> {
        let mut current = self.global(name);
        for step in steps {
            current = match step {
                Step::Field(f) => current.index(&Lua::str(f))?,
                Step::Index(k) => current.index(&self.eval(k)?)?,
                Step::Call(args) => {
                    let args = split_top(args)
                        .into_iter()
                        .map(str::trim)
                        .filter(|a| !a.is_empty())
                        .map(|a| self.eval(a))
                        .collect::<Result<Vec<_>, _>>()?;
                    self.call(&current, args)?
                }
            };
        }
        Ok(current)
    }

    fn call(&self, callee: &Lua, args: Vec<Lua>) -> Result<Lua, String> {
        match callee {
            Lua::Native(f) => f(args),
            Lua::Stub(id) => self.post(*id, args),
            other => Err(format!(
                "error: attempt to call a {} value",
                other.type_name()
            )),
        }
    }

    fn post(&self, id: u64, args: Vec<Lua>) -> Result<Lua, String> {
        let endpoint = self
            .endpoint()
            .ok_or_else(|| format!("error: host callbacks are disabled, cannot invoke {id}"))?;
        let args = args
            .iter()
            .map(Lua::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        let body = convert::serialize(&Value::Array(args)).map_err(|e| format!("error: {e}"))?;

        let response = reqwest::blocking::Client::new()
            .post(format!("{endpoint}/call/{id}"))
            .header("Content-Type", "text/plain")
            .body(body)
            .send()
            .map_err(|e| format!("error: {e}"))?;
        let status = response.status();
        let text = response.text().map_err(|e| format!("error: {e}"))?;
        if !status.is_success() {
            return Err(format!(
                "error: host callback {id} failed ({}): {text}",
                status.as_u16()
            ));
        }
        convert::deserialize(convert::infer_type(&text), &text)
            .map(Lua::from_value)
            .map_err(|e| format!("error: {e}"))
    }
}

impl Channel for FakeRuntime {
    fn execute(&self, code: &str, timeout: Duration) -> hsbridge::Result<String> {
        self.log.lock().push(code.to_string());
        if self
            .fail_when
            .lock()
            .as_deref()
            .is_some_and(|p| code.contains(p))
        {
            return Err(Error::ChannelTimeout { timeout });
        }
        self.run(code)
            .map_err(|output| Error::RemoteSyntaxError { output })
    }
}

fn bootstrap_namespace(code: &str) -> Option<&str> {
    code.lines().find_map(|line| {
        let (lhs, rhs) = line.trim().split_once(" = ")?;
        (rhs.strip_suffix(" or {}")? == lhs).then_some(lhs)
    })
}

fn bootstrap_endpoint(code: &str) -> Option<&str> {
    let end = code.find("/call/\"")?;
    let start = code[..end].rfind('"')? + 1;
    Some(&code[start..end])
}

fn between<'a>(s: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = s.find(start)? + start.len();
    let to = from + s[from..].find(end)?;
    Some(&s[from..to])
}

fn is_literal(e: &str) -> bool {
    matches!(e, "true" | "false" | "nil")
        || e.starts_with(|c: char| c.is_ascii_digit() || matches!(c, '-' | '\'' | '"' | '{'))
}

fn ident_len(s: &str) -> usize {
    s.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(s.len())
}

/// Index of the bracket closing the one `s` starts with.
fn closing(s: &str) -> Option<usize> {
    let mut depth = 0_usize;
    let mut quote = None;
    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_chain(e: &str) -> Option<(&str, Vec<Step<'_>>)> {
    let end = ident_len(e);
    if end == 0 {
        return None;
    }
    let (name, mut rest) = e.split_at(end);
    let mut steps = Vec::new();
    while let Some(c) = rest.chars().next() {
        match c {
            '.' => {
                let field = &rest[1..];
                let end = ident_len(field);
                steps.push(Step::Field(&field[..end]));
                rest = &field[end..];
            }
            '[' | '(' => {
                let close = closing(rest)?;
                let inner = &rest[1..close];
                steps.push(if c == '[' {
                    Step::Index(inner)
                } else {
                    Step::Call(inner)
                });
                rest = &rest[close + 1..];
            }
            _ => return None,
        }
    }
    Some((name, steps))
}

/// Split call arguments at top-level commas.
fn split_top(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0_usize;
    let mut quote = None;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

/// Position of a top-level `=` that is an assignment, not a comparison.
fn find_assign(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 0_usize;
    let mut quote = None;
    for (i, &b) in bytes.iter().enumerate() {
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            continue;
        }
        match b {
            b'\'' | b'"' => quote = Some(b),
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b'=' if depth == 0 => {
                let prev = i.checked_sub(1).map(|p| bytes[p]);
                let next = bytes.get(i + 1).copied();
                if next != Some(b'=') && !matches!(prev, Some(b'=' | b'~' | b'<' | b'>')) {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
