use std::{fmt, str::FromStr, sync::Arc};

use crate::error::{BoxError, Error};

/// Dynamic type of a remote value as reported by Lua's `type()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LuaType {
    Number,
    String,
    Boolean,
    Table,
    Function,
    Nil,
    Userdata,
    Thread,
}

impl LuaType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Table => "table",
            Self::Function => "function",
            Self::Nil => "nil",
            Self::Userdata => "userdata",
            Self::Thread => "thread",
        }
    }
}

impl fmt::Display for LuaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LuaType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "number" => Self::Number,
            "string" => Self::String,
            "boolean" => Self::Boolean,
            "table" => Self::Table,
            "function" => Self::Function,
            "nil" => Self::Nil,
            "userdata" => Self::Userdata,
            "thread" => Self::Thread,
            other => {
                return Err(Error::UnsupportedValueType {
                    type_name: other.to_string(),
                });
            }
        })
    }
}

type CallableFn = dyn Fn(Vec<Value>) -> Result<Value, BoxError> + Send + Sync;

/// Host-side callable exchanged with the remote runtime.
///
/// Callables exported to Lua are invoked through the dispatch listener. Remote
/// functions read back from Lua are wrapped into a `Callable` that calls the
/// remote function.
#[derive(Clone)]
pub struct Callable(Arc<CallableFn>);

impl Callable {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, BoxError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// # Errors
    /// Returns whatever error the underlying function returns.
    pub fn call(&self, args: Vec<Value>) -> Result<Value, BoxError> {
        (self.0)(args)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callable({:p})", Arc::as_ptr(&self.0))
    }
}

impl PartialEq for Callable {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Host-native value.
///
/// Tables are split into `Array` (keys exactly 1..n) and `Map`. Map equality
/// ignores entry order.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Boolean(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Array(Vec<Self>),
    Map(Vec<(Self, Self)>),
    Callable(Callable),
}

impl Value {
    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Self>,
        V: Into<Self>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn callable<F>(f: F) -> Self
    where
        F: Fn(Vec<Self>) -> Result<Self, BoxError> + Send + Sync + 'static,
    {
        Self::Callable(Callable::new(f))
    }

    #[must_use]
    pub const fn lua_type(&self) -> LuaType {
        match self {
            Self::Nil => LuaType::Nil,
            Self::Boolean(_) => LuaType::Boolean,
            Self::Int(_) | Self::Float(_) => LuaType::Number,
            Self::Text(_) => LuaType::String,
            Self::Array(_) | Self::Map(_) => LuaType::Table,
            Self::Callable(_) => LuaType::Function,
        }
    }

    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Boolean(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "string",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
            Self::Callable(_) => "callable",
        }
    }

    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[Self]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_callable(&self) -> Option<&Callable> {
        match self {
            Self::Callable(c) => Some(c),
            _ => None,
        }
    }

    /// Look up a table entry. Arrays are indexed from 1 like Lua tables.
    #[must_use]
    pub fn get(&self, key: &Self) -> Option<&Self> {
        match (self, key) {
            (Self::Array(items), Self::Int(i)) => usize::try_from(*i)
                .ok()
                .and_then(|i| i.checked_sub(1))
                .and_then(|i| items.get(i)),
            (Self::Map(entries), key) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Whether this value is a valid table key for index assignment.
    #[must_use]
    pub const fn is_primitive_key(&self) -> bool {
        matches!(
            self,
            Self::Int(_) | Self::Float(_) | Self::Text(_) | Self::Boolean(_)
        )
    }

    pub(crate) fn contains_callable(&self) -> bool {
        match self {
            Self::Callable(_) => true,
            Self::Array(items) => items.iter().any(Self::contains_callable),
            Self::Map(entries) => entries
                .iter()
                .any(|(k, v)| k.contains_callable() || v.contains_callable()),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => {
                let within = |x: &[(Self, Self)], y: &[(Self, Self)]| {
                    x.iter()
                        .all(|(k, v)| y.iter().any(|(k2, v2)| k == k2 && v == v2))
                };
                a.len() == b.len() && within(a, b) && within(b, a)
            }
            (Self::Callable(a), Self::Callable(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Callable(_) => f.write_str("<function>"),
            Self::Array(items) => {
                f.write_str("{ ")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str(" }")
            }
            Self::Map(entries) => {
                f.write_str("{ ")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "[{k}] = {v}")?;
                }
                f.write_str(" }")
            }
            scalar => match crate::convert::serialize(scalar) {
                Ok(text) => f.write_str(&text),
                Err(_) => f.write_str("<unrepresentable>"),
            },
        }
    }
}

impl From<()> for Value {
    fn from((): ()) -> Self {
        Self::Nil
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Callable> for Value {
    fn from(value: Callable) -> Self {
        Self::Callable(value)
    }
}

impl<T: Into<Self>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Self::Array(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Nil, Into::into)
    }
}
