//! Handle-backed wrapper around a remote value.

use std::{fmt, sync::Arc};

use crate::{
    bridge::Shared,
    error::{Error, Result},
    table::{Handle, Slot},
    value::{LuaType, Value},
};

/// Argument to [`Proxy::call`].
#[derive(Debug, Clone)]
pub enum Arg {
    /// Substituted with the object the callee was read from, for
    /// `obj:method(...)` style calls.
    Receiver,
    Proxy(Proxy),
    Value(Value),
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Proxy> for Arg {
    fn from(proxy: Proxy) -> Self {
        Self::Proxy(proxy)
    }
}

impl From<&Proxy> for Arg {
    fn from(proxy: &Proxy) -> Self {
        Self::Proxy(proxy.clone())
    }
}

macro_rules! arg_from_value {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Arg {
                fn from(value: $ty) -> Self {
                    Self::Value(value.into())
                }
            }
        )*
    };
}

arg_from_value!(bool, i64, i32, u32, f64, &str, String);

/// A remote value kept alive at a handle.
///
/// Clones share the handle. The slot is cleared when the last clone is
/// dropped (in the background) or when [`release`](Self::release) is called.
/// A proxy read from another one through [`attr`](Self::attr) remembers it as
/// the receiver for [`Arg::Receiver`].
#[derive(Clone)]
pub struct Proxy {
    shared: Arc<Shared>,
    slot: Arc<Slot>,
    parent: Option<Arc<Slot>>,
}

impl Proxy {
    pub(crate) const fn new(shared: Arc<Shared>, slot: Arc<Slot>, parent: Option<Arc<Slot>>) -> Self {
        Self {
            shared,
            slot,
            parent,
        }
    }

    #[must_use]
    pub fn handle(&self) -> Handle {
        self.slot.handle()
    }

    #[must_use]
    pub fn parent_handle(&self) -> Option<Handle> {
        self.parent.as_ref().map(|p| p.handle())
    }

    /// Lua expression addressing this value.
    #[must_use]
    pub fn accessor(&self) -> String {
        self.slot.accessor()
    }

    /// `obj.name`.
    ///
    /// # Errors
    /// Propagates channel errors.
    pub fn attr(&self, name: &str) -> Result<Self> {
        self.shared.store(
            &format!("{}.{name}", self.accessor()),
            Some(Arc::clone(&self.slot)),
        )
    }

    /// Call the remote value and keep the result.
    ///
    /// # Errors
    /// [`Error::MissingReceiver`] if [`Arg::Receiver`] is passed to a proxy
    /// that was not read through [`attr`](Self::attr); otherwise channel and
    /// conversion errors.
    pub fn call<I>(&self, args: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        let mut keep = Vec::new();
        let operands = args
            .into_iter()
            .map(|arg| self.operand(arg.into(), &mut keep))
            .collect::<Result<Vec<_>>>()?;
        self.shared.store(
            &format!("{}({})", self.accessor(), operands.join(", ")),
            None,
        )
    }

    /// `obj:name(args...)`.
    ///
    /// # Errors
    /// See [`attr`](Self::attr) and [`call`](Self::call).
    pub fn method<I>(&self, name: &str, args: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: Into<Arg>,
    {
        self.attr(name)?
            .call(std::iter::once(Arg::Receiver).chain(args.into_iter().map(Into::into)))
    }

    /// `obj[key]`.
    ///
    /// # Errors
    /// Propagates channel and conversion errors.
    pub fn get(&self, key: impl Into<Arg>) -> Result<Self> {
        let mut keep = Vec::new();
        let key = self.operand(key.into(), &mut keep)?;
        self.shared
            .store(&format!("{}[{key}]", self.accessor()), None)
    }

    /// `obj[key] = value`.
    ///
    /// # Errors
    /// [`Error::InvalidKeyType`] unless `key` is a number, string or boolean;
    /// otherwise channel and conversion errors.
    pub fn set(&self, key: impl Into<Value>, value: impl Into<Arg>) -> Result<()> {
        let key = key.into();
        if !key.is_primitive_key() {
            return Err(Error::InvalidKeyType {
                type_name: key.type_name(),
            });
        }
        let mut keep = Vec::new();
        let key = self.operand(Arg::Value(key), &mut keep)?;
        let value = self.operand(value.into(), &mut keep)?;
        self.shared
            .table
            .execute(&format!("{}[{key}] = {value}", self.accessor()))?;
        Ok(())
    }

    /// `#obj`.
    ///
    /// # Errors
    /// Propagates channel errors, or [`Error::MalformedLiteral`] if the length
    /// is not a non-negative integer.
    pub fn len(&self) -> Result<usize> {
        self.shared.table.length(self.handle())
    }

    /// # Errors
    /// See [`len`](Self::len).
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Deep-read into a host value.
    ///
    /// # Errors
    /// See [`ObjectTable::deep_read`](crate::ObjectTable::deep_read).
    pub fn value(&self) -> Result<Value> {
        self.shared.table.deep_read(self.handle())
    }

    /// `tostring(obj)`.
    ///
    /// # Errors
    /// Propagates channel errors.
    pub fn text(&self) -> Result<String> {
        self.shared.table.read_text(self.handle())
    }

    /// # Errors
    /// Propagates channel errors.
    pub fn lua_type(&self) -> Result<LuaType> {
        self.shared.table.read_type(self.handle())
    }

    /// `<Lua object N: text>`.
    ///
    /// # Errors
    /// Propagates channel errors.
    pub fn describe(&self) -> Result<String> {
        Ok(format!("<Lua object {}: {}>", self.handle(), self.text()?))
    }

    /// Clear the slot now, swallowing failures. Other clones of this proxy
    /// address an empty slot afterwards.
    pub fn release(self) {
        self.slot.release();
    }

    fn operand(&self, arg: Arg, keep: &mut Vec<Self>) -> Result<String> {
        match arg {
            Arg::Receiver => self
                .parent
                .as_ref()
                .map(|p| p.accessor())
                .ok_or(Error::MissingReceiver {
                    handle: self.handle().id(),
                }),
            Arg::Proxy(proxy) => {
                let accessor = proxy.accessor();
                keep.push(proxy);
                Ok(accessor)
            }
            Arg::Value(value) => self.shared.operand(&value, keep),
        }
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("handle", &self.handle())
            .field("parent", &self.parent_handle())
            .finish()
    }
}
