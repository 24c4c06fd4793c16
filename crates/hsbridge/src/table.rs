//! Remote object table: values stored in a global Lua table, addressed by
//! host-issued handles.

use std::{
    collections::BTreeSet,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use tracing::{debug, info_span};

use crate::{
    TRACE_TARGET,
    channel::Channel,
    config::is_lua_identifier,
    convert,
    error::{Error, Result},
    prelude,
    value::{Callable, LuaType, Value},
};

/// Identifies a slot in the remote namespace.
///
/// Ids come from a process-wide counter, so they are unique and increasing for
/// the life of the process regardless of how many tables exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(u64);

impl Handle {
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a fresh handle id. Safe to call from any thread.
#[must_use]
pub fn new_id() -> Handle {
    Handle(NEXT_ID.fetch_add(1, Ordering::Relaxed))
}

/// What the releaser thread needs to clear a slot.
struct Remote {
    channel: Arc<dyn Channel>,
    namespace: String,
    timeout: Duration,
    live: Mutex<BTreeSet<Handle>>,
}

impl Remote {
    fn accessor(&self, handle: Handle) -> String {
        format!("{}[{}]", self.namespace, handle.0)
    }

    fn release(&self, handle: Handle) {
        self.live.lock().remove(&handle);
        let code = format!("{} = nil", self.accessor(handle));
        if let Err(err) = self.channel.execute(&code, self.timeout) {
            debug!(target: TRACE_TARGET, handle = handle.0, error = %err, "ignoring release failure");
        }
    }
}

struct TableInner {
    remote: Arc<Remote>,
    closed: AtomicBool,
    deferred: mpsc::Sender<Handle>,
}

/// Store, read and release values at handles inside the remote namespace.
///
/// Cloning is cheap; clones share the live-handle set and the releaser thread.
#[derive(Clone)]
pub struct ObjectTable {
    inner: Arc<TableInner>,
}

impl ObjectTable {
    /// # Errors
    /// Returns [`Error::Config`] if `namespace` is not a Lua identifier, or an
    /// I/O error if the releaser thread cannot be started.
    pub fn new(
        channel: Arc<dyn Channel>,
        namespace: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let namespace = namespace.into();
        if !is_lua_identifier(&namespace) {
            return Err(Error::Config {
                key: "namespace",
                message: format!("`{namespace}` is not a Lua identifier"),
            });
        }
        let remote = Arc::new(Remote {
            channel,
            namespace,
            timeout,
            live: Mutex::new(BTreeSet::new()),
        });

        let (deferred, rx) = mpsc::channel::<Handle>();
        let remote_bg = Arc::clone(&remote);
        std::thread::Builder::new()
            .name("hsbridge-releaser".to_string())
            .spawn(move || {
                // Ends once every table clone (and so every sender) is gone.
                while let Ok(handle) = rx.recv() {
                    remote_bg.release(handle);
                }
            })?;

        Ok(Self {
            inner: Arc::new(TableInner {
                remote,
                closed: AtomicBool::new(false),
                deferred,
            }),
        })
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.inner.remote.namespace
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.inner.remote.timeout
    }

    /// Lua expression addressing the slot, e.g. `__rust_bridge_storage[3]`.
    #[must_use]
    pub fn accessor(&self, handle: Handle) -> String {
        self.inner.remote.accessor(handle)
    }

    /// Handles stored through this table and not yet released.
    #[must_use]
    pub fn live_handles(&self) -> Vec<Handle> {
        self.inner.remote.live.lock().iter().copied().collect()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Run raw code with the default timeout.
    ///
    /// # Errors
    /// Propagates channel errors.
    pub fn execute(&self, code: &str) -> Result<String> {
        self.execute_with_timeout(code, self.timeout())
    }

    /// # Errors
    /// Propagates channel errors.
    pub fn execute_with_timeout(&self, code: &str, timeout: Duration) -> Result<String> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        self.inner.remote.channel.execute(code, timeout)
    }

    /// Create the namespace if missing and define the helper functions.
    pub(crate) fn bootstrap(&self, endpoint: Option<&prelude::Endpoint<'_>>) -> Result<()> {
        let span = info_span!(target: TRACE_TARGET, "bridge.bootstrap", namespace = self.namespace());
        let _enter = span.enter();
        self.execute(&prelude::bootstrap(self.namespace(), endpoint))?;
        Ok(())
    }

    /// Execute `NS[handle] = rhs` and track the handle as live.
    ///
    /// # Errors
    /// Propagates channel errors; the handle is then left unpopulated.
    pub fn assign(&self, handle: Handle, rhs: &str) -> Result<()> {
        self.execute(&format!("{} = {rhs}", self.accessor(handle)))?;
        self.inner.remote.live.lock().insert(handle);
        Ok(())
    }

    /// Evaluate `expr` remotely and keep the result at a fresh handle.
    ///
    /// # Errors
    /// Propagates channel errors. The allocated id is then never populated.
    pub fn store(&self, expr: &str) -> Result<Handle> {
        let handle = new_id();
        let code = prelude::store(&self.accessor(handle), expr);
        self.execute(&code)?;
        self.inner.remote.live.lock().insert(handle);
        debug!(target: TRACE_TARGET, handle = handle.0, "stored value");
        Ok(handle)
    }

    /// `tostring` of the slot.
    ///
    /// # Errors
    /// Propagates channel errors.
    pub fn read_text(&self, handle: Handle) -> Result<String> {
        self.execute(&format!("tostring({})", self.accessor(handle)))
    }

    /// Dynamic type of the slot's value.
    ///
    /// # Errors
    /// Propagates channel errors, or [`Error::UnsupportedValueType`] for an
    /// unknown type name.
    pub fn read_type(&self, handle: Handle) -> Result<LuaType> {
        self.execute(&format!("type({})", self.accessor(handle)))?
            .parse()
    }

    /// Whether the table's border length equals its key count.
    ///
    /// # Errors
    /// Propagates channel errors.
    pub fn is_array(&self, handle: Handle) -> Result<bool> {
        let out = self.execute(&prelude::is_array(&self.accessor(handle)))?;
        Ok(convert::deserialize(LuaType::Boolean, &out)?
            .as_bool()
            .unwrap_or(false))
    }

    /// The `#` length of the slot's value.
    ///
    /// # Errors
    /// Propagates channel errors, or [`Error::MalformedLiteral`] if the
    /// output is not a non-negative integer.
    pub fn length(&self, handle: Handle) -> Result<usize> {
        self.length_of(&self.accessor(handle))
    }

    fn length_of(&self, expr: &str) -> Result<usize> {
        let out = self.execute(&format!("#{expr}"))?;
        match convert::deserialize(LuaType::Number, &out)? {
            Value::Int(n) => usize::try_from(n).ok(),
            _ => None,
        }
        .ok_or(Error::MalformedLiteral {
            kind: LuaType::Number,
            text: out,
        })
    }

    /// Store an array of the table's keys and return its handle.
    ///
    /// # Errors
    /// Propagates channel errors.
    pub fn keys(&self, handle: Handle) -> Result<Handle> {
        self.store(&prelude::keys(&self.accessor(handle)))
    }

    /// Reconstruct the slot's value as a host value, recursing into tables.
    ///
    /// Member values are read through temporary handles which are released in
    /// the background. A `function` slot becomes a [`Callable`] that calls the
    /// remote function.
    ///
    /// # Errors
    /// Propagates channel and conversion errors. Userdata and threads yield
    /// [`Error::UnsupportedValueType`].
    pub fn deep_read(&self, handle: Handle) -> Result<Value> {
        self.decode(&Arc::new(Slot::borrowed(self.clone(), handle)))
    }

    /// Store `expr`, decode it and drop the temporary slot.
    pub(crate) fn read_expr(&self, expr: &str) -> Result<Value> {
        let slot = Arc::new(Slot::owned(self.clone(), self.store(expr)?));
        self.decode(&slot)
    }

    fn decode(&self, slot: &Arc<Slot>) -> Result<Value> {
        let handle = slot.handle;
        match self.read_type(handle)? {
            kind @ (LuaType::Number | LuaType::String | LuaType::Boolean) => {
                convert::deserialize(kind, &self.read_text(handle)?)
            }
            LuaType::Nil => Ok(Value::Nil),
            LuaType::Table => {
                let accessor = self.accessor(handle);
                if self.is_array(handle)? {
                    let len = self.length(handle)?;
                    let items = (1..=len)
                        .map(|i| self.read_expr(&format!("{accessor}[{i}]")))
                        .collect::<Result<Vec<_>>>()?;
                    Ok(Value::Array(items))
                } else {
                    let keys = Slot::owned(self.clone(), self.keys(handle)?);
                    let keys_accessor = self.accessor(keys.handle);
                    let count = self.length(keys.handle)?;
                    let mut entries = Vec::with_capacity(count);
                    for i in 1..=count {
                        let key = self.read_expr(&format!("{keys_accessor}[{i}]"))?;
                        let value = self.read_expr(&format!("{accessor}[{keys_accessor}[{i}]]"))?;
                        entries.push((key, value));
                    }
                    Ok(Value::Map(entries))
                }
            }
            LuaType::Function => Ok(Value::Callable(remote_callable(Arc::clone(slot)))),
            kind @ (LuaType::Userdata | LuaType::Thread) => Err(Error::UnsupportedValueType {
                type_name: kind.to_string(),
            }),
        }
    }

    /// Clear the slot. Failures are logged and swallowed.
    pub fn release(&self, handle: Handle) {
        if self.is_closed() {
            return;
        }
        self.inner.remote.release(handle);
    }

    /// Queue the slot for clearing on the releaser thread. Never blocks.
    pub fn release_later(&self, handle: Handle) {
        if self.is_closed() {
            return;
        }
        if self.inner.deferred.send(handle).is_err() {
            debug!(target: TRACE_TARGET, handle = handle.0, "releaser gone, leaking slot");
        }
    }

    /// Clear every live slot in a single call and refuse further work.
    /// Failures are logged and swallowed.
    pub fn release_all(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let handles: Vec<Handle> = std::mem::take(&mut *self.inner.remote.live.lock())
            .into_iter()
            .collect();
        if handles.is_empty() {
            return;
        }
        let code = handles
            .iter()
            .map(|h| format!("{} = nil", self.accessor(*h)))
            .collect::<Vec<_>>()
            .join("\n");
        if let Err(err) = self.inner.remote.channel.execute(&code, self.timeout()) {
            debug!(target: TRACE_TARGET, count = handles.len(), error = %err, "ignoring bulk release failure");
        }
    }
}

/// Right to address a slot. Owned slots are released when dropped.
pub(crate) struct Slot {
    table: ObjectTable,
    handle: Handle,
    owned: AtomicBool,
}

impl Slot {
    pub(crate) const fn owned(table: ObjectTable, handle: Handle) -> Self {
        Self {
            table,
            handle,
            owned: AtomicBool::new(true),
        }
    }

    pub(crate) const fn borrowed(table: ObjectTable, handle: Handle) -> Self {
        Self {
            table,
            handle,
            owned: AtomicBool::new(false),
        }
    }

    pub(crate) const fn handle(&self) -> Handle {
        self.handle
    }

    pub(crate) fn accessor(&self) -> String {
        self.table.accessor(self.handle)
    }

    /// Release now instead of on drop.
    pub(crate) fn release(&self) {
        if self.owned.swap(false, Ordering::AcqRel) {
            self.table.release(self.handle);
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if *self.owned.get_mut() {
            self.table.release_later(self.handle);
        }
    }
}

fn remote_callable(slot: Arc<Slot>) -> Callable {
    Callable::new(move |args| {
        let args = args
            .iter()
            .map(convert::serialize)
            .collect::<Result<Vec<_>>>()?;
        let expr = format!("{}({})", slot.accessor(), args.join(", "));
        Ok(slot.table.read_expr(&expr)?)
    })
}
