use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use tracing::info_span;

use crate::{
    TRACE_TARGET,
    callback::CallbackRegistry,
    channel::{Channel, CommandChannel},
    config::BridgeConfig,
    convert,
    error::Result,
    listener::DispatchListener,
    prelude::Endpoint,
    proxy::Proxy,
    runtime::Executor,
    table::{Handle, ObjectTable, Slot},
    value::{Callable, Value},
};

pub(crate) struct Shared {
    pub(crate) table: ObjectTable,
    pub(crate) callbacks: Arc<CallbackRegistry>,
    listener: Mutex<Option<DispatchListener>>,
    endpoint: Option<String>,
    // Dropped last so the listener can shut down first.
    _executor: Arc<Executor>,
}

impl Shared {
    /// Wrap an already populated, owned handle.
    pub(crate) fn adopt(self: &Arc<Self>, handle: Handle, parent: Option<Arc<Slot>>) -> Proxy {
        Proxy::new(
            Arc::clone(self),
            Arc::new(Slot::owned(self.table.clone(), handle)),
            parent,
        )
    }

    pub(crate) fn store(self: &Arc<Self>, expr: &str, parent: Option<Arc<Slot>>) -> Result<Proxy> {
        let handle = self.table.store(expr)?;
        Ok(self.adopt(handle, parent))
    }

    pub(crate) fn register(self: &Arc<Self>, callable: Callable) -> Result<Proxy> {
        let handle = self.callbacks.register(&self.table, callable)?;
        Ok(self.adopt(handle, None))
    }

    /// Render `value` as a Lua expression. Callables, also nested inside
    /// tables, are registered and referenced by their slot; the proxies are
    /// pushed onto `keep` and must outlive the code that uses the expression.
    pub(crate) fn operand(self: &Arc<Self>, value: &Value, keep: &mut Vec<Proxy>) -> Result<String> {
        if !value.contains_callable() {
            return convert::serialize(value);
        }
        match value {
            Value::Callable(callable) => {
                let proxy = self.register(callable.clone())?;
                let accessor = proxy.accessor();
                keep.push(proxy);
                Ok(accessor)
            }
            Value::Array(items) => {
                let items = items
                    .iter()
                    .map(|item| self.operand(item, keep))
                    .collect::<Result<Vec<_>>>()?;
                Ok(format!("{{ {} }}", items.join(", ")))
            }
            Value::Map(entries) => {
                let mut parts = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    let k = self.operand(k, keep)?;
                    let v = self.operand(v, keep)?;
                    parts.push(format!("[{k}] = {v}"));
                }
                Ok(format!("{{ {} }}", parts.join(", ")))
            }
            other => convert::serialize(other),
        }
    }
}

/// Connection to the remote Lua runtime.
///
/// Cloning is cheap and clones share the same object table, callback registry
/// and dispatch listener, so a bridge can be captured by host callbacks.
#[derive(Clone)]
pub struct Bridge {
    shared: Arc<Shared>,
}

impl Bridge {
    /// Connect with [`BridgeConfig::hammerspoon`] defaults.
    ///
    /// # Errors
    /// See [`BridgeBuilder::build`].
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Connect with [`BridgeConfig::from_env`].
    ///
    /// # Errors
    /// Returns a configuration error, or see [`BridgeBuilder::build`].
    pub fn from_env() -> Result<Self> {
        Self::builder().config(BridgeConfig::from_env()?).build()
    }

    #[must_use]
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::default()
    }

    /// Evaluate `expr` remotely and keep the result.
    ///
    /// # Errors
    /// Propagates channel errors.
    pub fn eval(&self, expr: &str) -> Result<Proxy> {
        self.shared.store(expr, None)
    }

    /// Run a raw snippet and return the front end's output.
    ///
    /// # Errors
    /// Propagates channel errors.
    pub fn exec(&self, code: &str) -> Result<String> {
        self.shared.table.execute(code)
    }

    /// # Errors
    /// Propagates channel errors.
    pub fn exec_with_timeout(&self, code: &str, timeout: Duration) -> Result<String> {
        self.shared.table.execute_with_timeout(code, timeout)
    }

    /// Store a host value remotely. Callables become stubs.
    ///
    /// # Errors
    /// Propagates channel and conversion errors.
    pub fn export(&self, value: &Value) -> Result<Proxy> {
        let mut keep = Vec::new();
        let expr = self.shared.operand(value, &mut keep)?;
        self.shared.store(&expr, None)
    }

    /// Expose a host callable as a remote function.
    ///
    /// The registration lasts until [`close`](Self::close), even after the
    /// returned proxy is released.
    ///
    /// With the default `hs.http.post` transport the remote runtime is blocked
    /// while the callable runs, so the callable must not use the bridge: any
    /// call it makes stalls until the channel timeout.
    ///
    /// # Errors
    /// Propagates channel errors from installing the stub.
    pub fn register(&self, callable: impl Into<Callable>) -> Result<Proxy> {
        self.shared.register(callable.into())
    }

    /// Proxy for a remote global.
    ///
    /// # Errors
    /// Propagates channel errors.
    pub fn global(&self, name: &str) -> Result<Proxy> {
        self.eval(name)
    }

    /// The top-level Hammerspoon API table.
    ///
    /// # Errors
    /// Propagates channel errors.
    pub fn hs(&self) -> Result<Proxy> {
        self.global("hs")
    }

    /// Deep-read the value stored at `handle`.
    ///
    /// # Errors
    /// See [`ObjectTable::deep_read`].
    pub fn read(&self, handle: Handle) -> Result<Value> {
        self.shared.table.deep_read(handle)
    }

    /// Clear `handle` remotely, swallowing failures.
    pub fn release(&self, handle: Handle) {
        self.shared.table.release(handle);
    }

    #[must_use]
    pub fn table(&self) -> &ObjectTable {
        &self.shared.table
    }

    #[must_use]
    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.shared.callbacks
    }

    /// Base URL of the dispatch listener, if callbacks are enabled.
    #[must_use]
    pub fn callback_endpoint(&self) -> Option<&str> {
        self.shared.endpoint.as_deref()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.table.is_closed()
    }

    /// Release every live handle in one call, drop all callback registrations
    /// and stop the dispatch listener. Idempotent; never fails.
    pub fn close(&self) {
        let span = info_span!(target: TRACE_TARGET, "bridge.close");
        let _enter = span.enter();
        self.shared.table.release_all();
        self.shared.callbacks.clear();
        drop(self.shared.listener.lock().take());
    }
}

#[derive(Default)]
#[must_use]
pub struct BridgeBuilder {
    config: BridgeConfig,
    channel: Option<Arc<dyn Channel>>,
}

impl BridgeBuilder {
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom transport instead of spawning `config.channel.program`.
    pub fn channel(mut self, channel: impl Channel) -> Self {
        let channel: Arc<dyn Channel> = Arc::new(channel);
        self.channel = Some(channel);
        self
    }

    /// Start the runtime, bind the dispatch listener and bootstrap the remote
    /// namespace.
    ///
    /// # Errors
    /// Returns [`Error::Config`](crate::Error::Config) for an invalid
    /// configuration, an I/O error if the runtime or the listener cannot be
    /// started, or a channel error from the bootstrap call.
    pub fn build(self) -> Result<Bridge> {
        let Self { config, channel } = self;
        config.validate()?;

        let executor = Arc::new(Executor::new(config.worker_threads)?);
        let channel: Arc<dyn Channel> = match channel {
            Some(channel) => channel,
            None => Arc::new(CommandChannel::with_executor(
                config.channel.clone(),
                Arc::clone(&executor),
            )),
        };
        let table = ObjectTable::new(channel, config.namespace.clone(), config.channel.timeout)?;
        let callbacks = Arc::new(CallbackRegistry::new());

        let listener = config
            .callbacks
            .as_ref()
            .map(|cb| DispatchListener::spawn(&executor, cb.bind, Arc::clone(&callbacks)))
            .transpose()?;
        let endpoint = listener.as_ref().map(DispatchListener::endpoint);

        let remote = endpoint
            .as_deref()
            .zip(config.callbacks.as_ref())
            .map(|(url, cb)| Endpoint {
                url,
                post_function: &cb.post_function,
            });
        table.bootstrap(remote.as_ref())?;

        Ok(Bridge {
            shared: Arc::new(Shared {
                table,
                callbacks,
                listener: Mutex::new(listener),
                endpoint,
                _executor: executor,
            }),
        })
    }
}
