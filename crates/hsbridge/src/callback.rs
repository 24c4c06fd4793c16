//! Host callables exposed to the remote runtime.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, info_span};

use crate::{
    TRACE_TARGET, convert,
    error::{Error, Result},
    prelude,
    table::{Handle, ObjectTable, new_id},
    value::{Callable, LuaType, Value},
};

/// Callables registered with the remote runtime, keyed by handle id.
///
/// Each registration installs a stub at the same handle in the remote
/// namespace. Calling the stub posts the arguments to the dispatch listener,
/// which ends up in [`CallbackRegistry::dispatch`].
#[derive(Default)]
pub struct CallbackRegistry {
    entries: RwLock<HashMap<u64, Callable>>,
}

impl CallbackRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callable` and install its remote stub.
    ///
    /// # Errors
    /// Propagates channel errors from installing the stub. The registration is
    /// rolled back in that case.
    pub fn register(&self, table: &ObjectTable, callable: Callable) -> Result<Handle> {
        let handle = new_id();
        self.entries.write().insert(handle.id(), callable);
        if let Err(err) = table.assign(handle, &prelude::stub(table.namespace(), handle.id())) {
            self.entries.write().remove(&handle.id());
            return Err(err);
        }
        debug!(target: TRACE_TARGET, id = handle.id(), "registered callback");
        Ok(handle)
    }

    #[must_use]
    pub fn contains(&self, id: u64) -> bool {
        self.entries.read().contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn remove(&self, id: u64) -> bool {
        self.entries.write().remove(&id).is_some()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Run the callable for `id` with already-decoded arguments.
    ///
    /// # Errors
    /// [`Error::UnregisteredCallback`] if nothing is registered under `id`, or
    /// [`Error::Callback`] if the callable fails.
    pub fn invoke(&self, id: u64, args: Vec<Value>) -> Result<Value> {
        // Clone out so the callable may re-enter the registry.
        let callable = self
            .entries
            .read()
            .get(&id)
            .cloned()
            .ok_or(Error::UnregisteredCallback { id })?;
        callable
            .call(args)
            .map_err(|source| Error::Callback { id, source })
    }

    /// Decode a literal argument table, invoke, and encode the result.
    ///
    /// # Errors
    /// See [`invoke`](Self::invoke); also fails if the argument text is not a
    /// table literal or the result cannot be expressed as a literal.
    pub fn dispatch(&self, id: u64, args: &str) -> Result<String> {
        let span = info_span!(target: TRACE_TARGET, "callback.dispatch", id);
        let _enter = span.enter();

        let args = positional_args(convert::deserialize(LuaType::Table, args)?, args)?;
        let result = self.invoke(id, args)?;
        convert::serialize(&result)
    }
}

/// Holes a sparse argument list may span beyond its entry count.
const MAX_SPARSE_ARGS: usize = 255;

/// `{...}` arrives as an array unless it has nil holes, in which case the
/// remote serializer emits a map keyed by position.
fn positional_args(table: Value, text: &str) -> Result<Vec<Value>> {
    match table {
        Value::Array(items) => Ok(items),
        Value::Map(entries) => {
            let indexed: Vec<(usize, Value)> = entries
                .into_iter()
                .filter_map(|(k, v)| match k {
                    Value::Int(i) if i > 0 => usize::try_from(i).ok().map(|i| (i, v)),
                    _ => None,
                })
                .collect();
            let limit = indexed.len().max(MAX_SPARSE_ARGS);
            let len = indexed.iter().map(|(i, _)| *i).max().unwrap_or(0);
            if len > limit {
                return Err(Error::MalformedTableText {
                    text: text.to_string(),
                });
            }
            let mut args = vec![Value::Nil; len];
            for (i, v) in indexed {
                args[i - 1] = v;
            }
            Ok(args)
        }
        other => Ok(vec![other]),
    }
}
