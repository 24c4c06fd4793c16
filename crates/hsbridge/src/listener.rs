//! Resident HTTP listener that remote callback stubs post to.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use tokio::{net::TcpListener, sync::oneshot};
use tracing::{info, warn};

use crate::{TRACE_TARGET, callback::CallbackRegistry, error::Error, runtime::Executor};

struct DispatchError(Error);

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            Error::UnregisteredCallback { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.0.to_string()).into_response()
    }
}

async fn call(
    State(registry): State<Arc<CallbackRegistry>>,
    Path(id): Path<u64>,
    body: String,
) -> Result<String, DispatchError> {
    let result = tokio::task::spawn_blocking(move || registry.dispatch(id, &body))
        .await
        .map_err(|err| DispatchError(Error::Io(std::io::Error::other(err))))?;
    result.map_err(|err| {
        warn!(target: TRACE_TARGET, id, error = %err, "callback dispatch failed");
        DispatchError(err)
    })
}

pub(crate) fn router(registry: Arc<CallbackRegistry>) -> Router {
    Router::new()
        .route("/call/{id}", post(call))
        .with_state(registry)
}

/// Serves `POST /call/{id}` until dropped.
pub(crate) struct DispatchListener {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl DispatchListener {
    pub(crate) fn spawn(
        executor: &Executor,
        bind: SocketAddr,
        registry: Arc<CallbackRegistry>,
    ) -> std::io::Result<Self> {
        let listener = executor.block_on(TcpListener::bind(bind))?;
        let addr = listener.local_addr()?;
        let (tx, rx) = oneshot::channel::<()>();

        executor.handle().spawn(async move {
            let serve = axum::serve(listener, router(registry)).with_graceful_shutdown(async move {
                let _ = rx.await;
            });
            if let Err(err) = serve.await {
                warn!(target: TRACE_TARGET, error = %err, "dispatch listener stopped");
            }
        });
        info!(target: TRACE_TARGET, %addr, "dispatch listener started");

        Ok(Self {
            addr,
            shutdown: Some(tx),
        })
    }

    /// Base URL for remote stubs.
    pub(crate) fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for DispatchListener {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
