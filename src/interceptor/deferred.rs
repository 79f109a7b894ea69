//! Post-response actions
//!
//! A [`DeferredTasks`] list travels with the request and the response. The
//! interceptor wraps the response body in [`DeferredBody`]; once the body has
//! been streamed to the transport (or dropped) the list runs in FIFO order on
//! a spawned task, each action isolated from the others.

use axum::body::{Body, Bytes};
use futures::future::BoxFuture;
use futures::FutureExt;
use http_body::{Body as HttpBody, Frame, SizeHint};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

type Action = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

struct NamedAction {
    name: String,
    action: Action,
}

/// Ordered list of actions to run after the response is released
///
/// Clones share the same list.
#[derive(Clone, Default)]
pub struct DeferredTasks {
    actions: Arc<Mutex<Vec<NamedAction>>>,
}

impl DeferredTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action; it runs after every action pushed before it
    pub fn push<F, Fut>(&self, name: impl Into<String>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.lock().push(NamedAction {
            name: name.into(),
            action: Box::new(move || action().boxed()),
        });
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether `other` shares this list
    pub fn same_list(&self, other: &DeferredTasks) -> bool {
        Arc::ptr_eq(&self.actions, &other.actions)
    }

    /// Move every action of `other` to the end of this list
    pub fn append(&self, other: &DeferredTasks) {
        if self.same_list(other) {
            return;
        }
        let moved = std::mem::take(&mut *other.lock());
        self.lock().extend(moved);
    }

    /// Run every queued action in order
    ///
    /// An error or panic in one action is logged and the next one still runs.
    pub async fn run(self) {
        let actions = std::mem::take(&mut *self.lock());

        for NamedAction { name, action } in actions {
            let result = AssertUnwindSafe(async move { action().await })
                .catch_unwind()
                .await;

            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(action = %name, error = %e, "Deferred action failed");
                }
                Err(panic) => {
                    tracing::error!(
                        action = %name,
                        panic = %panic_message(panic.as_ref()),
                        "Deferred action panicked"
                    );
                }
            }
        }
    }

    /// Run the list on a background task
    pub fn spawn(self) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(self.run());
            }
            Err(_) => {
                tracing::warn!(
                    pending = self.len(),
                    "No runtime available, dropping deferred actions"
                );
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<NamedAction>> {
        self.actions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Description of a panic payload
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Response body that releases its [`DeferredTasks`] when dropped
pub struct DeferredBody {
    inner: Body,
    tasks: Option<DeferredTasks>,
}

impl DeferredBody {
    pub fn wrap(inner: Body, tasks: DeferredTasks) -> Body {
        Body::new(Self {
            inner,
            tasks: Some(tasks),
        })
    }
}

impl HttpBody for DeferredBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for DeferredBody {
    fn drop(&mut self) {
        if let Some(tasks) = self.tasks.take() {
            tasks.spawn();
        }
    }
}
