//! Request-scoped cancellation and deadlines.
//!
//! A [`Context`] is handed to every engine operation and threaded through each store call and
//! the surrounding transaction. Store futures are raced against the cancellation signal and the
//! deadline, so a cancelled request stops at its next suspension point.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use doccrud::context::Context;
//!
//! let (ctx, handle) = Context::with_cancel();
//! let ctx = ctx.timeout(Duration::from_secs(5));
//!
//! // from another task
//! handle.cancel();
//! ```

use std::{future::Future, time::Duration};

use tokio::{sync::watch, time::Instant};

use crate::error::{CrudError, CrudResult};

/// Cancellation signal and optional deadline for one logical request.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancel: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

/// Owner side of a cancellable [`Context`].
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancels every context derived from this handle.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context paired with a handle that cancels it.
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (sender, receiver) = watch::channel(false);

        (Self { cancel: Some(receiver), deadline: None }, CancelHandle { sender })
    }

    /// Returns a copy of this context that expires after `timeout`, or at the current deadline
    /// when that is earlier.
    pub fn timeout(&self, timeout: Duration) -> Self {
        self.deadline(Instant::now() + timeout)
    }

    /// Returns a copy of this context that expires at `deadline`, or at the current deadline
    /// when that is earlier.
    pub fn deadline(&self, deadline: Instant) -> Self {
        Self {
            cancel: self.cancel.clone(),
            deadline: Some(self.deadline.map_or(deadline, |current| current.min(deadline))),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|cancel| *cancel.borrow())
    }

    /// Returns the error this context would fail with right now, if any.
    pub fn check(&self) -> CrudResult<()> {
        if self.is_cancelled() {
            return Err(CrudError::Cancelled);
        }

        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(CrudError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Drives `future` to completion unless the context is cancelled or its deadline passes
    /// first, in which case the future is dropped.
    pub async fn run<T, F>(&self, future: F) -> CrudResult<T>
    where
        F: Future<Output = CrudResult<T>>,
    {
        self.check()?;

        let bounded = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, future)
                    .await
                    .map_err(|_| CrudError::DeadlineExceeded)?,
                None => future.await,
            }
        };

        tokio::select! {
            result = bounded => result,
            _ = self.cancelled() => Err(CrudError::Cancelled),
        }
    }

    /// Resolves once the context is cancelled. Never resolves for contexts without a handle,
    /// or once the handle is dropped without cancelling.
    async fn cancelled(&self) {
        if let Some(mut cancel) = self.cancel.clone() {
            if cancel.wait_for(|cancelled| *cancelled).await.is_ok() {
                return;
            }
        }

        std::future::pending::<()>().await
    }
}
