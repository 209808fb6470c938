//! Background polling for object updates.
//!
//! A poller sleeps for its interval, asks the service for updated objects of
//! one type and hands each of them to the application, in the order the
//! service listed them. The first request also asks for objects already
//! marked received, so objects that were received but never consumed before
//! a crash are delivered again. Failed polls are logged and retried on the
//! next tick at the same interval.

use futures::FutureExt;
use std::collections::HashSet;
use std::future::{self, Future};
use std::ops::ControlFlow;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::client::SyncServiceClient;
use crate::error::{Error, Result};
use crate::types::ObjectMetadata;

/// Handle to a running poller.
///
/// Dropping the handle stops the poller, as does [`stop`](Self::stop) or
/// cancelling the token it was started with. A request already in flight
/// completes and its updates are still delivered; no request is issued after
/// that.
#[must_use = "the poller stops when its handle is dropped"]
#[derive(Debug)]
pub struct UpdatePoller {
    object_type: String,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl UpdatePoller {
    pub fn object_type(&self) -> &str {
        &self.object_type
    }

    /// Ask the worker to stop.
    ///
    /// The object type stays registered on the client until the worker has
    /// exited, so starting a replacement poller for it right away fails with
    /// [`Error::PollerAlreadyRunning`]. Await [`join`](Self::join) first.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Wait for the worker to exit. A panic raised by the callback is
    /// propagated to the caller.
    pub async fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    std::panic::resume_unwind(e.into_panic());
                }
            }
        }
    }
}

impl Drop for UpdatePoller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Claim on an object type in the client's poller registry, released when
/// the worker exits
struct Registration {
    pollers: Arc<Mutex<HashSet<String>>>,
    object_type: String,
}

impl Registration {
    fn acquire(pollers: &Arc<Mutex<HashSet<String>>>, object_type: &str) -> Result<Self> {
        let mut active = pollers.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(object_type.to_string()) {
            return Err(Error::PollerAlreadyRunning(object_type.to_string()));
        }
        Ok(Self {
            pollers: Arc::clone(pollers),
            object_type: object_type.to_string(),
        })
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.pollers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.object_type);
    }
}

impl SyncServiceClient {
    /// Poll for updates of `object_type` every `interval`, calling `callback`
    /// once per updated object.
    ///
    /// The future returned by the callback is awaited before the next object
    /// is delivered, so the callback can fetch the object's data and mark it
    /// consumed before anything else happens. Delivery is at least once: an
    /// object keeps being reported until it is marked received or consumed.
    ///
    /// Fails with [`Error::Configuration`] when called outside a Tokio
    /// runtime.
    pub fn start_polling_for_updates<F, Fut>(
        &self,
        object_type: &str,
        interval: Duration,
        mut callback: F,
    ) -> Result<UpdatePoller>
    where
        F: FnMut(ObjectMetadata) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn_poller(
            object_type,
            interval,
            CancellationToken::new(),
            future::pending(),
            move |meta| callback(meta).map(ControlFlow::Continue),
        )
    }

    /// Like [`start_polling_for_updates`](Self::start_polling_for_updates),
    /// but the poller also stops when `cancel` is cancelled
    pub fn start_polling_with_cancellation<F, Fut>(
        &self,
        object_type: &str,
        interval: Duration,
        cancel: &CancellationToken,
        mut callback: F,
    ) -> Result<UpdatePoller>
    where
        F: FnMut(ObjectMetadata) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn_poller(
            object_type,
            interval,
            cancel.child_token(),
            future::pending(),
            move |meta| callback(meta).map(ControlFlow::Continue),
        )
    }

    /// Poll for updates of `object_type`, delivering them over a channel.
    /// The poller stops once the receiver is dropped.
    pub fn start_polling_for_updates_channel(
        &self,
        object_type: &str,
        interval: Duration,
    ) -> Result<(UpdatePoller, mpsc::UnboundedReceiver<ObjectMetadata>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let watch = tx.clone();
        let poller = self.spawn_poller(
            object_type,
            interval,
            CancellationToken::new(),
            async move { watch.closed().await },
            move |meta| {
                future::ready(match tx.send(meta) {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(_) => ControlFlow::Break(()),
                })
            },
        )?;
        Ok((poller, rx))
    }

    fn spawn_poller<C, D, Fut>(
        &self,
        object_type: &str,
        interval: Duration,
        cancel: CancellationToken,
        closed: C,
        deliver: D,
    ) -> Result<UpdatePoller>
    where
        C: Future<Output = ()> + Send + 'static,
        D: FnMut(ObjectMetadata) -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        if interval.is_zero() {
            return Err(Error::Configuration("poll interval must be positive".to_string()));
        }
        let runtime = Handle::try_current()
            .map_err(|_| Error::Configuration("update poller requires a Tokio runtime".to_string()))?;
        let registration = Registration::acquire(&self.pollers, object_type)?;

        let handle = runtime.spawn(poll_updates(
            self.clone(),
            object_type.to_string(),
            interval,
            cancel.clone(),
            closed,
            deliver,
            registration,
        ));

        Ok(UpdatePoller {
            object_type: object_type.to_string(),
            cancel,
            handle: Some(handle),
        })
    }
}

async fn poll_updates<C, D, Fut>(
    client: SyncServiceClient,
    object_type: String,
    interval: Duration,
    cancel: CancellationToken,
    closed: C,
    mut deliver: D,
    _registration: Registration,
) where
    C: Future<Output = ()> + Send + 'static,
    D: FnMut(ObjectMetadata) -> Fut + Send + 'static,
    Fut: Future<Output = ControlFlow<()>> + Send + 'static,
{
    info!(object_type = %object_type, interval = ?interval, "update poller started");
    tokio::pin!(closed);
    let mut first_poll = true;

    'poll: loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = &mut closed => {
                info!(object_type = %object_type, "update receiver dropped");
                break;
            }
            () = tokio::time::sleep(interval) => {}
        }

        match client.get_updated_objects(&object_type, first_poll).await {
            Ok(updates) => {
                // 404 comes back as an empty list and also ends the first poll
                first_poll = false;
                for meta in updates {
                    let key = meta.key();
                    match AssertUnwindSafe(async { deliver(meta).await }).catch_unwind().await {
                        Ok(flow) if flow.is_break() => break 'poll,
                        Ok(_) => {}
                        Err(panic) => {
                            error!(object_type = %object_type, object = %key, "update callback panicked, poller stopped");
                            std::panic::resume_unwind(panic);
                        }
                    }
                }
            }
            Err(e) => {
                warn!(object_type = %object_type, error = %e, "poll for updates failed");
            }
        }
    }

    info!(object_type = %object_type, "update poller stopped");
}
