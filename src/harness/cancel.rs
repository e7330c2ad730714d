//! Run-level cancellation.
//!
//! A single [`CancelHandle`] is owned by whoever decides the run should stop (Ctrl-C, the `--max-time` deadline).
//! Every worker holds a cheap [`CancelToken`] clone and polls or awaits it.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Sending half: flips the run into the cancelled state.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Receiving half, cloned into every task.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

/// Create a connected handle/token pair.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

impl CancelHandle {
    /// Cancel the run. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        cancel_pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the run is cancelled. Pends forever if the handle is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        let closed = self.rx.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

/// Cancel the run on Ctrl-C or when `max_time` has elapsed, whichever comes first.
pub fn watch_interrupts(handle: CancelHandle, max_time: Option<Duration>) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            () = ctrl_c() => tracing::warn!("interrupted; stopping running tests"),
            () = deadline(max_time) => tracing::warn!("maximum run time reached; stopping running tests"),
        }
        handle.cancel();
    })
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::debug!("cannot listen for Ctrl-C: {err}");
        std::future::pending::<()>().await;
    }
}

async fn deadline(max_time: Option<Duration>) {
    match max_time {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending::<()>().await,
    }
}
