// src/engine/stop.rs

//! Cooperative stop requests for job runs.
//!
//! A stop never interrupts a dispatched unit: the run stops handing out new
//! units and waits for the in-flight ones to finish or time out.

use std::sync::Arc;

use tokio::sync::watch;

/// Sending side of a stop request.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Receiving side handed to a run.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

/// Create a connected handle/signal pair.
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx: Arc::new(tx) }, StopSignal { rx })
}

impl StopHandle {
    /// Request a stop. Idempotent.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// A new signal observing this handle.
    pub fn signal(&self) -> StopSignal {
        StopSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl StopSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once a stop has been requested; pends forever if the handle
    /// was dropped without stopping.
    pub async fn requested(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
