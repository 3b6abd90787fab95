//! Background loops that stop between steps
//!
//! A loop only waits on its [`StopSignal`] while idle, so a stop never lands
//! in the middle of a flush or an ingest step. [`Worker::stop`] raises the
//! signal and waits for the loop to return.

use std::future::Future;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::error;

pub(crate) struct Worker {
    name: String,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Worker {
    pub fn spawn<F, Fut>(name: impl Into<String>, run: F) -> Self
    where
        F: FnOnce(StopSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop, signal) = watch::channel(false);
        let handle = tokio::spawn(run(StopSignal(signal)));
        Self {
            name: name.into(),
            stop,
            handle,
        }
    }

    /// Ask the loop to finish its current step and wait for it
    pub async fn stop(self) {
        // The loop may already be gone
        let _ = self.stop.send(true);
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                error!("Worker {} panicked", self.name);
            }
        }
    }
}

#[derive(Clone)]
pub(crate) struct StopSignal(watch::Receiver<bool>);

impl StopSignal {
    /// Resolves once a stop is requested or the worker handle is gone
    pub async fn requested(&mut self) {
        let _ = self.0.wait_for(|stop| *stop).await;
    }
}
