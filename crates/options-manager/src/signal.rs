//! Session-wide stop signal.
//!
//! Legs wait on a [`StopSignal`]; whoever holds the [`StopHandle`] (the CLI's
//! signal handler, an embedder) can ask every leg to wind down.

use std::time::Duration;

use tokio::sync::watch;

/// Sender half. Dropping it does not stop the session.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: std::sync::Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiver half, cheap to clone into every leg.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

#[must_use]
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (
        StopHandle {
            tx: std::sync::Arc::new(tx),
        },
        StopSignal { rx },
    )
}

impl StopSignal {
    /// A signal that never fires.
    #[must_use]
    pub fn never() -> Self {
        stop_channel().1
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once a stop is requested. Pending forever if the handle is
    /// dropped without stopping.
    pub async fn stopped(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|stopped| *stopped).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Sleeps for `duration`. Returns `false` if interrupted by a stop.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_stopped() {
            return false;
        }
        tokio::select! {
            () = tokio::time::sleep(duration) => true,
            () = self.stopped() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_without_stop() {
        let (_handle, signal) = stop_channel();
        assert!(signal.sleep(Duration::from_secs(5)).await);
        assert!(!signal.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_sleep() {
        let (handle, signal) = stop_channel();
        let sleeper = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.sleep(Duration::from_secs(3600)).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.stop();
        assert!(!sleeper.await.unwrap());
        assert!(signal.is_stopped());
        assert!(!signal.sleep(Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_handle_never_fires() {
        let signal = StopSignal::never();
        assert!(signal.sleep(Duration::from_secs(10)).await);
        let waited = tokio::time::timeout(Duration::from_secs(10), signal.stopped()).await;
        assert!(waited.is_err());
    }
}
