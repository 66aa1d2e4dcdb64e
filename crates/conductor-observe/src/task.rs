//! Handle for a periodic background task with cooperative shutdown

use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

#[derive(Debug)]
pub struct BackgroundTask {
    name: &'static str,
    cancel_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Run `tick` every `period` until stopped
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    _ = interval.tick() => tick().await,
                }
            }
            debug!(task = name, "background task stopped");
        });
        Self {
            name,
            cancel_tx: Some(cancel_tx),
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the task and wait for it to exit
    pub async fn stop(mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.handle).await {
            if e.is_panic() {
                tracing::warn!(task = self.name, "background task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let task = BackgroundTask::spawn_periodic("counter", Duration::from_millis(10), move || {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(55)).await;
        task.stop().await;
        let after_stop = count.load(Ordering::SeqCst);
        assert!(after_stop >= 5, "ticked {after_stop} times");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }
}
