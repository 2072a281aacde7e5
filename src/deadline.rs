//! Cancellable one-shot timers.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// How an armed [`Deadline`] completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineEvent {
    /// The full duration elapsed.
    Fired,
    /// The arming was canceled or superseded before it elapsed.
    Canceled,
}

impl DeadlineEvent {
    /// True if the arming was canceled rather than fired.
    pub fn is_canceled(self) -> bool {
        matches!(self, DeadlineEvent::Canceled)
    }
}

type DeadlineHandler = Box<dyn FnOnce(DeadlineEvent) + Send>;

struct DeadlineState {
    /// Incremented on every arm and cancel so a completion from a
    /// superseded arming is dropped.
    generation: u64,
    pending: Option<DeadlineHandler>,
}

struct Shared {
    state: Mutex<DeadlineState>,
    /// Wakes the sleeping timer task early when its arming is superseded.
    rearm: Notify,
}

/// A cancellable one-shot timer.
///
/// Arming spawns a timer task for the stored default duration (or an
/// explicit one). When the duration elapses the handler is invoked with
/// [`DeadlineEvent::Fired`]; when the arming is canceled or superseded by a
/// rearm, the displaced handler is invoked with [`DeadlineEvent::Canceled`]
/// on the canceling thread. Each arming carries a generation token, so a
/// timer task that loses the race against a cancel or rearm finds a stale
/// generation and delivers nothing.
///
/// Must be armed from within a tokio runtime.
pub struct Deadline {
    duration: Duration,
    shared: Arc<Shared>,
}

impl Deadline {
    /// Create a deadline with a default duration for [`Deadline::start`].
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            shared: Arc::new(Shared {
                state: Mutex::new(DeadlineState {
                    generation: 0,
                    pending: None,
                }),
                rearm: Notify::new(),
            }),
        }
    }

    /// Arm the timer for the default duration.
    ///
    /// Rearming while armed is cancel-then-arm: the previous handler
    /// observes [`DeadlineEvent::Canceled`] before this call returns.
    pub fn start(&self, handler: impl FnOnce(DeadlineEvent) + Send + 'static) {
        self.start_with(self.duration, handler);
    }

    /// Arm the timer for an explicit duration.
    pub fn start_with(
        &self,
        duration: Duration,
        handler: impl FnOnce(DeadlineEvent) + Send + 'static,
    ) {
        let (generation, displaced) = {
            let mut state = self.shared.state.lock().expect("deadline state poisoned");
            state.generation += 1;
            (state.generation, state.pending.replace(Box::new(handler)))
        };
        self.shared.rearm.notify_waiters();
        if let Some(displaced) = displaced {
            displaced(DeadlineEvent::Canceled);
        }

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = shared.rearm.notified() => {}
            }
            let handler = {
                let mut state = shared.state.lock().expect("deadline state poisoned");
                if state.generation == generation {
                    state.pending.take()
                } else {
                    None
                }
            };
            if let Some(handler) = handler {
                handler(DeadlineEvent::Fired);
            }
        });
    }

    /// Cancel an armed timer.
    ///
    /// The pending handler observes [`DeadlineEvent::Canceled`] before this
    /// call returns. Idempotent, and safe after the timer has fired.
    pub fn cancel(&self) {
        let displaced = {
            let mut state = self.shared.state.lock().expect("deadline state poisoned");
            state.generation += 1;
            state.pending.take()
        };
        self.shared.rearm.notify_waiters();
        if let Some(displaced) = displaced {
            displaced(DeadlineEvent::Canceled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_duration() {
        let deadline = Deadline::new(Duration::from_secs(5));
        let (tx, rx) = tokio::sync::oneshot::channel();
        deadline.start(move |event| {
            let _ = tx.send(event);
        });

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(rx.await.unwrap(), DeadlineEvent::Fired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_delivers_canceled_synchronously() {
        let deadline = Deadline::new(Duration::from_secs(5));
        let events = Arc::new(Mutex::new(Vec::new()));

        let observed = events.clone();
        deadline.start(move |event| observed.lock().unwrap().push(event));

        deadline.cancel();
        assert_eq!(events.lock().unwrap().as_slice(), &[DeadlineEvent::Canceled]);

        // The stale timer task delivers nothing when its sleep elapses.
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let deadline = Deadline::new(Duration::from_secs(5));
        let count = Arc::new(AtomicUsize::new(0));

        let observer = count.clone();
        deadline.start(move |_| {
            observer.fetch_add(1, Ordering::SeqCst);
        });

        deadline.cancel();
        deadline.cancel();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_cancels_previous_arming() {
        let deadline = Deadline::new(Duration::from_secs(5));
        let events = Arc::new(Mutex::new(Vec::new()));

        let first = events.clone();
        deadline.start(move |event| first.lock().unwrap().push(("first", event)));

        tokio::time::sleep(Duration::from_secs(3)).await;

        let second = events.clone();
        deadline.start(move |event| second.lock().unwrap().push(("second", event)));
        assert_eq!(
            events.lock().unwrap().as_slice(),
            &[("first", DeadlineEvent::Canceled)]
        );

        // The second arming runs its full duration from the rearm.
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(
            events.lock().unwrap().as_slice(),
            &[
                ("first", DeadlineEvent::Canceled),
                ("second", DeadlineEvent::Fired)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_duration_overrides_default() {
        let deadline = Deadline::new(Duration::from_secs(60));
        let (tx, rx) = tokio::sync::oneshot::channel();
        deadline.start_with(Duration::from_secs(1), move |event| {
            let _ = tx.send(event);
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.await.unwrap(), DeadlineEvent::Fired);
    }
}
