//! One-shot, multi-consumer notification queues.
//!
//! A [`Subscriber`] holds the handlers waiting for the next occurrence of a
//! single message variant. A relay drains the current set of handlers and
//! invokes each one exactly once; a handler that wants the occurrence after
//! that must resubscribe. There is no unsubscribe, the only way to release
//! waiters is the terminal [`Subscriber::stop`] relay.

use crate::error::ChannelError;
use std::sync::Mutex;

type Handler<T> = Box<dyn FnOnce(Result<T, ChannelError>) + Send>;

enum State<T> {
    /// Accepting handlers for the next relay.
    Open(Vec<Handler<T>>),
    /// Terminally relayed. Late subscribers are notified synchronously
    /// with the stored code.
    Closed(ChannelError),
}

/// A one-shot multi-consumer queue for a single message variant.
///
/// `subscribe` is synchronous: a handler registered before a relay is
/// guaranteed to observe that relay, and a handler registered during a
/// relay waits for the next one. Once stopped, the queue notifies every
/// pending handler, refuses new registrations, and answers late
/// subscribers immediately with the closing code.
pub struct Subscriber<T> {
    state: Mutex<State<T>>,
}

impl<T: Clone> Subscriber<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Open(Vec::new())),
        }
    }

    /// Register a handler for the next relay.
    ///
    /// If the queue is already closed the handler is invoked on the calling
    /// thread, before this method returns, with the closing code.
    pub fn subscribe(&self, handler: impl FnOnce(Result<T, ChannelError>) + Send + 'static) {
        let closed = {
            let mut state = self.state.lock().expect("subscriber state poisoned");
            match &mut *state {
                State::Open(handlers) => {
                    handlers.push(Box::new(handler));
                    return;
                }
                State::Closed(code) => *code,
            }
        };
        handler(Err(closed));
    }

    /// Deliver `result` to every pending handler and clear them.
    ///
    /// Handlers run on the calling thread, outside the queue lock, so a
    /// handler may resubscribe; it will then wait for the next relay. A
    /// relay on a closed queue is a no-op.
    pub fn relay(&self, result: Result<T, ChannelError>) {
        let handlers = {
            let mut state = self.state.lock().expect("subscriber state poisoned");
            match &mut *state {
                State::Open(handlers) => std::mem::take(handlers),
                State::Closed(_) => return,
            }
        };
        for handler in handlers {
            handler(result.clone());
        }
    }

    /// Terminally relay `code` and close the queue.
    ///
    /// Pending handlers receive `Err(code)`; handlers subscribed from now
    /// on are answered synchronously with the same code. Idempotent, the
    /// first closing code wins.
    pub fn stop(&self, code: ChannelError) {
        let handlers = {
            let mut state = self.state.lock().expect("subscriber state poisoned");
            match &mut *state {
                State::Open(handlers) => {
                    let pending = std::mem::take(handlers);
                    *state = State::Closed(code);
                    pending
                }
                State::Closed(_) => return,
            }
        };
        for handler in handlers {
            handler(Err(code));
        }
    }
}

impl<T: Clone> Default for Subscriber<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_relay_notifies_all_pending_once() {
        let subscriber = Subscriber::<u32>::new();
        let observed = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..2 {
            let observed = observed.clone();
            subscriber.subscribe(move |result| {
                observed.lock().unwrap().push(result);
            });
        }

        subscriber.relay(Ok(7));
        assert_eq!(observed.lock().unwrap().as_slice(), &[Ok(7), Ok(7)]);

        // Neither handler resubscribed, so a second relay reaches nobody.
        subscriber.relay(Ok(8));
        assert_eq!(observed.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_handler_subscribed_during_relay_waits_for_next() {
        let subscriber = Arc::new(Subscriber::<u32>::new());
        let count = Arc::new(AtomicUsize::new(0));

        let resubscribed = {
            let subscriber = subscriber.clone();
            let count = count.clone();
            move |_result: Result<u32, ChannelError>| {
                count.fetch_add(1, Ordering::SeqCst);
                let count = count.clone();
                subscriber.subscribe(move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                });
            }
        };
        subscriber.subscribe(resubscribed);

        subscriber.relay(Ok(1));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        subscriber.relay(Ok(2));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stop_drains_with_code_and_closes() {
        let subscriber = Subscriber::<u32>::new();
        let observed = Arc::new(Mutex::new(Vec::new()));

        {
            let observed = observed.clone();
            subscriber.subscribe(move |result| observed.lock().unwrap().push(result));
        }

        subscriber.stop(ChannelError::Timeout);
        assert_eq!(
            observed.lock().unwrap().as_slice(),
            &[Err(ChannelError::Timeout)]
        );

        // A second stop keeps the first code.
        subscriber.stop(ChannelError::BadStream);
        {
            let observed = observed.clone();
            subscriber.subscribe(move |result| observed.lock().unwrap().push(result));
        }
        assert_eq!(
            observed.lock().unwrap().as_slice(),
            &[Err(ChannelError::Timeout), Err(ChannelError::Timeout)]
        );
    }

    #[test]
    fn test_subscribe_after_stop_is_synchronous() {
        let subscriber = Subscriber::<u32>::new();
        subscriber.stop(ChannelError::Stopped);

        let notified = Arc::new(AtomicUsize::new(0));
        let observer = notified.clone();
        subscriber.subscribe(move |result| {
            assert_eq!(result, Err(ChannelError::Stopped));
            observer.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_relay_after_stop_reaches_nobody() {
        let subscriber = Subscriber::<u32>::new();
        subscriber.stop(ChannelError::Stopped);

        let notified = Arc::new(AtomicUsize::new(0));
        let observer = notified.clone();
        subscriber.subscribe(move |_| {
            observer.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(notified.load(Ordering::SeqCst), 1);

        subscriber.relay(Ok(1));
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }
}
