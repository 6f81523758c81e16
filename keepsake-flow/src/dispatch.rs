use crate::session::{Session, SessionWarning};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

pub(crate) type SessionListener = Arc<dyn Fn(&Session) + Send + Sync>;
pub(crate) type WarningListener = Arc<dyn Fn(&SessionWarning) + Send + Sync>;

#[derive(Clone)]
enum Listener {
    Session(SessionListener),
    Warning(WarningListener),
}

struct Entry {
    id: u64,
    // Only queued items with a larger sequence number reach this listener.
    after: u64,
    listener: Listener,
}

/// Something published to every listener of the matching kind.
pub(crate) enum Delivery {
    Session(Session),
    Warning(SessionWarning),
}

enum Queued {
    Broadcast { seq: u64, delivery: Delivery },
    Replay { id: u64, session: Session },
}

#[derive(Default)]
struct Registry {
    entries: Vec<Entry>,
    outbox: VecDeque<Queued>,
    next_id: u64,
    seq: u64,
    // Thread currently draining the outbox.
    dispatcher: Option<ThreadId>,
    // Subscriptions whose replay has been queued but not yet delivered.
    pending_replays: HashSet<u64>,
}

impl Registry {
    fn targets(&self, queued: &Queued) -> Vec<Listener> {
        match queued {
            Queued::Broadcast { seq, delivery } => self
                .entries
                .iter()
                .filter(|e| e.after < *seq)
                .filter(|e| {
                    matches!(
                        (&e.listener, delivery),
                        (Listener::Session(_), Delivery::Session(_))
                            | (Listener::Warning(_), Delivery::Warning(_))
                    )
                })
                .map(|e| e.listener.clone())
                .collect(),
            Queued::Replay { id, .. } => self
                .entries
                .iter()
                .filter(|e| e.id == *id)
                .map(|e| e.listener.clone())
                .collect(),
        }
    }
}

/// Serializes listener notifications.
///
/// Publications are queued in an outbox and drained by whichever caller finds the dispatcher
/// idle. Listeners run without any lock held, so they may publish, subscribe or unsubscribe;
/// anything they queue is delivered after the current item has reached every target.
#[derive(Default)]
pub(crate) struct Dispatcher {
    registry: Mutex<Registry>,
    replayed: Condvar,
}

impl Dispatcher {
    pub(crate) fn enqueue(&self, delivery: Delivery) {
        let mut registry = self.registry.lock();
        registry.seq += 1;
        let seq = registry.seq;
        registry.outbox.push_back(Queued::Broadcast { seq, delivery });
    }

    /// Register a session listener and queue its replay of `current`.
    ///
    /// Must be called while the caller holds the lock that orders publications, so that
    /// `current` is the latest published session.
    pub(crate) fn subscribe_session(
        self: &Arc<Self>,
        listener: SessionListener,
        current: Session,
    ) -> Subscription {
        let mut registry = self.registry.lock();
        registry.next_id += 1;
        registry.seq += 1;
        let (id, seq) = (registry.next_id, registry.seq);
        registry.outbox.push_back(Queued::Replay {
            id,
            session: current,
        });
        registry.pending_replays.insert(id);
        registry.entries.push(Entry {
            id,
            after: seq,
            listener: Listener::Session(listener),
        });
        Subscription::new(id, self)
    }

    pub(crate) fn subscribe_warnings(self: &Arc<Self>, listener: WarningListener) -> Subscription {
        let mut registry = self.registry.lock();
        registry.next_id += 1;
        let (id, after) = (registry.next_id, registry.seq);
        registry.entries.push(Entry {
            id,
            after,
            listener: Listener::Warning(listener),
        });
        Subscription::new(id, self)
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.registry.lock().entries.len()
    }

    fn remove(&self, id: u64) {
        let removed = {
            let mut registry = self.registry.lock();
            registry
                .entries
                .iter()
                .position(|e| e.id == id)
                .map(|index| registry.entries.remove(index))
        };
        // The listener may own other subscriptions; drop it with the lock released.
        drop(removed);
    }

    /// Deliver everything queued so far. Returns immediately if another call is already
    /// draining the outbox; that call picks up the new items.
    pub(crate) fn flush(&self) {
        {
            let mut registry = self.registry.lock();
            if registry.dispatcher.is_some() {
                return;
            }
            registry.dispatcher = Some(thread::current().id());
        }

        loop {
            let (queued, targets) = {
                let mut registry = self.registry.lock();
                match registry.outbox.pop_front() {
                    Some(queued) => {
                        let targets = registry.targets(&queued);
                        (queued, targets)
                    }
                    None => {
                        registry.dispatcher = None;
                        drop(registry);
                        self.replayed.notify_all();
                        return;
                    }
                }
            };

            for listener in &targets {
                invoke(listener, &queued);
            }

            if let Queued::Replay { id, .. } = queued {
                self.registry.lock().pending_replays.remove(&id);
                self.replayed.notify_all();
            }
        }
    }

    /// Flush, then block until the replay queued for subscription `id` has been delivered.
    ///
    /// When another thread is draining the outbox the caller waits for it. When the caller is
    /// the draining thread (a listener subscribing from its callback) the replay stays queued
    /// behind the current item and this returns at once.
    pub(crate) fn flush_replay(&self, id: u64) {
        self.flush();
        let me = thread::current().id();
        let mut registry = self.registry.lock();
        while registry.pending_replays.contains(&id) {
            match registry.dispatcher {
                Some(owner) if owner == me => return,
                Some(_) => self.replayed.wait(&mut registry),
                None => {
                    drop(registry);
                    self.flush();
                    registry = self.registry.lock();
                }
            }
        }
    }
}

fn invoke(listener: &Listener, queued: &Queued) {
    let outcome = catch_unwind(AssertUnwindSafe(|| match (listener, queued) {
        (
            Listener::Session(f),
            Queued::Broadcast {
                delivery: Delivery::Session(session),
                ..
            },
        )
        | (Listener::Session(f), Queued::Replay { session, .. }) => f(session),
        (
            Listener::Warning(f),
            Queued::Broadcast {
                delivery: Delivery::Warning(warning),
                ..
            },
        ) => f(warning),
        _ => {}
    }));
    if outcome.is_err() {
        log::error!("session listener panicked; continuing dispatch");
    }
}

/// A registered listener.
///
/// Dropping the subscription (or passing it to `SessionController::unsubscribe`) removes the
/// listener. A notification cycle already in progress may still reach it once.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    dispatcher: Weak<Dispatcher>,
}

impl Subscription {
    fn new(id: u64, dispatcher: &Arc<Dispatcher>) -> Self {
        Self {
            id,
            dispatcher: Arc::downgrade(dispatcher),
        }
    }

    /// Identifier of this subscription, unique per controller.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.remove(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionState;

    fn session(revision: u64) -> Session {
        Session::new(revision, SessionState::SignedOut)
    }

    fn recorder(dispatcher: &Arc<Dispatcher>, current: Session) -> (Arc<Mutex<Vec<u64>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let subscription = dispatcher.subscribe_session(
            Arc::new(move |s: &Session| sink.lock().push(s.revision())),
            current,
        );
        (seen, subscription)
    }

    #[test]
    fn replay_is_not_followed_by_older_broadcasts() {
        let dispatcher = Arc::new(Dispatcher::default());
        dispatcher.enqueue(Delivery::Session(session(1)));
        let (seen, _sub) = recorder(&dispatcher, session(1));
        dispatcher.enqueue(Delivery::Session(session(2)));
        dispatcher.flush();

        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn dropped_subscription_stops_receiving() {
        let dispatcher = Arc::new(Dispatcher::default());
        let (seen, sub) = recorder(&dispatcher, session(0));
        dispatcher.flush();
        drop(sub);
        dispatcher.enqueue(Delivery::Session(session(1)));
        dispatcher.flush();

        assert_eq!(*seen.lock(), vec![0]);
        assert_eq!(dispatcher.listener_count(), 0);
    }

    #[test]
    fn panicking_listener_does_not_stall_dispatch() {
        let dispatcher = Arc::new(Dispatcher::default());
        let _bad = dispatcher.subscribe_session(Arc::new(|_: &Session| panic!("boom")), session(0));
        let (seen, _sub) = recorder(&dispatcher, session(0));
        dispatcher.enqueue(Delivery::Session(session(1)));
        dispatcher.flush();

        assert_eq!(*seen.lock(), vec![0, 1]);
    }

    #[test]
    fn replay_waits_for_a_dispatch_running_on_another_thread() {
        let dispatcher = Arc::new(Dispatcher::default());
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let entered_tx = Mutex::new(entered_tx);
        let _slow = dispatcher.subscribe_session(
            Arc::new(move |s: &Session| {
                if s.revision() == 1 {
                    let _ = entered_tx.lock().send(());
                    thread::sleep(std::time::Duration::from_millis(200));
                }
            }),
            session(0),
        );
        dispatcher.flush();
        dispatcher.enqueue(Delivery::Session(session(1)));
        let worker = {
            let dispatcher = dispatcher.clone();
            thread::spawn(move || dispatcher.flush())
        };
        entered_rx.recv().unwrap();

        let (seen, sub) = recorder(&dispatcher, session(1));
        dispatcher.flush_replay(sub.id());

        assert_eq!(*seen.lock(), vec![1]);
        worker.join().unwrap();
    }

    #[test]
    fn warnings_only_reach_warning_listeners() {
        let dispatcher = Arc::new(Dispatcher::default());
        let (seen, _sub) = recorder(&dispatcher, session(0));
        let warnings = Arc::new(Mutex::new(0usize));
        let counter = warnings.clone();
        let _w = dispatcher.subscribe_warnings(Arc::new(move |_: &SessionWarning| {
            *counter.lock() += 1;
        }));
        dispatcher.enqueue(Delivery::Warning(SessionWarning::SignOutFailed {
            error: keepsake_core::AuthError::Network("down".into()),
        }));
        dispatcher.flush();

        assert_eq!(*seen.lock(), vec![0]);
        assert_eq!(*warnings.lock(), 1);
    }
}
