//! Two-phase, vetoable notifications
//!
//! A [`VotingBus`] carries one kind of pending change (an addition, an
//! update or a removal) in two phases:
//!
//! ```text
//!   vote(args)   ──► every voter answers; result = AND of all answers
//!                    (true when nobody votes)
//!   notify(args) ──► only after the change was applied; informational
//! ```
//!
//! Handlers run in subscription order. A panicking voter counts as a veto,
//! a panicking listener is logged and skipped; neither stops its siblings.
//! Handlers are invoked outside the subscriber lock, so they may subscribe,
//! unsubscribe or publish onto other buses (bubbling) freely.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tracing::{error, warn};

type Voter<A> = Arc<dyn Fn(&A) -> bool + Send + Sync>;
type Listener<A> = Arc<dyn Fn(&A) + Send + Sync>;

struct Handlers<A> {
    voters: Vec<(u64, Voter<A>)>,
    listeners: Vec<(u64, Listener<A>)>,
}

struct BusInner<A> {
    name: &'static str,
    handlers: RwLock<Handlers<A>>,
    next_id: AtomicU64,
}

impl<A> BusInner<A> {
    fn remove(&self, id: u64) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.voters.retain(|(i, _)| *i != id);
        handlers.listeners.retain(|(i, _)| *i != id);
    }
}

pub struct VotingBus<A> {
    inner: Arc<BusInner<A>>,
}

impl<A> Clone for VotingBus<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A: 'static> VotingBus<A> {
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(BusInner {
                name,
                handlers: RwLock::new(Handlers {
                    voters: Vec::new(),
                    listeners: Vec::new(),
                }),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Register a voter. Returning `false` vetoes the pending change.
    pub fn on_vote(&self, voter: impl Fn(&A) -> bool + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .voters
            .push((id, Arc::new(voter)));
        self.subscription(id)
    }

    /// Register a listener for applied changes.
    pub fn on_notify(&self, listener: impl Fn(&A) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .listeners
            .push((id, Arc::new(listener)));
        self.subscription(id)
    }

    fn subscription(&self, id: u64) -> Subscription {
        let inner: Weak<BusInner<A>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.remove(id);
            }
        })
    }

    /// Ask every voter. All of them are asked even after a veto.
    pub fn vote(&self, args: &A) -> bool {
        let voters: Vec<Voter<A>> = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .voters
            .iter()
            .map(|(_, v)| v.clone())
            .collect();

        let mut accepted = true;
        for voter in voters {
            match panic::catch_unwind(AssertUnwindSafe(|| voter(args))) {
                Ok(true) => {}
                Ok(false) => accepted = false,
                Err(_) => {
                    error!(bus = self.inner.name, "Voter panicked, treating as veto");
                    accepted = false;
                }
            }
        }
        accepted
    }

    pub fn notify(&self, args: &A) {
        let listeners: Vec<Listener<A>> = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .listeners
            .iter()
            .map(|(_, l)| l.clone())
            .collect();

        for listener in listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(args))).is_err() {
                warn!(bus = self.inner.name, "Listener panicked, continuing with siblings");
            }
        }
    }

    /// Re-publish both phases onto a higher-level bus.
    pub fn forward_to(&self, target: &VotingBus<A>) -> Vec<Subscription> {
        let vote_target = target.clone();
        let notify_target = target.clone();
        vec![
            self.on_vote(move |args| vote_target.vote(args)),
            self.on_notify(move |args| notify_target.notify(args)),
        ]
    }

    pub fn voter_count(&self) -> usize {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .voters
            .len()
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .listeners
            .len()
    }
}

/// Handle of one registered handler; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately; call detach() to keep it"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(self) {
        drop(self)
    }

    /// Keep the handler registered for the lifetime of the bus.
    pub fn detach(mut self) {
        self.cancel = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    #[test]
    fn vote_passes_without_voters() {
        let bus: VotingBus<u32> = VotingBus::new("test");
        assert!(bus.vote(&1));
    }

    #[test]
    fn single_veto_rejects() {
        let bus: VotingBus<u32> = VotingBus::new("test");
        let _a = bus.on_vote(|_| true);
        let _b = bus.on_vote(|n| *n < 10);
        assert!(bus.vote(&5));
        assert!(!bus.vote(&50));
    }

    #[test]
    fn all_voters_are_asked_even_after_veto() {
        let bus: VotingBus<u32> = VotingBus::new("test");
        let asked = Arc::new(AtomicUsize::new(0));
        let _veto = bus.on_vote(|_| false);
        let counter = asked.clone();
        let _count = bus.on_vote(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });
        assert!(!bus.vote(&0));
        assert_eq!(asked.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listeners_run_in_subscription_order() {
        let bus: VotingBus<u32> = VotingBus::new("test");
        let order = Arc::new(Mutex::new(Vec::new()));
        let subs: Vec<Subscription> = (0..3)
            .map(|i| {
                let order = order.clone();
                bus.on_notify(move |_| order.lock().unwrap().push(i))
            })
            .collect();
        bus.notify(&0);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        drop(subs);
    }

    #[test]
    fn panicking_listener_does_not_stop_siblings() {
        let bus: VotingBus<u32> = VotingBus::new("test");
        let reached = Arc::new(AtomicUsize::new(0));
        let _bad = bus.on_notify(|_| panic!("listener failure"));
        let counter = reached.clone();
        let _good = bus.on_notify(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.notify(&0);
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_voter_counts_as_veto() {
        let bus: VotingBus<u32> = VotingBus::new("test");
        let _bad = bus.on_vote(|_| panic!("voter failure"));
        assert!(!bus.vote(&0));
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let bus: VotingBus<u32> = VotingBus::new("test");
        let sub = bus.on_vote(|_| false);
        assert_eq!(bus.voter_count(), 1);
        sub.unsubscribe();
        assert_eq!(bus.voter_count(), 0);
        assert!(bus.vote(&0));
    }

    #[test]
    fn detached_subscription_stays_registered() {
        let bus: VotingBus<u32> = VotingBus::new("test");
        bus.on_notify(|_| {}).detach();
        assert_eq!(bus.listener_count(), 1);
    }

    #[test]
    fn forwarded_bus_bubbles_votes_and_notifications() {
        let child: VotingBus<u32> = VotingBus::new("child");
        let parent: VotingBus<u32> = VotingBus::new("parent");
        let seen = Arc::new(AtomicUsize::new(0));

        let _wiring = child.forward_to(&parent);
        let _veto = parent.on_vote(|n| *n != 13);
        let counter = seen.clone();
        let _listen = parent.on_notify(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!child.vote(&13));
        assert!(child.vote(&1));
        child.notify(&1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        drop(_wiring);
        child.notify(&1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_may_subscribe_while_notified() {
        let bus: VotingBus<u32> = VotingBus::new("test");
        let inner_bus = bus.clone();
        let _sub = bus.on_notify(move |_| inner_bus.on_notify(|_| {}).detach());
        bus.notify(&0);
        assert_eq!(bus.listener_count(), 2);
    }
}
