//! Listener registries.
//!
//! Listeners are stored by id in an unordered map. Dispatch works on a
//! snapshot taken under the lock and invokes callbacks with the lock
//! released, so a callback may register or unregister listeners (itself
//! included) without deadlocking. A listener registered during a dispatch is
//! not part of that dispatch's snapshot.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::error;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Slots<T> {
    next_id: u64,
    entries: HashMap<u64, Callback<T>>,
}

trait Unregister: Send + Sync {
    fn remove(&self, id: u64) -> bool;
}

impl<T: 'static> Unregister for Mutex<Slots<T>> {
    fn remove(&self, id: u64) -> bool {
        self.lock().entries.remove(&id).is_some()
    }
}

/// A set of callbacks receiving `&T`.
pub(crate) struct ListenerSet<T> {
    slots: Arc<Mutex<Slots<T>>>,
}

impl<T: 'static> ListenerSet<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                next_id: 0,
                entries: HashMap::new(),
            })),
        }
    }

    /// Register a callback.
    pub(crate) fn register(&self, callback: Callback<T>) -> Registration {
        let id = {
            let mut slots = self.slots.lock();
            let id = slots.next_id;
            slots.next_id += 1;
            slots.entries.insert(id, callback);
            id
        };
        let weak: Weak<Mutex<Slots<T>>> = Arc::downgrade(&self.slots);
        let handle: Weak<dyn Unregister> = weak;
        Registration { id, set: handle }
    }

    /// Invoke every listener registered at the time of the call.
    ///
    /// Returns the number of listeners invoked. A panicking listener is
    /// logged and does not prevent delivery to the others.
    pub(crate) fn dispatch(&self, value: &T) -> usize {
        let snapshot: Vec<Callback<T>> = self.slots.lock().entries.values().cloned().collect();
        for callback in &snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                error!("Listener panicked during dispatch");
            }
        }
        snapshot.len()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().entries.len()
    }
}

/// Handle returned by listener registration.
///
/// Dropping the handle keeps the listener registered; call
/// [`Registration::unsubscribe`] to remove it.
pub struct Registration {
    id: u64,
    set: Weak<dyn Unregister>,
}

impl Registration {
    /// Remove the listener. Returns `false` if it was already removed.
    ///
    /// Safe to call from inside the listener's own callback.
    pub fn unsubscribe(&self) -> bool {
        self.set.upgrade().is_some_and(|set| set.remove(self.id))
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration").field("id", &self.id).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, Callback<bool>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (
            count,
            Arc::new(move |_: &bool| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn dispatch_reaches_every_listener() {
        let set = ListenerSet::<bool>::new();
        let (a, cb_a) = counter();
        let (b, cb_b) = counter();
        let _ra = set.register(cb_a);
        let _rb = set.register(cb_b);

        assert_eq!(set.dispatch(&true), 2);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let set = ListenerSet::<bool>::new();
        let (count, cb) = counter();
        let reg = set.register(cb);

        assert!(reg.unsubscribe());
        assert!(!reg.unsubscribe());
        set.dispatch(&false);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn listener_can_unsubscribe_itself_during_dispatch() {
        let set = ListenerSet::<bool>::new();
        let slot: Arc<Mutex<Option<Registration>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(AtomicUsize::new(0));

        let slot_cb = Arc::clone(&slot);
        let calls_cb = Arc::clone(&calls);
        let reg = set.register(Arc::new(move |_: &bool| {
            calls_cb.fetch_add(1, Ordering::SeqCst);
            if let Some(reg) = slot_cb.lock().as_ref() {
                reg.unsubscribe();
            }
        }));
        *slot.lock() = Some(reg);

        set.dispatch(&true);
        set.dispatch(&true);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn listener_added_during_dispatch_waits_for_next_event() {
        let set = Arc::new(ListenerSet::<bool>::new());
        let (late_count, late_cb) = counter();
        let late_cb = Arc::new(Mutex::new(Some(late_cb)));

        let set_cb = Arc::clone(&set);
        let _reg = set.register(Arc::new(move |_: &bool| {
            if let Some(cb) = late_cb.lock().take() {
                let _late = set_cb.register(cb);
            }
        }));

        assert_eq!(set.dispatch(&true), 1);
        assert_eq!(late_count.load(Ordering::SeqCst), 0);

        assert_eq!(set.dispatch(&true), 2);
        assert_eq!(late_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let set = ListenerSet::<bool>::new();
        let (count, cb) = counter();
        let _bad = set.register(Arc::new(|_: &bool| panic!("listener bug")));
        let _good = set.register(cb);

        assert_eq!(set.dispatch(&true), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registration_outliving_set_is_harmless() {
        let set = ListenerSet::<bool>::new();
        let (_count, cb) = counter();
        let reg = set.register(cb);
        drop(set);
        assert!(!reg.unsubscribe());
    }
}
