use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use derive_more::Display;
use tokio::sync::watch;
use tracing::debug;

/// Lifecycle of a plugin server.
///
/// `Created -> Listening -> Advertising -> (Allocating <-> Advertising) -> Stopped`.
/// A stopped plugin can be started again after a kubelet restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PluginState {
    Created,
    Listening,
    Advertising,
    Allocating,
    Stopped,
}

/// Tracks the plugin state; `Allocating` is derived from in-flight calls.
#[derive(Debug)]
pub struct StateTracker {
    base: watch::Sender<PluginState>,
    allocations_in_flight: Arc<AtomicUsize>,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StateTracker {
    pub fn new() -> Self {
        let (base, _) = watch::channel(PluginState::Created);
        Self {
            base,
            allocations_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn current(&self) -> PluginState {
        let base = *self.base.borrow();
        if base == PluginState::Advertising && self.allocations_in_flight.load(Ordering::SeqCst) > 0
        {
            PluginState::Allocating
        } else {
            base
        }
    }

    pub fn listening(&self) {
        self.transition(PluginState::Listening);
    }

    /// The first discovery stream moves a listening plugin to `Advertising`.
    pub fn advertising(&self) {
        self.base.send_if_modified(|state| {
            if *state == PluginState::Listening {
                *state = PluginState::Advertising;
                debug!("plugin state: {}", state);
                true
            } else {
                false
            }
        });
    }

    pub fn stopped(&self) {
        self.transition(PluginState::Stopped);
    }

    /// Marks an allocation as in flight until the guard is dropped.
    pub fn begin_allocation(&self) -> AllocationGuard {
        self.allocations_in_flight.fetch_add(1, Ordering::SeqCst);
        AllocationGuard {
            allocations_in_flight: self.allocations_in_flight.clone(),
        }
    }

    fn transition(&self, next: PluginState) {
        self.base.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            debug!("plugin state: {} -> {}", state, next);
            *state = next;
            true
        });
    }
}

#[derive(Debug)]
pub struct AllocationGuard {
    allocations_in_flight: Arc<AtomicUsize>,
}

impl Drop for AllocationGuard {
    fn drop(&mut self) {
        self.allocations_in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn full_lifecycle() {
        let tracker = StateTracker::new();
        assert_eq!(tracker.current(), PluginState::Created);

        // a stream cannot advertise before the socket is bound
        tracker.advertising();
        assert_eq!(tracker.current(), PluginState::Created);

        tracker.listening();
        tracker.advertising();
        assert_eq!(tracker.current(), PluginState::Advertising);

        let first = tracker.begin_allocation();
        let second = tracker.begin_allocation();
        assert_eq!(tracker.current(), PluginState::Allocating);
        drop(first);
        assert_eq!(tracker.current(), PluginState::Allocating);
        drop(second);
        assert_eq!(tracker.current(), PluginState::Advertising);

        tracker.stopped();
        assert_eq!(tracker.current(), PluginState::Stopped);

        tracker.listening();
        assert_eq!(tracker.current(), PluginState::Listening);
    }
}
