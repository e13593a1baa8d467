//! Fan-in/fan-out stages of the processing graph.

use std::time::Duration;

use crate::target_state::Observer;

use super::GraphNode;

/// Merges per-observer input (camera moves, viewport resizes) into a single
/// ordered stream the target-state controller consumes once per tick.
pub struct ObserverMux {
    observers: Vec<Box<dyn Observer>>,
    dirty: bool,
}

impl ObserverMux {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
            dirty: false,
        }
    }

    pub fn set_observers(&mut self, observers: Vec<Box<dyn Observer>>) {
        self.observers = observers;
        self.dirty = true;
    }

    /// Take the current observer snapshot, clearing the dirty flag.
    pub fn take(&mut self) -> &[Box<dyn Observer>] {
        self.dirty = false;
        &self.observers
    }
}

impl Default for ObserverMux {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphNode for ObserverMux {
    fn ready_for_data(&self) -> bool {
        self.dirty
    }

    fn main_thread_process(&mut self, _budget: Duration) -> Duration {
        self.dirty = false;
        Duration::ZERO
    }
}

/// Fans a decoded payload out to every registered consumer. Used when one
/// loaded tile (e.g. a shared texture atlas) must reach several instance
/// slots.
pub struct Broadcast<T: Clone> {
    pending: Vec<T>,
}

impl<T: Clone> Broadcast<T> {
    pub fn new() -> Self {
        Self { pending: Vec::new() }
    }

    pub fn push(&mut self, item: T) {
        self.pending.push(item);
    }

    pub fn drain(&mut self) -> Vec<T> {
        std::mem::take(&mut self.pending)
    }
}

impl<T: Clone> Default for Broadcast<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Demultiplexes a single decoder's output across the nodes awaiting it.
/// Pinned (non-reentrant) during an atomic command group: demuxing must not
/// interleave two different atomic groups' commands on the wire.
pub struct DecoderDemux<T> {
    queue: std::collections::VecDeque<T>,
    pinned: bool,
}

impl<T> DecoderDemux<T> {
    pub fn new() -> Self {
        Self {
            queue: std::collections::VecDeque::new(),
            pinned: false,
        }
    }

    pub fn push(&mut self, item: T) {
        self.queue.push_back(item);
    }

    /// Begin an atomic group: no further `pop` calls succeed until
    /// `end_atomic` is called, so the consumer drains exactly one group at
    /// a time.
    pub fn begin_atomic(&mut self) {
        self.pinned = true;
    }

    pub fn end_atomic(&mut self) {
        self.pinned = false;
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.pinned {
            return None;
        }
        self.queue.pop_front()
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }
}

impl<T> Default for DecoderDemux<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The terminal stage: applies fully-resolved content to the scene. Unlike
/// every other stage, the instantiator runs a hard synchronous step each
/// tick rather than a budgeted one — creating a render instance is itself
/// the budget-relevant work, already accounted for by the content manager's
/// per-tick processing, so this stage must never defer partway through.
pub struct Instantiator;

impl Instantiator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Instantiator {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphNode for Instantiator {
    fn ready_for_data(&self) -> bool {
        true
    }

    fn schedule_main_thread(&self) -> bool {
        true
    }

    fn main_thread_process(&mut self, _budget: Duration) -> Duration {
        Duration::ZERO
    }
}
