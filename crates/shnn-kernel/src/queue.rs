//! Time-ordered event queue
//!
//! Events pop in order of `(time, kind precedence, insertion sequence)`.
//! The sequence number makes the order total, so identical input always
//! dispatches identically. The queue clock is the time of the last popped
//! event; nothing may be inserted before it.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::error::*;
use crate::event::Event;
use crate::ids::NeuronId;

#[derive(Debug, Clone, Copy)]
struct Queued {
    event: Event,
    seq: u64,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed on every key: BinaryHeap is a max-heap
        other
            .event
            .time
            .total_cmp(&self.event.time)
            .then_with(|| {
                other
                    .event
                    .kind
                    .precedence()
                    .cmp(&self.event.kind.precedence())
            })
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Min-heap of pending events
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Queued>,
    next_seq: u64,
    now: f64,
}

impl EventQueue {
    /// Create an empty queue with the clock at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule an event
    pub fn insert(&mut self, event: Event) -> Result<()> {
        self.check(&event)?;
        self.push(event);
        Ok(())
    }

    /// Schedule a batch of events, all or nothing
    pub fn insert_all(&mut self, events: impl IntoIterator<Item = Event>) -> Result<()> {
        let events: Vec<Event> = events.into_iter().collect();
        for event in &events {
            self.check(event)?;
        }
        for event in events {
            self.push(event);
        }
        Ok(())
    }

    fn check(&self, event: &Event) -> Result<()> {
        if event.time.is_nan() {
            return Err(KernelError::invalid_parameter("event time", "NaN", "a number"));
        }
        if event.time < self.now {
            return Err(KernelError::EventInPast {
                time: event.time,
                now: self.now,
            });
        }
        Ok(())
    }

    fn push(&mut self, event: Event) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Queued { event, seq });
    }

    /// Remove and return the earliest event, advancing the clock to it
    pub fn pop_earliest(&mut self) -> Result<Event> {
        let queued = self.heap.pop().ok_or(KernelError::EmptyQueue)?;
        self.now = queued.event.time;
        Ok(queued.event)
    }

    /// Pop the earliest event only if it satisfies `predicate`
    pub fn pop_if(&mut self, predicate: impl FnOnce(&Event) -> bool) -> Option<Event> {
        match self.heap.peek() {
            Some(queued) if predicate(&queued.event) => self.pop_earliest().ok(),
            _ => None,
        }
    }

    /// Earliest pending event
    pub fn peek(&self) -> Option<&Event> {
        self.heap.peek().map(|queued| &queued.event)
    }

    /// Time of the earliest pending event
    pub fn peek_time(&self) -> Option<f64> {
        self.peek().map(|event| event.time)
    }

    /// Number of pending events
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether no event is pending
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Time of the last popped event
    pub fn now(&self) -> f64 {
        self.now
    }

    /// Drop every pending event, keeping the clock; returns how many were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.heap.len();
        self.heap.clear();
        dropped
    }

    /// Drop every pending event and rewind the clock to zero
    pub fn reset(&mut self) {
        self.heap.clear();
        self.now = 0.0;
    }
}

/// Event queue shared between the driver and external input producers
#[derive(Debug, Clone, Default)]
pub struct SharedEventQueue {
    inner: Arc<Mutex<EventQueue>>,
}

impl SharedEventQueue {
    /// Create an empty shared queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule an event under the lock
    pub fn insert(&self, event: Event) -> Result<()> {
        self.inner.lock().insert(event)
    }

    /// Pop the earliest event under the lock
    pub fn pop_earliest(&self) -> Result<Event> {
        self.inner.lock().pop_earliest()
    }

    /// Lock the queue for a batch of operations
    pub fn lock(&self) -> MutexGuard<'_, EventQueue> {
        self.inner.lock()
    }

    /// Current queue clock
    pub fn now(&self) -> f64 {
        self.inner.lock().now()
    }

    /// Number of pending events
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether no event is pending
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Handle for injecting input spikes from other threads
#[derive(Debug, Clone)]
pub struct InputHandle {
    queue: SharedEventQueue,
    neuron_count: usize,
}

impl InputHandle {
    pub(crate) fn new(queue: SharedEventQueue, neuron_count: usize) -> Self {
        Self {
            queue,
            neuron_count,
        }
    }

    /// Schedule a spike of `neuron` at `time`
    pub fn inject_spike(&self, neuron: NeuronId, time: f64) -> Result<()> {
        if neuron.index() >= self.neuron_count {
            return Err(KernelError::NeuronNotFound {
                neuron_id: neuron.raw(),
            });
        }
        self.queue.insert(Event::emit(neuron, time))
    }

    /// Schedule a batch of spikes under a single lock
    ///
    /// Nothing is scheduled unless every spike is valid.
    pub fn inject_spikes(&self, spikes: impl IntoIterator<Item = (NeuronId, f64)>) -> Result<()> {
        let events = spikes
            .into_iter()
            .map(|(neuron, time)| {
                if neuron.index() >= self.neuron_count {
                    return Err(KernelError::NeuronNotFound {
                        neuron_id: neuron.raw(),
                    });
                }
                Ok(Event::emit(neuron, time))
            })
            .collect::<Result<Vec<_>>>()?;
        self.queue.lock().insert_all(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::ids::SynapseId;

    fn emit(id: u32, time: f64) -> Event {
        Event::emit(NeuronId::new(id), time)
    }

    #[test]
    fn test_time_order_with_stable_ties() {
        let mut queue = EventQueue::new();
        queue.insert(emit(0, 5.0)).unwrap();
        queue.insert(emit(1, 3.0)).unwrap();
        queue.insert(emit(2, 3.0)).unwrap();
        queue.insert(emit(3, 1.0)).unwrap();

        let order: Vec<_> = std::iter::from_fn(|| queue.pop_earliest().ok())
            .map(|e| match e.kind {
                EventKind::Emit { neuron } => (e.time, neuron.raw()),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(order, vec![(1.0, 3), (3.0, 1), (3.0, 2), (5.0, 0)]);
    }

    #[test]
    fn test_kind_precedence_at_same_time() {
        let mut queue = EventQueue::new();
        queue.insert(Event::stop(1.0)).unwrap();
        queue.insert(Event::new(1.0, EventKind::Sampling)).unwrap();
        queue.insert(Event::new(1.0, EventKind::TimeDrivenStep)).unwrap();
        queue.insert(Event::arrival(SynapseId::new(0), 1.0)).unwrap();
        queue.insert(emit(0, 1.0)).unwrap();

        let kinds: Vec<u8> = std::iter::from_fn(|| queue.pop_earliest().ok())
            .map(|e| e.kind.precedence())
            .collect();
        assert_eq!(kinds, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_empty_queue() {
        let mut queue = EventQueue::new();
        let err = queue.pop_earliest().unwrap_err();
        assert!(err.is_empty_queue());
        assert!(queue.peek_time().is_none());
    }

    #[test]
    fn test_insert_before_clock_rejected() {
        let mut queue = EventQueue::new();
        queue.insert(emit(0, 2.0)).unwrap();
        queue.pop_earliest().unwrap();
        assert_eq!(queue.now(), 2.0);

        assert!(matches!(
            queue.insert(emit(0, 1.5)),
            Err(KernelError::EventInPast { .. })
        ));
        // Same time as the clock is still allowed
        assert!(queue.insert(emit(0, 2.0)).is_ok());
        assert!(queue.insert(emit(0, f64::NAN)).is_err());
    }

    #[test]
    fn test_pop_if() {
        let mut queue = EventQueue::new();
        queue.insert(Event::arrival(SynapseId::new(4), 1.0)).unwrap();
        queue.insert(Event::new(1.0, EventKind::TimeDrivenStep)).unwrap();

        let is_arrival = |e: &Event| matches!(e.kind, EventKind::Arrival { .. });
        assert!(queue.pop_if(is_arrival).is_some());
        assert!(queue.pop_if(is_arrival).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_clear_and_reset() {
        let mut queue = EventQueue::new();
        queue.insert(emit(0, 1.0)).unwrap();
        queue.insert(emit(0, 2.0)).unwrap();
        queue.pop_earliest().unwrap();
        assert_eq!(queue.clear(), 1);
        assert_eq!(queue.now(), 1.0);
        queue.reset();
        assert_eq!(queue.now(), 0.0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_input_handle_from_other_thread() {
        let queue = SharedEventQueue::new();
        let handle = InputHandle::new(queue.clone(), 4);

        let worker = std::thread::spawn(move || {
            handle.inject_spike(NeuronId::new(2), 0.5).unwrap();
            handle
                .inject_spikes([(NeuronId::new(0), 0.25), (NeuronId::new(1), 0.75)])
                .unwrap();
            handle.inject_spike(NeuronId::new(9), 0.5).is_err()
        });
        assert!(worker.join().unwrap());

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop_earliest().unwrap().time, 0.25);
        assert_eq!(queue.now(), 0.25);
    }

    #[test]
    fn test_rejected_batch_schedules_nothing() {
        let queue = SharedEventQueue::new();
        let handle = InputHandle::new(queue.clone(), 4);
        handle.inject_spike(NeuronId::new(0), 1.0).unwrap();
        queue.pop_earliest().unwrap();

        let unknown = handle.inject_spikes([(NeuronId::new(1), 2.0), (NeuronId::new(7), 3.0)]);
        assert!(matches!(unknown, Err(KernelError::NeuronNotFound { neuron_id: 7 })));
        assert!(queue.is_empty());

        let past = handle.inject_spikes([(NeuronId::new(1), 2.0), (NeuronId::new(2), 0.5)]);
        assert!(matches!(past, Err(KernelError::EventInPast { .. })));
        assert!(queue.is_empty());

        let mut local = EventQueue::new();
        assert!(local.insert_all([emit(0, 1.0), emit(1, f64::NAN)]).is_err());
        assert!(local.is_empty());
        local.insert_all([emit(0, 1.0), emit(1, 0.5)]).unwrap();
        assert_eq!(local.pop_earliest().unwrap().time, 0.5);
    }
}
