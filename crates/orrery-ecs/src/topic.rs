//! Topics: typed event queues flushed once per step.
//!
//! A topic buffers events published during a step and makes them readable
//! after the next flush, which the world performs for every registered topic
//! (in registration order) before systems run. Anything implementing
//! [`Topic`] can be registered; [`EventTopic`] is the provided
//! double-buffered implementation.

use std::any::Any;
use std::fmt;

// ---------------------------------------------------------------------------
// Topic trait
// ---------------------------------------------------------------------------

/// A flushable event queue the world steps once per tick.
pub trait Topic: 'static {
    /// Make events published since the last flush readable, retiring the
    /// previously readable batch.
    fn flush(&mut self);

    /// Drop all buffered events, readable and pending.
    fn clear(&mut self);

    /// Upcast for typed access through the registry.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for typed access through the registry.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

// ---------------------------------------------------------------------------
// EventTopic
// ---------------------------------------------------------------------------

/// Double-buffered topic: `publish` appends to the pending buffer, `flush`
/// swaps it into the readable one.
pub struct EventTopic<E: 'static> {
    pending: Vec<E>,
    current: Vec<E>,
}

impl<E: 'static> EventTopic<E> {
    /// Create an empty topic.
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            current: Vec::new(),
        }
    }

    /// Queue an event for the next flush.
    pub fn publish(&mut self, event: E) {
        self.pending.push(event);
    }

    /// Events made readable by the most recent flush.
    pub fn events(&self) -> &[E] {
        &self.current
    }

    /// Number of events waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl<E: 'static> Default for EventTopic<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: 'static> Topic for EventTopic<E> {
    fn flush(&mut self) {
        self.current.clear();
        std::mem::swap(&mut self.current, &mut self.pending);
    }

    fn clear(&mut self) {
        self.current.clear();
        self.pending.clear();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// TopicRegistry
// ---------------------------------------------------------------------------

/// Handle to a registered topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TopicId(pub(crate) u32);

/// Registration-ordered list of topics.
#[derive(Default)]
pub struct TopicRegistry {
    topics: Vec<Box<dyn Topic>>,
}

impl TopicRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a topic, keeping registration order.
    pub fn add<T: Topic>(&mut self, topic: T) -> TopicId {
        let id = TopicId(self.topics.len() as u32);
        self.topics.push(Box::new(topic));
        id
    }

    /// Typed access to a registered topic.
    pub fn get<T: Topic>(&self, id: TopicId) -> Option<&T> {
        self.topics
            .get(id.0 as usize)
            .and_then(|t| t.as_any().downcast_ref::<T>())
    }

    /// Typed mutable access to a registered topic.
    pub fn get_mut<T: Topic>(&mut self, id: TopicId) -> Option<&mut T> {
        self.topics
            .get_mut(id.0 as usize)
            .and_then(|t| t.as_any_mut().downcast_mut::<T>())
    }

    /// Flush every topic in registration order.
    pub fn flush_all(&mut self) {
        for topic in &mut self.topics {
            topic.flush();
        }
    }

    /// Clear every topic's buffers.
    pub fn clear_all(&mut self) {
        for topic in &mut self.topics {
            topic.clear();
        }
    }

    /// Drop every registered topic.
    pub fn clear(&mut self) {
        self.topics.clear();
    }

    /// Number of registered topics.
    pub fn len(&self) -> usize {
        self.topics.len()
    }

    /// Whether no topics are registered.
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

impl fmt::Debug for TopicRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicRegistry")
            .field("topics", &self.topics.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
