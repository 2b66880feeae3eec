use std::{cmp::Ordering, collections::BinaryHeap, time::Duration};

struct Scheduled<E> {
  at: Duration,
  /// Insertion order, breaks ties between events due at the same time
  id: u64,
  event: E,
}

impl<E> PartialEq for Scheduled<E> {
  fn eq(&self, other: &Self) -> bool {
    self.id == other.id
  }
}

impl<E> Eq for Scheduled<E> {}

impl<E> PartialOrd for Scheduled<E> {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl<E> Ord for Scheduled<E> {
  fn cmp(&self, other: &Self) -> Ordering {
    // reversed, `BinaryHeap` is a max-heap
    other
      .at
      .cmp(&self.at)
      .then_with(|| other.id.cmp(&self.id))
  }
}

/// Delivers events one at a time in timestamp order, FIFO among equal timestamps.
///
/// Time is measured from the start of the simulation and only moves forward.
pub struct Scheduler<E> {
  now: Duration,
  next_id: u64,
  queue: BinaryHeap<Scheduled<E>>,
}

impl<E> Scheduler<E> {
  pub fn new() -> Self {
    Self {
      now: Duration::ZERO,
      next_id: 0,
      queue: BinaryHeap::new(),
    }
  }

  pub fn now(&self) -> Duration {
    self.now
  }

  pub fn len(&self) -> usize {
    self.queue.len()
  }

  pub fn is_empty(&self) -> bool {
    self.queue.is_empty()
  }

  /// Schedule `event` to fire `delay` from now.
  pub fn schedule(&mut self, delay: Duration, event: E) {
    self.schedule_at(self.now + delay, event);
  }

  /// Schedule `event` at an absolute time. Times in the past fire immediately.
  pub fn schedule_at(&mut self, at: Duration, event: E) {
    let at = std::cmp::max(at, self.now);
    let id = self.next_id;
    self.next_id += 1;
    self.queue.push(Scheduled { at, id, event });
  }

  /// When the next event is due.
  pub fn peek(&self) -> Option<Duration> {
    self.queue.peek().map(|s| s.at)
  }

  /// Pop the next event and advance the clock to it.
  pub fn pop(&mut self) -> Option<(Duration, E)> {
    let Scheduled { at, event, .. } = self.queue.pop()?;
    self.now = at;
    Some((at, event))
  }
}

impl<E> Default for Scheduler<E> {
  fn default() -> Self {
    Self::new()
  }
}
