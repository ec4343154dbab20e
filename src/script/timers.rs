use std::collections::{HashSet, VecDeque};

pub type TimerId = i64;

/// A scheduled macrotask. `period` is set for repeating timers.
#[derive(Debug, Clone)]
pub struct Timer<C> {
    pub id: TimerId,
    pub deadline: f64,
    pub period: Option<f64>,
    pub callback: C,
}

/// Deadline-ordered macrotask queue. Timers with equal deadlines run in scheduling order.
///
/// A repeating timer keeps its id for its whole life. It is taken out of the queue while its
/// callback runs and put back by [`TimerQueue::reschedule`] unless it was cleared meanwhile.
#[derive(Debug)]
pub struct TimerQueue<C> {
    timers: Vec<Timer<C>>,
    active_intervals: HashSet<TimerId>,
    next_id: TimerId,
    now: f64,
}

impl<C> Default for TimerQueue<C> {
    fn default() -> Self {
        Self { timers: Vec::new(), active_intervals: HashSet::new(), next_id: 1, now: 0.0 }
    }
}

impl<C> TimerQueue<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> f64 {
        self.now
    }

    /// Sets the time new deadlines are measured from.
    pub fn set_now(&mut self, now_ms: f64) {
        if now_ms.is_finite() {
            self.now = now_ms;
        }
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn set_timeout(&mut self, callback: C, delay_ms: f64) -> TimerId {
        let id = self.allocate_id();
        let deadline = self.now + clamp_delay(delay_ms, 0.0);
        self.insert(Timer { id, deadline, period: None, callback });
        id
    }

    /// Periods below one millisecond are raised to one so a repeating timer cannot become due
    /// again within the frame that ran it.
    pub fn set_interval(&mut self, callback: C, period_ms: f64) -> TimerId {
        let id = self.allocate_id();
        let period = clamp_delay(period_ms, 1.0);
        self.active_intervals.insert(id);
        self.insert(Timer { id, deadline: self.now + period, period: Some(period), callback });
        id
    }

    /// Removes a pending timer or stops a repeating one. Unknown ids are ignored.
    pub fn clear(&mut self, id: TimerId) -> bool {
        let was_interval = self.active_intervals.remove(&id);
        let before = self.timers.len();
        self.timers.retain(|timer| timer.id != id);
        was_interval || self.timers.len() != before
    }

    /// Deadline of the earliest timer, or `-1.0` when nothing is queued.
    pub fn peek_next_due(&self) -> f64 {
        self.timers.first().map_or(-1.0, |timer| timer.deadline)
    }

    /// Removes the earliest timer if its deadline is at or before `now_ms`. The clock is moved
    /// to `now_ms` either way.
    pub fn pop_due(&mut self, now_ms: f64) -> Option<Timer<C>> {
        self.set_now(now_ms);
        match self.timers.first() {
            Some(timer) if timer.deadline <= now_ms => Some(self.timers.remove(0)),
            _ => None,
        }
    }

    /// Re-queues a repeating timer after its callback ran, measured from the current clock.
    pub fn reschedule(&mut self, mut timer: Timer<C>) -> bool {
        let Some(period) = timer.period else {
            return false;
        };
        if !self.active_intervals.contains(&timer.id) {
            return false;
        }
        timer.deadline = self.now + period;
        self.insert(timer);
        true
    }

    fn allocate_id(&mut self) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn insert(&mut self, timer: Timer<C>) {
        let index = self.timers.partition_point(|queued| queued.deadline <= timer.deadline);
        self.timers.insert(index, timer);
    }
}

/// Truncates to whole milliseconds; negative and non-finite delays become `floor`.
fn clamp_delay(delay_ms: f64, floor: f64) -> f64 {
    if !delay_ms.is_finite() {
        return floor;
    }
    delay_ms.trunc().max(floor)
}

/// FIFO of callbacks that run to completion right after the callback that queued them.
#[derive(Debug)]
pub struct MicrotaskQueue<C> {
    tasks: VecDeque<C>,
}

impl<C> Default for MicrotaskQueue<C> {
    fn default() -> Self {
        Self { tasks: VecDeque::new() }
    }
}

impl<C> MicrotaskQueue<C> {
    pub fn push(&mut self, task: C) {
        self.tasks.push_back(task);
    }

    pub fn pop(&mut self) -> Option<C> {
        self.tasks.pop_front()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
