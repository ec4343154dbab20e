use std::time::{Duration, Instant};

/// Monotonic frame clock. Everything the script sees (`performance_now`, timer deadlines,
/// the `on_frame` elapsed argument) is derived from the same start instant.
#[derive(Debug, Clone, Copy)]
pub struct Time {
    start: Instant,
    last: Instant,
    pub delta: Duration,
}

impl Default for Time {
    fn default() -> Self {
        Self::new()
    }
}

impl Time {
    pub fn new() -> Self {
        let now = Instant::now();
        Self { start: now, last: now, delta: Duration::ZERO }
    }

    pub fn tick(&mut self) {
        let now = Instant::now();
        self.delta = now - self.last;
        self.last = now;
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    /// Seconds from start to the last tick.
    pub fn elapsed_seconds(&self) -> f64 {
        self.last.duration_since(self.start).as_secs_f64()
    }

    /// Milliseconds from start to the last tick.
    pub fn frame_ms(&self) -> f64 {
        self.elapsed_seconds() * 1000.0
    }

    /// Milliseconds from start to right now, independent of ticking.
    pub fn now_ms(&self) -> f64 {
        millis_since(self.start)
    }
}

pub fn millis_since(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_advances_elapsed_and_delta() {
        let mut time = Time::new();
        assert_eq!(time.elapsed_seconds(), 0.0);
        std::thread::sleep(Duration::from_millis(5));
        time.tick();
        assert!(time.delta >= Duration::from_millis(5));
        assert!(time.frame_ms() >= 5.0);
        assert!(time.now_ms() >= time.frame_ms());
    }
}
