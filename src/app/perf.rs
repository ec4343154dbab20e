use std::time::{Duration, Instant};

use crate::script::state::PerfMetrics;

const FPS_REFRESH_INTERVAL: Duration = Duration::from_secs(1);
const SCRIPT_TIME_SMOOTHING: f64 = 0.1;

/// Frame rate refreshed once per second and an exponential moving average of the time spent
/// in script code per frame.
pub(crate) struct PerfTracker {
    window_start: Option<Instant>,
    frames_in_window: u32,
    fps: f64,
    script_avg_ms: Option<f64>,
}

impl PerfTracker {
    pub(crate) fn new() -> Self {
        Self { window_start: None, frames_in_window: 0, fps: 0.0, script_avg_ms: None }
    }

    /// Records one frame. Returns true when the FPS value was refreshed.
    pub(crate) fn record_frame(&mut self, now: Instant, script_ms: f64) -> bool {
        if script_ms.is_finite() && script_ms >= 0.0 {
            self.script_avg_ms = Some(match self.script_avg_ms {
                Some(avg) => avg + SCRIPT_TIME_SMOOTHING * (script_ms - avg),
                None => script_ms,
            });
        }
        let start = *self.window_start.get_or_insert(now);
        self.frames_in_window += 1;
        let elapsed = now.saturating_duration_since(start);
        if elapsed < FPS_REFRESH_INTERVAL {
            return false;
        }
        self.fps = f64::from(self.frames_in_window) / elapsed.as_secs_f64();
        self.frames_in_window = 0;
        self.window_start = Some(now);
        true
    }

    pub(crate) fn metrics(&self) -> PerfMetrics {
        PerfMetrics { fps: self.fps, script_avg_ms: self.script_avg_ms.unwrap_or(0.0) }
    }

    pub(crate) fn title(&self, base: &str) -> String {
        let metrics = self.metrics();
        format!("{base} | {:.0} FPS | script {:.2} ms", metrics.fps, metrics.script_avg_ms)
    }
}
