//! Per-frame ordering of script work: fetch completions, due macrotasks, the frame callback and
//! the microtask flushes between them.

use crate::config::SchedulerConfig;
use crate::dispatch::ResultQueue;
use crate::fetch::FetchResult;
use crate::script::ScriptError;

/// The script side of the frame loop. Implemented by the rhai host and by test doubles.
pub trait ScriptRuntime {
    /// Moves the runtime clock to the frame timestamp before anything else runs this frame.
    fn begin_frame(&mut self, now_ms: f64);

    /// Hands a completion to the script's handler. `Ok(false)` means no handler is installed
    /// and the result was discarded.
    fn deliver_fetch_result(&mut self, result: FetchResult) -> Result<bool, ScriptError>;

    /// Deadline of the next macrotask in milliseconds, negative when none is queued.
    fn peek_next_due(&self) -> f64;

    /// Runs the earliest macrotask if its deadline is at or before `now_ms`.
    fn run_due(&mut self, now_ms: f64) -> Result<(), ScriptError>;

    /// Runs queued microtasks until the queue is empty. Every failure is returned; a failing
    /// microtask does not stop the ones after it.
    fn flush_microtasks(&mut self) -> Vec<ScriptError>;

    fn on_frame(&mut self, width: u32, height: u32, elapsed_seconds: f64) -> Result<(), ScriptError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    pub now_ms: f64,
    pub width: u32,
    pub height: u32,
    pub elapsed_seconds: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub completions_delivered: usize,
    pub completions_dropped: usize,
    pub macrotasks_run: usize,
    /// Due macrotasks left queued because the per-frame limit was reached.
    pub macrotasks_deferred: bool,
    pub errors: usize,
}

pub struct FrameScheduler {
    max_macrotasks_per_frame: usize,
    frames: u64,
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new(&SchedulerConfig::default())
    }
}

impl FrameScheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self { max_macrotasks_per_frame: config.max_macrotasks_per_frame.max(1), frames: 0 }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn tick<R: ScriptRuntime + ?Sized>(
        &mut self,
        runtime: &mut R,
        dispatch: &ResultQueue<FetchResult>,
        frame: FrameInfo,
    ) -> FrameReport {
        let mut report = FrameReport::default();
        self.frames += 1;
        runtime.begin_frame(frame.now_ms);

        for result in dispatch.drain_all() {
            let id = result.id;
            match runtime.deliver_fetch_result(result) {
                Ok(true) => {
                    report.completions_delivered += 1;
                    flush(runtime, &mut report);
                }
                Ok(false) => {
                    log::debug!("[scheduler] fetch #{id} completed with no handler installed; dropped");
                    report.completions_dropped += 1;
                }
                Err(err) => {
                    report.completions_delivered += 1;
                    record(&mut report, "fetch completion", &err);
                    flush(runtime, &mut report);
                }
            }
        }

        loop {
            let due = runtime.peek_next_due();
            if due < 0.0 || due > frame.now_ms {
                break;
            }
            if report.macrotasks_run >= self.max_macrotasks_per_frame {
                report.macrotasks_deferred = true;
                log::warn!(
                    "[scheduler] frame {} hit the limit of {} macrotasks; the rest run next frame",
                    self.frames,
                    self.max_macrotasks_per_frame
                );
                break;
            }
            if let Err(err) = runtime.run_due(frame.now_ms) {
                record(&mut report, "macrotask", &err);
            }
            report.macrotasks_run += 1;
            flush(runtime, &mut report);
        }

        if let Err(err) = runtime.on_frame(frame.width, frame.height, frame.elapsed_seconds) {
            record(&mut report, "on_frame", &err);
        }
        flush(runtime, &mut report);
        report
    }
}

fn flush<R: ScriptRuntime + ?Sized>(runtime: &mut R, report: &mut FrameReport) {
    for err in runtime.flush_microtasks() {
        record(report, "microtask", &err);
    }
}

fn record(report: &mut FrameReport, stage: &str, err: &ScriptError) {
    log::error!("[script] {stage}: {err}");
    report.errors += 1;
}
