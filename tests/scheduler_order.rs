use kestrel_script_runtime::dispatch::ResultQueue;
use kestrel_script_runtime::fetch::FetchResult;
use kestrel_script_runtime::scheduler::{FrameInfo, FrameScheduler, ScriptRuntime};
use kestrel_script_runtime::script::timers::{MicrotaskQueue, TimerQueue};
use kestrel_script_runtime::script::ScriptError;

/// What a fake callback does when it runs.
#[derive(Debug, Clone)]
enum Task {
    Log(&'static str),
    LogThenQueue(&'static str, &'static str),
    Fail(&'static str),
}

/// Runtime double that records every callback it runs, in order.
#[derive(Default)]
struct Recorder {
    timers: TimerQueue<Task>,
    microtasks: MicrotaskQueue<Task>,
    handler_installed: bool,
    log: Vec<String>,
    frames: usize,
}

impl Recorder {
    fn run(&mut self, task: Task) -> Result<(), ScriptError> {
        match task {
            Task::Log(tag) => self.log.push(tag.to_string()),
            Task::LogThenQueue(tag, queued) => {
                self.log.push(tag.to_string());
                self.microtasks.push(Task::Log(queued));
            }
            Task::Fail(tag) => {
                self.log.push(tag.to_string());
                return Err(ScriptError { message: format!("{tag} failed"), script: None, line: None, column: None });
            }
        }
        Ok(())
    }
}

impl ScriptRuntime for Recorder {
    fn begin_frame(&mut self, now_ms: f64) {
        self.timers.set_now(now_ms);
    }

    fn deliver_fetch_result(&mut self, result: FetchResult) -> Result<bool, ScriptError> {
        if !self.handler_installed {
            return Ok(false);
        }
        self.log.push(format!("fetch#{}", result.id));
        self.microtasks.push(Task::Log("fetch-micro"));
        Ok(true)
    }

    fn peek_next_due(&self) -> f64 {
        self.timers.peek_next_due()
    }

    fn run_due(&mut self, now_ms: f64) -> Result<(), ScriptError> {
        let Some(timer) = self.timers.pop_due(now_ms) else {
            return Ok(());
        };
        let outcome = self.run(timer.callback.clone());
        self.timers.reschedule(timer);
        outcome
    }

    fn flush_microtasks(&mut self) -> Vec<ScriptError> {
        let mut errors = Vec::new();
        while let Some(task) = self.microtasks.pop() {
            if let Err(err) = self.run(task) {
                errors.push(err);
            }
        }
        errors
    }

    fn on_frame(&mut self, _width: u32, _height: u32, _elapsed_seconds: f64) -> Result<(), ScriptError> {
        self.frames += 1;
        self.log.push("frame".to_string());
        Ok(())
    }
}

fn frame(now_ms: f64) -> FrameInfo {
    FrameInfo { now_ms, width: 320, height: 200, elapsed_seconds: now_ms / 1000.0 }
}

#[test]
fn on_frame_runs_once_per_tick_even_when_idle() {
    let mut runtime = Recorder::default();
    let mut scheduler = FrameScheduler::default();
    let queue = ResultQueue::new();
    for now in [0.0, 16.0, 33.0] {
        let report = scheduler.tick(&mut runtime, &queue, frame(now));
        assert_eq!(report.macrotasks_run, 0);
    }
    assert_eq!(runtime.frames, 3);
    assert_eq!(scheduler.frames(), 3);
}

#[test]
fn only_timers_due_by_the_frame_timestamp_run() {
    let mut runtime = Recorder::default();
    runtime.timers.set_timeout(Task::Log("at-10"), 10.0);
    runtime.timers.set_timeout(Task::Log("at-16"), 16.0);
    runtime.timers.set_timeout(Task::Log("at-17"), 17.0);
    let mut scheduler = FrameScheduler::default();
    let queue = ResultQueue::new();

    let report = scheduler.tick(&mut runtime, &queue, frame(16.0));
    assert_eq!(report.macrotasks_run, 2);
    assert_eq!(runtime.log, ["at-10", "at-16", "frame"]);

    scheduler.tick(&mut runtime, &queue, frame(32.0));
    assert_eq!(runtime.log, ["at-10", "at-16", "frame", "at-17", "frame"]);
}

#[test]
fn microtasks_drain_after_each_macrotask() {
    let mut runtime = Recorder::default();
    runtime.timers.set_timeout(Task::LogThenQueue("first", "first-micro"), 0.0);
    runtime.timers.set_timeout(Task::Log("second"), 0.0);
    runtime.microtasks.push(Task::Log("stale-micro"));
    let mut scheduler = FrameScheduler::default();
    scheduler.tick(&mut runtime, &ResultQueue::new(), frame(1.0));
    // The stale microtask is only reached by the flush that follows the first macrotask.
    assert_eq!(runtime.log, ["first", "stale-micro", "first-micro", "second", "frame"]);
}

#[test]
fn completions_are_delivered_before_timers_with_a_flush_after_each() {
    let mut runtime = Recorder { handler_installed: true, ..Recorder::default() };
    runtime.timers.set_timeout(Task::Log("timer"), 0.0);
    let queue = ResultQueue::new();
    queue.push(FetchResult::error(7, "offline"));
    queue.push(FetchResult::error(8, "offline"));

    let mut scheduler = FrameScheduler::default();
    let report = scheduler.tick(&mut runtime, &queue, frame(5.0));
    assert_eq!(report.completions_delivered, 2);
    assert_eq!(
        runtime.log,
        ["fetch#7", "fetch-micro", "fetch#8", "fetch-micro", "timer", "frame"]
    );
    assert!(queue.is_empty());
}

#[test]
fn completions_pushed_mid_frame_wait_for_the_next_tick() {
    let mut runtime = Recorder { handler_installed: true, ..Recorder::default() };
    let queue = ResultQueue::new();
    let mut scheduler = FrameScheduler::default();
    scheduler.tick(&mut runtime, &queue, frame(0.0));
    queue.push(FetchResult::error(1, "late"));
    assert_eq!(runtime.log, ["frame"]);
    scheduler.tick(&mut runtime, &queue, frame(16.0));
    assert_eq!(runtime.log, ["frame", "fetch#1", "fetch-micro", "frame"]);
}

#[test]
fn failures_are_counted_without_stopping_the_frame() {
    let mut runtime = Recorder::default();
    runtime.timers.set_timeout(Task::Fail("broken"), 0.0);
    runtime.timers.set_timeout(Task::LogThenQueue("ok", "ok-micro"), 0.0);
    runtime.microtasks.push(Task::Fail("broken-micro"));
    let mut scheduler = FrameScheduler::default();
    let report = scheduler.tick(&mut runtime, &ResultQueue::new(), frame(0.0));
    assert_eq!(report.errors, 2);
    assert_eq!(runtime.log, ["broken", "broken-micro", "ok", "ok-micro", "frame"]);
}

#[test]
fn intervals_do_not_catch_up_within_one_frame() {
    let mut runtime = Recorder::default();
    runtime.timers.set_interval(Task::Log("tick"), 10.0);
    let mut scheduler = FrameScheduler::default();
    let queue = ResultQueue::new();
    let report = scheduler.tick(&mut runtime, &queue, frame(100.0));
    assert_eq!(report.macrotasks_run, 1);
    assert_eq!(runtime.timers.peek_next_due(), 110.0);
}
