use std::io;
use std::thread::{self, JoinHandle};

/// What happens to still-running workers when the pool shuts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPolicy {
    /// Block until every outstanding worker has finished.
    Join,
    /// Drop the handles and let the workers run on. Only meant for process teardown, where the
    /// workers die with the process and their results are never observed.
    Detach,
}

/// Thread-per-job pool. Every spawned worker stays tracked until it finishes and is reaped, so
/// nothing is ever leaked during normal operation; only [`WorkerPool::shutdown`] with
/// [`ShutdownPolicy::Detach`] lets go of running workers.
pub struct WorkerPool {
    name: String,
    policy: ShutdownPolicy,
    handles: Vec<JoinHandle<()>>,
    spawned: u64,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, policy: ShutdownPolicy) -> Self {
        Self { name: name.into(), policy, handles: Vec::new(), spawned: 0 }
    }

    pub fn policy(&self) -> ShutdownPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: ShutdownPolicy) {
        self.policy = policy;
    }

    pub fn spawn<F>(&mut self, job: F) -> io::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let thread_name = format!("{}-{}", self.name, self.spawned);
        let handle = thread::Builder::new().name(thread_name).spawn(job)?;
        self.spawned += 1;
        self.handles.push(handle);
        Ok(())
    }

    /// Joins workers that have already finished. Returns how many were reaped.
    pub fn reap(&mut self) -> usize {
        let before = self.handles.len();
        let mut running = Vec::with_capacity(before);
        for handle in self.handles.drain(..) {
            if handle.is_finished() {
                if handle.join().is_err() {
                    log::error!("[{}] worker thread panicked", self.name);
                }
            } else {
                running.push(handle);
            }
        }
        self.handles = running;
        before - self.handles.len()
    }

    pub fn in_flight(&self) -> usize {
        self.handles.iter().filter(|handle| !handle.is_finished()).count()
    }

    pub fn spawned(&self) -> u64 {
        self.spawned
    }

    pub fn shutdown(&mut self) {
        match self.policy {
            ShutdownPolicy::Join => {
                for handle in self.handles.drain(..) {
                    if handle.join().is_err() {
                        log::error!("[{}] worker thread panicked", self.name);
                    }
                }
            }
            ShutdownPolicy::Detach => {
                let outstanding = self.in_flight();
                if outstanding > 0 {
                    log::debug!("[{}] detaching {outstanding} in-flight worker(s)", self.name);
                }
                self.handles.clear();
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
