//! Polling bundle watcher. The bundle's modification time is checked once per frame; a change
//! is debounced for [`RELOAD_COOLDOWN_FRAMES`] frames before the file is read and reloaded.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::bundle::{self, BundleInfo, BundleSource};
use crate::script::ScriptError;

/// Frames to wait after a detected change before reading the file.
pub const RELOAD_COOLDOWN_FRAMES: u32 = 2;

/// Something whose running code can be swapped for a new bundle.
pub trait BundleReloader {
    fn reload_bundle(&mut self, source: &BundleSource) -> Result<(), ScriptError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Disabled,
    Watching,
    ReloadPending { cooldown: u32 },
}

/// What a single [`BundleWatcher::tick`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Idle,
    CoolingDown { remaining: u32 },
    Reloaded,
    ReloadFailed(String),
}

type MtimeProbe = Box<dyn Fn(&Path) -> Option<SystemTime>>;

pub struct BundleWatcher {
    path: Option<PathBuf>,
    last_modified: Option<SystemTime>,
    state: WatchState,
    probe: MtimeProbe,
    reloads: u64,
    failures: u64,
}

impl Default for BundleWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl BundleWatcher {
    pub fn new() -> Self {
        Self::with_probe(bundle::modified_time)
    }

    /// Uses `probe` instead of the filesystem to read modification times.
    pub fn with_probe(probe: impl Fn(&Path) -> Option<SystemTime> + 'static) -> Self {
        Self {
            path: None,
            last_modified: None,
            state: WatchState::Disabled,
            probe: Box::new(probe),
            reloads: 0,
            failures: 0,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn reloads(&self) -> u64 {
        self.reloads
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Clears all watch state and starts watching if `info` asks for it.
    pub fn configure(&mut self, info: &BundleInfo) -> WatchState {
        self.path = None;
        self.last_modified = None;
        self.state = WatchState::Disabled;
        if let (true, Some(path)) = (info.watch_requested(), info.path()) {
            self.enable(path);
        }
        self.state
    }

    /// `Disabled → Watching`, provided the file's modification time can be read.
    pub fn enable(&mut self, path: &Path) -> bool {
        match (self.probe)(path) {
            Some(modified) => {
                self.path = Some(path.to_path_buf());
                self.last_modified = Some(modified);
                self.state = WatchState::Watching;
                log::info!("[hot-reload] watching '{}'", path.display());
                true
            }
            None => {
                self.state = WatchState::Disabled;
                log::warn!("[hot-reload] disabled: cannot read modification time of '{}'", path.display());
                false
            }
        }
    }

    pub fn tick<R: BundleReloader + ?Sized>(&mut self, reloader: &mut R) -> WatchEvent {
        let Some(path) = self.path.clone() else {
            return WatchEvent::Idle;
        };
        let cooldown = match self.state {
            WatchState::Disabled => return WatchEvent::Idle,
            WatchState::Watching => {
                let current = (self.probe)(&path);
                if current.is_none() || current == self.last_modified {
                    return WatchEvent::Idle;
                }
                self.last_modified = current;
                log::info!("[hot-reload] detected change in '{}'; reloading shortly", path.display());
                RELOAD_COOLDOWN_FRAMES
            }
            WatchState::ReloadPending { cooldown } => cooldown,
        };

        if cooldown > 0 {
            self.state = WatchState::ReloadPending { cooldown: cooldown - 1 };
            return WatchEvent::CoolingDown { remaining: cooldown - 1 };
        }

        let modified = (self.probe)(&path);
        match bundle::read_bundle(&path)
            .map_err(|err| format!("{err:#}"))
            .and_then(|source| reloader.reload_bundle(&source).map_err(|err| err.to_string()))
        {
            Ok(()) => {
                // A write that landed during the cooldown is already part of this reload.
                if modified.is_some() {
                    self.last_modified = modified;
                }
                self.state = WatchState::Watching;
                self.reloads += 1;
                log::info!("[hot-reload] reloaded '{}'", path.display());
                WatchEvent::Reloaded
            }
            Err(message) => {
                self.state = WatchState::ReloadPending { cooldown: RELOAD_COOLDOWN_FRAMES };
                self.failures += 1;
                log::error!("[hot-reload] reload of '{}' failed: {message}", path.display());
                WatchEvent::ReloadFailed(message)
            }
        }
    }
}
