use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use rhai::{Dynamic, FnPtr};
use serde::Serialize;

use super::timers::{MicrotaskQueue, TimerQueue};
use crate::assets::{EmbeddedAssets, ImageRegistry};
use crate::fetch::FetchClient;

/// Smallest change in a pushed metric that counts as a change.
pub const METRIC_EPSILON: f64 = 1e-3;

/// A script function plus the arguments it is invoked with.
#[derive(Debug, Clone)]
pub struct Callback {
    pub func: FnPtr,
    pub args: Vec<Dynamic>,
}

impl Callback {
    pub fn new(func: FnPtr) -> Self {
        Self { func, args: Vec::new() }
    }

    pub fn with_args(func: FnPtr, args: Vec<Dynamic>) -> Self {
        Self { func, args }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NavigationState {
    pub keyboard: bool,
    pub gamepad: bool,
}

impl Default for NavigationState {
    fn default() -> Self {
        Self { keyboard: true, gamepad: true }
    }
}

/// Navigation flags written by both native input handling and the script. Last writer wins.
pub type SharedNavigation = Rc<Cell<NavigationState>>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowMetrics {
    pub width: f64,
    pub height: f64,
    pub scale: f64,
    pub font_scale: f64,
}

impl Default for WindowMetrics {
    fn default() -> Self {
        Self { width: 0.0, height: 0.0, scale: 1.0, font_scale: 1.0 }
    }
}

impl WindowMetrics {
    /// Replaces unusable values with the previous ones: non-finite sizes keep the old size, a
    /// non-positive scale keeps the old scale, and a non-positive font scale follows the scale.
    pub fn sanitized(self, previous: &WindowMetrics) -> Self {
        let width = if self.width.is_finite() { self.width } else { previous.width };
        let height = if self.height.is_finite() { self.height } else { previous.height };
        let scale = if self.scale.is_finite() && self.scale > 0.0 { self.scale } else { previous.scale };
        let font_scale = if self.font_scale.is_finite() && self.font_scale > 0.0 { self.font_scale } else { scale };
        Self { width, height, scale, font_scale }
    }

    pub fn differs(&self, other: &WindowMetrics) -> bool {
        exceeds_epsilon(self.width, other.width)
            || exceeds_epsilon(self.height, other.height)
            || exceeds_epsilon(self.scale, other.scale)
            || exceeds_epsilon(self.font_scale, other.font_scale)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfMetrics {
    pub fps: f64,
    /// Exponential moving average of the time spent in script per frame.
    pub script_avg_ms: f64,
}

impl PerfMetrics {
    pub fn differs(&self, other: &PerfMetrics) -> bool {
        exceeds_epsilon(self.fps, other.fps) || exceeds_epsilon(self.script_avg_ms, other.script_avg_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformInfo {
    pub os: String,
    pub ios: bool,
    pub android: bool,
    pub macos: bool,
    pub windows: bool,
    pub linux: bool,
    pub web: bool,
    pub is_native: bool,
    pub is_web: bool,
    pub is_desktop: bool,
    pub is_mobile: bool,
    #[serde(rename = "isTV")]
    pub is_tv: bool,
}

impl Default for PlatformInfo {
    fn default() -> Self {
        Self {
            os: "unknown".to_string(),
            ios: false,
            android: false,
            macos: false,
            windows: false,
            linux: false,
            web: false,
            is_native: false,
            is_web: false,
            is_desktop: false,
            is_mobile: false,
            is_tv: false,
        }
    }
}

impl PlatformInfo {
    pub fn detect() -> Self {
        let os = std::env::consts::OS;
        let ios = os == "ios";
        let android = os == "android";
        let macos = os == "macos";
        let windows = os == "windows";
        let linux = os == "linux";
        let web = cfg!(target_family = "wasm");
        let is_mobile = ios || android;
        Self {
            os: os.to_string(),
            ios,
            android,
            macos,
            windows,
            linux,
            web,
            is_native: !web,
            is_web: web,
            is_desktop: !web && !is_mobile,
            is_mobile,
            is_tv: false,
        }
    }
}

fn exceeds_epsilon(a: f64, b: f64) -> bool {
    (a - b).abs() > METRIC_EPSILON
}

/// Remembers the last values pushed into the script so unchanged state is not re-sent every
/// frame. `None` means nothing was pushed yet.
#[derive(Debug, Default)]
pub struct NativeStateSync {
    window: Option<WindowMetrics>,
    perf: Option<PerfMetrics>,
    navigation: Option<NavigationState>,
}

impl NativeStateSync {
    pub fn window_changed(&mut self, metrics: WindowMetrics) -> bool {
        let changed = self.window.map_or(true, |last| last.differs(&metrics));
        if changed {
            self.window = Some(metrics);
        }
        changed
    }

    pub fn perf_changed(&mut self, perf: PerfMetrics) -> bool {
        let changed = self.perf.map_or(true, |last| last.differs(&perf));
        if changed {
            self.perf = Some(perf);
        }
        changed
    }

    pub fn navigation_changed(&mut self, navigation: NavigationState) -> bool {
        let changed = self.navigation != Some(navigation);
        if changed {
            self.navigation = Some(navigation);
        }
        changed
    }

    /// Forgets everything pushed so far; the next sync pushes all values again.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Native state reachable from registered host functions. Shared with the engine closures
/// through `Rc<RefCell<_>>`; never borrowed while a script callback runs.
pub struct HostState {
    pub timers: TimerQueue<Callback>,
    pub microtasks: MicrotaskQueue<Callback>,
    pub fetch: Option<FetchClient>,
    pub fetch_handler: Option<FnPtr>,
    pub navigation: SharedNavigation,
    pub window: WindowMetrics,
    pub perf: PerfMetrics,
    pub platform: PlatformInfo,
    pub background: [f32; 4],
    pub images: ImageRegistry,
    pub assets: Arc<EmbeddedAssets>,
    pub clock_start: Instant,
}

impl HostState {
    pub fn new(assets: Arc<EmbeddedAssets>, fetch: Option<FetchClient>, clock_start: Instant) -> Self {
        Self {
            timers: TimerQueue::new(),
            microtasks: MicrotaskQueue::default(),
            fetch,
            fetch_handler: None,
            navigation: Rc::new(Cell::new(NavigationState::default())),
            window: WindowMetrics::default(),
            perf: PerfMetrics::default(),
            platform: PlatformInfo::detect(),
            background: [0.0; 4],
            images: ImageRegistry::new(),
            assets,
            clock_start,
        }
    }
}
