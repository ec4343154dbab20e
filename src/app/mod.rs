mod input;
mod perf;

pub use input::{is_navigation_key, key_code, DropPolicy, EventKind, InputTranslator, KeyModifiers, ScriptEvent};

use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use self::perf::PerfTracker;
use crate::assets::{self, EmbeddedAssets, RgbaImage};
use crate::bundle::BundleInfo;
use crate::config::{AppConfig, WindowConfig};
use crate::dispatch::ResultQueue;
use crate::fetch::{FetchClient, FetchResult};
use crate::hot_reload::{BundleWatcher, WatchEvent};
use crate::renderer::WindowSurface;
use crate::scheduler::{FrameInfo, FrameScheduler};
use crate::script::state::{SharedNavigation, WindowMetrics};
use crate::script::{HostServices, ScriptHost};
use crate::time::Time;

pub struct App {
    host: ScriptHost,
    surface: WindowSurface,
    window_config: WindowConfig,
    assets: Arc<EmbeddedAssets>,
    scheduler: FrameScheduler,
    watcher: BundleWatcher,
    dispatch: ResultQueue<FetchResult>,
    navigation: SharedNavigation,
    input: InputTranslator,
    perf: PerfTracker,
    time: Time,
    show_fps_in_title: bool,
    should_close: bool,
    fatal: Option<anyhow::Error>,
}

impl App {
    /// Loads and evaluates the bundle and prepares the frame loop. The window is created once
    /// the event loop resumes.
    pub fn new(config: AppConfig, assets: Arc<EmbeddedAssets>) -> Result<Self> {
        let bundle = BundleInfo::new(config.bundle.mode, config.bundle.path.as_deref());
        let source = bundle.load_source(&assets)?;
        log::info!("[bundle] running '{}' (mode: {})", source.name, bundle.mode().label());

        let time = Time::new();
        let dispatch = ResultQueue::new();
        let fetch = FetchClient::new(&config.fetch, dispatch.clone()).context("Failed to create fetch client")?;
        let services = HostServices {
            assets: assets.clone(),
            fetch: Some(fetch),
            clock_start: time.start(),
        };
        let host = ScriptHost::new(&source, services).map_err(|err| anyhow!("Failed to load bundle: {err}"))?;

        let mut window_config = host.window_config();
        if let Some(vsync) = config.vsync {
            window_config.swap_interval = u32::from(vsync);
        }
        let mut watcher = BundleWatcher::new();
        watcher.configure(&bundle);

        Ok(Self {
            navigation: host.navigation(),
            surface: WindowSurface::new(&window_config),
            input: InputTranslator::with_drop_policy(DropPolicy::from_window(&window_config)),
            window_config,
            host,
            assets,
            scheduler: FrameScheduler::new(&config.scheduler),
            watcher,
            dispatch,
            perf: PerfTracker::new(),
            time,
            show_fps_in_title: config.show_fps_in_title,
            should_close: false,
            fatal: None,
        })
    }

    fn load_icon(&self) -> Option<RgbaImage> {
        let path = self.window_config.icon_path.as_deref()?;
        match assets::load_rgba(&self.assets, path) {
            Ok(image) => Some(image),
            Err(err) => {
                log::warn!("[window] icon '{path}' unavailable: {err:#}");
                None
            }
        }
    }

    fn fail(&mut self, err: anyhow::Error) {
        log::error!("{err:#}");
        if self.fatal.is_none() {
            self.fatal = Some(err);
        }
        self.should_close = true;
    }

    fn forward_input(&mut self, event: &WindowEvent) {
        let events = self.input.translate(event);
        self.forward_script_events(events);
    }

    /// The quit chord closes the app without reaching the script.
    fn forward_script_events(&mut self, events: Vec<ScriptEvent>) {
        let keyboard_navigation = self.navigation.get().keyboard;
        for script_event in events {
            if script_event.is_quit_shortcut() {
                self.should_close = true;
                continue;
            }
            let is_key = matches!(script_event.kind, EventKind::KeyDown | EventKind::KeyUp);
            if is_key && is_navigation_key(script_event.key) && !keyboard_navigation {
                continue;
            }
            let (kind, key, modifiers) = script_event.args();
            self.host.dispatch_event(kind, key, modifiers);
        }
    }

    fn window_metrics(&self) -> WindowMetrics {
        let size = self.surface.size();
        let scale = self.surface.scale_factor();
        WindowMetrics {
            width: f64::from(size.width) / scale,
            height: f64::from(size.height) / scale,
            scale,
            font_scale: scale,
        }
    }

    fn frame(&mut self) {
        self.time.tick();
        self.host.reap_fetch_workers();
        if let WatchEvent::ReloadFailed(message) = self.watcher.tick(&mut self.host) {
            log::warn!("[hot-reload] keeping previous bundle: {message}");
        }

        let script_started = Instant::now();
        self.host.sync_native_state(self.window_metrics(), self.perf.metrics());
        let size = self.surface.size();
        let frame = FrameInfo {
            now_ms: self.time.frame_ms(),
            width: size.width,
            height: size.height,
            elapsed_seconds: self.time.elapsed_seconds(),
        };
        self.scheduler.tick(&mut self.host, &self.dispatch, frame);
        let script_ms = script_started.elapsed().as_secs_f64() * 1000.0;

        if self.perf.record_frame(Instant::now(), script_ms) && self.show_fps_in_title {
            self.surface.set_title(&self.perf.title(&self.window_config.title));
        }
        if let Err(err) = self.surface.render_clear(self.host.background()) {
            log::error!("[render] {err:#}");
        }
    }

    /// Stops fetch workers and returns the error that ended the loop, if any.
    fn finish(mut self) -> Result<()> {
        self.host.shutdown_fetch();
        match self.fatal.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.surface.window().is_some() {
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        let icon = self.load_icon();
        if let Err(err) = self.surface.ensure_window(event_loop, icon) {
            self.fail(err);
            return;
        }
        if let Err(err) = self.host.initialize() {
            self.fail(err);
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match &event {
            WindowEvent::CloseRequested => self.should_close = true,
            WindowEvent::Resized(size) => self.surface.resize(*size),
            _ => {}
        }
        if self.host.is_initialized() {
            self.forward_input(&event);
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.should_close {
            event_loop.exit();
            return;
        }
        if !self.host.is_initialized() {
            return;
        }
        self.frame();
    }
}

pub fn run(config: AppConfig, assets: Arc<EmbeddedAssets>) -> Result<()> {
    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let mut app = App::new(config, assets)?;
    event_loop.run_app(&mut app).context("Event loop error")?;
    app.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::EmbeddedAssetsBuilder;
    use crate::bundle::EMBEDDED_BUNDLE_NAME;
    use rhai::Map;

    const COUNTING_BUNDLE: &str = r#"
        let app_state = #{ events: 0 };
        fn on_init() {}
        fn on_frame(w, h, t) {}
        fn on_event(kind, key, modifiers) { this.events += 1; }
    "#;

    fn app() -> App {
        let mut assets = EmbeddedAssetsBuilder::new();
        assets.register(EMBEDDED_BUNDLE_NAME, COUNTING_BUNDLE.as_bytes());
        App::new(AppConfig::default(), assets.freeze()).expect("app")
    }

    fn script_events(app: &App) -> i64 {
        let state = app.host.app_state().clone().try_cast::<Map>().expect("state map");
        state["events"].as_int().expect("events counter")
    }

    #[test]
    fn quit_chord_closes_without_reaching_the_script() {
        let mut app = app();
        app.forward_script_events(vec![
            ScriptEvent::new(EventKind::KeyDown, input::KEY_Q, KeyModifiers::CTRL),
            ScriptEvent::new(EventKind::KeyDown, 65, KeyModifiers::empty()),
        ]);
        assert!(app.should_close);
        assert_eq!(script_events(&app), 1);
        app.finish().expect("clean shutdown");
    }
}
