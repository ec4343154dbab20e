//! The rhai host: compiles a bundle, exposes native services to it and invokes its entry points.
//!
//! Everything here runs on the thread that created the [`ScriptHost`]. Host functions only touch
//! [`state::HostState`]; they never call back into the engine, so a script callback is never
//! entered while another one is running.

pub mod api;
pub mod marshal;
pub mod state;
pub mod timers;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, Result};
use rhai::{CallFnOptions, Dynamic, Engine, EvalAltResult, FuncArgs, Map, ParseError, Position, Scope, AST, FLOAT, INT};
use thiserror::Error;

use self::state::{Callback, HostState, NativeStateSync, PerfMetrics, SharedNavigation, WindowMetrics};
use crate::assets::EmbeddedAssets;
use crate::bundle::BundleSource;
use crate::config::WindowConfig;
use crate::fetch::{FetchClient, FetchResult};
use crate::hot_reload::BundleReloader;
use crate::scheduler::ScriptRuntime;

/// Functions every bundle must define, with their arity.
pub const REQUIRED_ENTRY_POINTS: [(&str, usize); 2] = [("on_init", 0), ("on_frame", 3)];

/// Top-level variable holding the window description.
pub const APP_CONFIG_VAR: &str = "app_config";
/// Top-level variable bound as `this` for entry-point calls.
pub const APP_STATE_VAR: &str = "app_state";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}{message}", location_prefix(.script, .line, .column))]
pub struct ScriptError {
    pub message: String,
    pub script: Option<String>,
    pub line: Option<usize>,
    pub column: Option<usize>,
}

fn location_prefix(script: &Option<String>, line: &Option<usize>, column: &Option<usize>) -> String {
    match (script, line) {
        (Some(script), Some(line)) => format!("{script}:{line}:{}: ", column.unwrap_or(0)),
        (Some(script), None) => format!("{script}: "),
        (None, Some(line)) => format!("line {line}: "),
        (None, None) => String::new(),
    }
}

impl ScriptError {
    pub fn new(message: impl Into<String>, script: &str, position: Position) -> Self {
        Self {
            message: message.into(),
            script: Some(script.to_string()),
            line: position.line(),
            column: position.position(),
        }
    }

    pub fn from_eval(err: &EvalAltResult, script: &str) -> Self {
        Self::new(err.to_string(), script, err.position())
    }

    pub fn from_parse(err: &ParseError, script: &str) -> Self {
        Self::new(err.to_string(), script, err.position())
    }
}

/// Native services handed to a new host.
pub struct HostServices {
    pub assets: Arc<EmbeddedAssets>,
    pub fetch: Option<FetchClient>,
    pub clock_start: Instant,
}

impl HostServices {
    pub fn new(assets: Arc<EmbeddedAssets>) -> Self {
        Self { assets, fetch: None, clock_start: Instant::now() }
    }

    pub fn with_fetch(mut self, fetch: FetchClient) -> Self {
        self.fetch = Some(fetch);
        self
    }
}

pub struct ScriptHost {
    engine: Engine,
    ast: AST,
    scope: Scope<'static>,
    state: Rc<RefCell<HostState>>,
    app_state: Dynamic,
    sync: NativeStateSync,
    source_name: String,
    initialized: bool,
}

impl ScriptHost {
    /// Compiles the bundle and evaluates its top-level statements.
    pub fn new(source: &BundleSource, services: HostServices) -> Result<Self, ScriptError> {
        let state = Rc::new(RefCell::new(HostState::new(services.assets, services.fetch, services.clock_start)));
        let mut engine = Engine::new();
        engine.set_fast_operators(true);
        engine.on_print(|text| log::info!("[script] {text}"));
        engine.on_debug(|text, source, pos| match source {
            Some(source) => log::debug!("[script] {source}:{pos} {text}"),
            None => log::debug!("[script] {pos} {text}"),
        });
        api::register_host_api(&mut engine, &state);

        let (ast, scope) = evaluate_bundle(&engine, source)?;
        let app_state = scope.get_value::<Dynamic>(APP_STATE_VAR).unwrap_or_else(|| Map::new().into());
        Ok(Self {
            engine,
            ast,
            scope,
            state,
            app_state,
            sync: NativeStateSync::default(),
            source_name: source.name.clone(),
            initialized: false,
        })
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn has_function(&self, name: &str, arity: usize) -> bool {
        self.ast.iter_functions().any(|func| func.name == name && func.params.len() == arity)
    }

    pub fn missing_entry_points(&self) -> Vec<String> {
        REQUIRED_ENTRY_POINTS
            .iter()
            .filter(|(name, arity)| !self.has_function(name, *arity))
            .map(|(name, arity)| format!("{name}/{arity}"))
            .collect()
    }

    /// Window description from the bundle's `app_config` map, or defaults when it is absent.
    pub fn window_config(&self) -> WindowConfig {
        match self.scope.get_value::<Map>(APP_CONFIG_VAR) {
            Some(map) => marshal::window_config_from_map(&map),
            None => WindowConfig::default(),
        }
    }

    /// Verifies the required entry points and runs `on_init`. Any failure here is fatal.
    pub fn initialize(&mut self) -> Result<()> {
        let missing = self.missing_entry_points();
        if !missing.is_empty() {
            bail!("Bundle '{}' is missing required entry points: {}", self.source_name, missing.join(", "));
        }
        self.call_entry("on_init", ()).map_err(|err| anyhow!("on_init failed: {err}"))?;
        for err in self.flush_microtasks() {
            log::error!("[script] microtask after on_init: {err}");
        }
        self.initialized = true;
        Ok(())
    }

    pub fn background(&self) -> [f32; 4] {
        self.state.borrow().background
    }

    pub fn navigation(&self) -> SharedNavigation {
        self.state.borrow().navigation.clone()
    }

    pub fn pending_timers(&self) -> usize {
        self.state.borrow().timers.len()
    }

    pub fn app_state(&self) -> &Dynamic {
        &self.app_state
    }

    pub fn fetch_in_flight(&self) -> usize {
        self.state.borrow().fetch.as_ref().map_or(0, FetchClient::in_flight)
    }

    pub fn reap_fetch_workers(&mut self) -> usize {
        self.state.borrow_mut().fetch.as_mut().map_or(0, FetchClient::reap_finished)
    }

    pub fn shutdown_fetch(&mut self) {
        if let Some(fetch) = self.state.borrow_mut().fetch.as_mut() {
            fetch.shutdown();
        }
    }

    /// Forwards an input event to `on_event` when the bundle defines it, then flushes
    /// microtasks. Returns the number of script errors.
    pub fn dispatch_event(&mut self, kind: INT, key: INT, modifiers: INT) -> usize {
        let mut errors = 0;
        if let Err(err) = self.call_optional("on_event", 3, (kind, key, modifiers)) {
            log::error!("[script] on_event: {err}");
            errors += 1;
        }
        errors + self.log_flush("on_event")
    }

    /// Pushes window metrics, perf counters and navigation into the script when they changed.
    /// Returns the number of script errors raised by listeners.
    pub fn sync_native_state(&mut self, window: WindowMetrics, perf: PerfMetrics) -> usize {
        let mut errors = 0;
        let window = {
            let mut state = self.state.borrow_mut();
            let sanitized = window.sanitized(&state.window);
            state.window = sanitized;
            state.perf = perf;
            sanitized
        };
        if self.sync.window_changed(window) {
            errors += self.notify("on_window_metrics", marshal::to_script_value(&window));
        }
        if self.sync.perf_changed(perf) {
            errors += self.notify("on_perf_metrics", marshal::to_script_value(&perf));
        }
        let navigation = self.state.borrow().navigation.get();
        if self.sync.navigation_changed(navigation) {
            errors += self.notify("on_navigation_changed", marshal::to_script_value(&navigation));
        }
        errors
    }

    /// Replaces the running code with `source`. The new bundle is compiled and evaluated in a
    /// fresh scope first; on error the current code and state stay untouched. Functions of the
    /// old bundle remain callable unless the new one redefines them, so queued timers keep
    /// resolving.
    pub fn reload(&mut self, source: &BundleSource) -> Result<(), ScriptError> {
        let (ast, scope) = evaluate_bundle(&self.engine, source)?;
        self.ast = self.ast.clone_functions_only().merge(&ast.clone_functions_only());
        if let Some(app_state) = scope.get_value::<Dynamic>(APP_STATE_VAR) {
            self.app_state = app_state;
        }
        self.scope = scope;
        self.source_name = source.name.clone();
        self.sync.reset();
        self.log_flush("reload");
        if let Err(err) = self.call_optional("render", 0, ()) {
            log::error!("[script] render after reload: {err}");
        }
        self.log_flush("render");
        Ok(())
    }

    fn notify(&mut self, listener: &str, payload: Dynamic) -> usize {
        match self.call_optional(listener, 1, (payload,)) {
            Ok(_) => self.log_flush(listener),
            Err(err) => {
                log::error!("[script] {listener}: {err}");
                1 + self.log_flush(listener)
            }
        }
    }

    fn log_flush(&mut self, after: &str) -> usize {
        let errors = self.flush_microtasks();
        for err in &errors {
            log::error!("[script] microtask after {after}: {err}");
        }
        errors.len()
    }

    fn call_entry(&mut self, name: &str, args: impl FuncArgs) -> Result<Dynamic, ScriptError> {
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true).bind_this_ptr(&mut self.app_state);
        self.engine
            .call_fn_with_options::<Dynamic>(options, &mut self.scope, &self.ast, name, args)
            .map_err(|err| ScriptError::from_eval(&err, &self.source_name))
    }

    fn call_optional(&mut self, name: &str, arity: usize, args: impl FuncArgs) -> Result<bool, ScriptError> {
        if !self.has_function(name, arity) {
            return Ok(false);
        }
        self.call_entry(name, args).map(|_| true)
    }

    fn invoke(&self, callback: Callback) -> Result<(), ScriptError> {
        callback
            .func
            .call::<Dynamic>(&self.engine, &self.ast, callback.args)
            .map(|_| ())
            .map_err(|err| ScriptError::from_eval(&err, &self.source_name))
    }
}

fn evaluate_bundle(engine: &Engine, source: &BundleSource) -> Result<(AST, Scope<'static>), ScriptError> {
    let mut ast = engine.compile(&source.code).map_err(|err| ScriptError::from_parse(&err, &source.name))?;
    ast.set_source(source.name.as_str());
    let mut scope = Scope::new();
    engine.run_ast_with_scope(&mut scope, &ast).map_err(|err| ScriptError::from_eval(&err, &source.name))?;
    Ok((ast, scope))
}

impl ScriptRuntime for ScriptHost {
    fn begin_frame(&mut self, now_ms: f64) {
        self.state.borrow_mut().timers.set_now(now_ms);
    }

    fn deliver_fetch_result(&mut self, result: FetchResult) -> Result<bool, ScriptError> {
        let handler = self.state.borrow().fetch_handler.clone();
        let Some(handler) = handler else {
            return Ok(false);
        };
        let payload = marshal::fetch_result_to_dynamic(&result);
        self.invoke(Callback::with_args(handler, vec![payload])).map(|_| true)
    }

    fn peek_next_due(&self) -> f64 {
        self.state.borrow().timers.peek_next_due()
    }

    fn run_due(&mut self, now_ms: f64) -> Result<(), ScriptError> {
        let due = self.state.borrow_mut().timers.pop_due(now_ms);
        let Some(timer) = due else {
            return Ok(());
        };
        let outcome = self.invoke(timer.callback.clone());
        self.state.borrow_mut().timers.reschedule(timer);
        outcome
    }

    fn flush_microtasks(&mut self) -> Vec<ScriptError> {
        let mut errors = Vec::new();
        loop {
            let next = self.state.borrow_mut().microtasks.pop();
            let Some(task) = next else {
                return errors;
            };
            if let Err(err) = self.invoke(task) {
                errors.push(err);
            }
        }
    }

    fn on_frame(&mut self, width: u32, height: u32, elapsed_seconds: f64) -> Result<(), ScriptError> {
        self.call_entry("on_frame", (width as FLOAT, height as FLOAT, elapsed_seconds as FLOAT)).map(|_| ())
    }
}

impl BundleReloader for ScriptHost {
    fn reload_bundle(&mut self, source: &BundleSource) -> Result<(), ScriptError> {
        self.reload(source)
    }
}
