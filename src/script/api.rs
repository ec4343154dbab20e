use std::cell::RefCell;
use std::rc::Rc;

use rhai::{Array, Blob, Dynamic, Engine, EvalAltResult, FnPtr, Map, Position, FLOAT, INT};

use super::marshal::{as_flag, as_number, fetch_options_from_map, navigation_from_map, to_script_value};
use super::state::{Callback, HostState, NavigationState};
use crate::base64;
use crate::fetch::FetchOptions;
use crate::time::millis_since;

type HostResult<T> = Result<T, Box<EvalAltResult>>;
type Shared = Rc<RefCell<HostState>>;

fn host_error(message: impl Into<String>) -> Box<EvalAltResult> {
    let message: String = message.into();
    EvalAltResult::ErrorRuntime(message.into(), Position::NONE).into()
}

fn millis_arg(function: &str, value: &Dynamic) -> HostResult<f64> {
    as_number(value).ok_or_else(|| host_error(format!("{function}: delay must be a number, got {}", value.type_name())))
}

fn color_component(value: &Dynamic) -> HostResult<f32> {
    as_number(value)
        .map(|component| component as f32)
        .ok_or_else(|| {
            host_error(format!("set_background: color components must be numbers, got {}", value.type_name()))
        })
}

pub(crate) fn register_host_api(engine: &mut Engine, state: &Shared) {
    register_timers(engine, state);
    register_fetch(engine, state);
    register_navigation(engine, state);
    register_snapshots(engine, state);
    register_codec(engine);
    register_images(engine, state);
}

fn register_timers(engine: &mut Engine, state: &Shared) {
    let s = state.clone();
    engine.register_fn("set_timeout", move |callback: FnPtr, ms: Dynamic| -> HostResult<INT> {
        let delay = millis_arg("set_timeout", &ms)?;
        Ok(s.borrow_mut().timers.set_timeout(Callback::new(callback), delay))
    });
    let s = state.clone();
    engine.register_fn("set_timeout", move |callback: FnPtr, ms: Dynamic, args: Array| -> HostResult<INT> {
        let delay = millis_arg("set_timeout", &ms)?;
        Ok(s.borrow_mut().timers.set_timeout(Callback::with_args(callback, args), delay))
    });
    let s = state.clone();
    engine.register_fn("set_immediate", move |callback: FnPtr| -> INT {
        s.borrow_mut().timers.set_timeout(Callback::new(callback), 0.0)
    });
    let s = state.clone();
    engine.register_fn("set_immediate", move |callback: FnPtr, args: Array| -> INT {
        s.borrow_mut().timers.set_timeout(Callback::with_args(callback, args), 0.0)
    });
    let s = state.clone();
    engine.register_fn("set_interval", move |callback: FnPtr, ms: Dynamic| -> HostResult<INT> {
        let period = millis_arg("set_interval", &ms)?;
        Ok(s.borrow_mut().timers.set_interval(Callback::new(callback), period))
    });
    let s = state.clone();
    engine.register_fn("set_interval", move |callback: FnPtr, ms: Dynamic, args: Array| -> HostResult<INT> {
        let period = millis_arg("set_interval", &ms)?;
        Ok(s.borrow_mut().timers.set_interval(Callback::with_args(callback, args), period))
    });
    for name in ["clear_timeout", "clear_interval", "clear_immediate"] {
        let s = state.clone();
        engine.register_fn(name, move |id: INT| {
            s.borrow_mut().timers.clear(id);
        });
    }

    let s = state.clone();
    engine.register_fn("queue_microtask", move |callback: FnPtr| {
        s.borrow_mut().microtasks.push(Callback::new(callback));
    });
    let s = state.clone();
    engine.register_fn("performance_now", move || -> FLOAT { millis_since(s.borrow().clock_start) });
}

fn start_fetch(state: &Shared, url: &str, options: FetchOptions) -> HostResult<INT> {
    let mut guard = state.borrow_mut();
    let client = guard.fetch.as_mut().ok_or_else(|| host_error("fetch: networking is not available"))?;
    client.start(url, options).map(|id| id as INT).map_err(|err| host_error(format!("fetch: {err}")))
}

fn register_fetch(engine: &mut Engine, state: &Shared) {
    let s = state.clone();
    engine.register_fn("fetch", move |url: &str| start_fetch(&s, url, FetchOptions::default()));
    let s = state.clone();
    engine.register_fn("fetch", move |url: &str, options: Map| -> HostResult<INT> {
        let options = fetch_options_from_map(&options).map_err(|message| host_error(format!("fetch: {message}")))?;
        start_fetch(&s, url, options)
    });
    let s = state.clone();
    engine.register_fn("on_fetch_complete", move |handler: FnPtr| {
        s.borrow_mut().fetch_handler = Some(handler);
    });
}

fn register_navigation(engine: &mut Engine, state: &Shared) {
    let s = state.clone();
    engine.register_fn("set_navigation", move |keyboard: Dynamic, gamepad: Dynamic| -> HostResult<()> {
        let flag = |value: &Dynamic, name: &str| {
            as_flag(value).ok_or_else(|| {
                host_error(format!("set_navigation: '{name}' must be a boolean or number, got {}", value.type_name()))
            })
        };
        let next = NavigationState { keyboard: flag(&keyboard, "keyboard")?, gamepad: flag(&gamepad, "gamepad")? };
        s.borrow().navigation.set(next);
        Ok(())
    });
    let s = state.clone();
    engine.register_fn("set_navigation", move |options: Map| -> HostResult<()> {
        let guard = s.borrow();
        let next = navigation_from_map(&options, guard.navigation.get())
            .map_err(|message| host_error(format!("set_navigation: {message}")))?;
        guard.navigation.set(next);
        Ok(())
    });
    let s = state.clone();
    engine.register_fn("get_navigation", move || -> Dynamic { to_script_value(&s.borrow().navigation.get()) });
}

fn register_snapshots(engine: &mut Engine, state: &Shared) {
    let s = state.clone();
    engine.register_fn("window_metrics", move || -> Dynamic { to_script_value(&s.borrow().window) });
    let s = state.clone();
    engine.register_fn("platform_info", move || -> Dynamic { to_script_value(&s.borrow().platform) });
    let s = state.clone();
    engine.register_fn("perf_metrics", move || -> Dynamic { to_script_value(&s.borrow().perf) });

    let s = state.clone();
    engine.register_fn(
        "set_background",
        move |r: Dynamic, g: Dynamic, b: Dynamic, a: Dynamic| -> HostResult<()> {
            let color = [color_component(&r)?, color_component(&g)?, color_component(&b)?, color_component(&a)?];
            s.borrow_mut().background = color;
            Ok(())
        },
    );
    let s = state.clone();
    engine.register_fn("set_background", move |r: Dynamic, g: Dynamic, b: Dynamic| -> HostResult<()> {
        let color = [color_component(&r)?, color_component(&g)?, color_component(&b)?, 1.0];
        s.borrow_mut().background = color;
        Ok(())
    });
}

fn register_codec(engine: &mut Engine) {
    engine.register_fn("base64_encode", |bytes: Blob| -> String { base64::encode(&bytes) });
    engine.register_fn("base64_encode", |text: &str| -> String { base64::encode(text.as_bytes()) });
    engine.register_fn("base64_decode", |text: &str| -> HostResult<Blob> {
        base64::decode(text).map_err(|err| host_error(format!("base64_decode: {err}")))
    });
    engine.register_fn("utf8_decode", |bytes: Blob| -> String { String::from_utf8_lossy(&bytes).into_owned() });
}

fn register_images(engine: &mut Engine, state: &Shared) {
    let s = state.clone();
    engine.register_fn("load_image", move |path: &str| -> HostResult<INT> {
        let mut guard = s.borrow_mut();
        let assets = guard.assets.clone();
        guard
            .images
            .load(&assets, path)
            .map(|index| index as INT)
            .map_err(|err| host_error(format!("load_image: {err:#}")))
    });
    let s = state.clone();
    engine.register_fn("image_width", move |index: INT| -> INT {
        match s.borrow().images.get(index) {
            Ok(image) => image.width as INT,
            Err(err) => {
                log::error!("[script] image_width: {err}");
                0
            }
        }
    });
    let s = state.clone();
    engine.register_fn("image_height", move |index: INT| -> INT {
        match s.borrow().images.get(index) {
            Ok(image) => image.height as INT,
            Err(err) => {
                log::error!("[script] image_height: {err}");
                0
            }
        }
    });
}
