//! Conversions between script values and native data at host-function call sites.

use std::time::Duration;

use rhai::{Array, Blob, Dynamic, Map, INT};
use serde::Serialize;

use super::state::NavigationState;
use crate::config::WindowConfig;
use crate::fetch::{FetchOptions, FetchOutcome, FetchResult};

/// Numeric view of an integer or float value.
pub fn as_number(value: &Dynamic) -> Option<f64> {
    if let Ok(int) = value.as_int() {
        return Some(int as f64);
    }
    value.as_float().ok()
}

/// Booleans as-is, numbers as "non-zero means true".
pub fn as_flag(value: &Dynamic) -> Option<bool> {
    if let Ok(flag) = value.as_bool() {
        return Some(flag);
    }
    as_number(value).map(|number| number != 0.0 && !number.is_nan())
}

/// Non-finite values give `default`; everything else is clamped to the `i32` range.
pub fn safe_double_to_int(value: f64, default: i32) -> i32 {
    if !value.is_finite() {
        return default;
    }
    if value > i32::MAX as f64 {
        return i32::MAX;
    }
    if value < i32::MIN as f64 {
        return i32::MIN;
    }
    value as i32
}

fn read_u32(map: &Map, key: &str, default: u32) -> u32 {
    match map.get(key).and_then(as_number) {
        Some(number) => safe_double_to_int(number, default as i32).max(0) as u32,
        None => default,
    }
}

fn read_bool(map: &Map, key: &str, default: bool) -> bool {
    map.get(key).and_then(|value| value.as_bool().ok()).unwrap_or(default)
}

fn read_string(map: &Map, key: &str) -> Option<String> {
    map.get(key).filter(|value| value.is_string()).map(|value| value.to_string())
}

/// Builds the window description from the bundle's `app_config` map. Fields with the wrong type
/// keep their defaults.
pub fn window_config_from_map(map: &Map) -> WindowConfig {
    let defaults = WindowConfig::default();
    WindowConfig {
        title: read_string(map, "title").unwrap_or(defaults.title),
        width: read_u32(map, "width", defaults.width),
        height: read_u32(map, "height", defaults.height),
        sample_count: read_u32(map, "sample_count", defaults.sample_count),
        swap_interval: read_u32(map, "swap_interval", defaults.swap_interval),
        clipboard_size: read_u32(map, "clipboard_size", defaults.clipboard_size),
        max_dropped_files: read_u32(map, "max_dropped_files", defaults.max_dropped_files),
        max_dropped_file_path_length: read_u32(
            map,
            "max_dropped_file_path_length",
            defaults.max_dropped_file_path_length,
        ),
        fullscreen: read_bool(map, "fullscreen", defaults.fullscreen),
        high_dpi: read_bool(map, "high_dpi", defaults.high_dpi),
        alpha: read_bool(map, "alpha", defaults.alpha),
        enable_clipboard: read_bool(map, "enable_clipboard", defaults.enable_clipboard),
        enable_dragndrop: read_bool(map, "enable_dragndrop", defaults.enable_dragndrop),
        icon_path: read_string(map, "icon_path").filter(|path| !path.is_empty()),
    }
}

/// Reads `fetch` options property by property. Absent or unit properties are unset.
pub fn fetch_options_from_map(options: &Map) -> Result<FetchOptions, String> {
    let mut parsed = FetchOptions::default();
    let present = |key: &str| options.get(key).filter(|value| !value.is_unit());

    if let Some(method) = present("method") {
        if !method.is_string() {
            return Err(format!("fetch option 'method' must be a string, got {}", method.type_name()));
        }
        parsed.method = Some(method.to_string().to_ascii_uppercase());
    }
    if let Some(headers) = present("headers") {
        parsed.headers = headers_from_value(headers)?;
    }
    if let Some(body) = present("body") {
        parsed.body = Some(body_bytes(body));
    }
    // A timeout too large for a Duration never fires, so it is the same as none.
    if let Some(timeout) = present("timeout") {
        parsed.timeout = as_number(timeout)
            .filter(|ms| ms.is_finite() && *ms >= 0.0)
            .and_then(|ms| Duration::try_from_secs_f64(ms / 1000.0).ok());
    }
    if let Some(redirect) = present("redirect") {
        parsed.follow_redirects = redirect.to_string() != "manual";
    }

    let method = parsed.method.as_deref().unwrap_or("GET");
    if parsed.body.is_some() && (method == "GET" || method == "HEAD") {
        return Err(format!("{method} request cannot have a body"));
    }
    Ok(parsed)
}

/// Array of `[name, value]` pairs or a plain map. Names are lower-cased; duplicates are kept in
/// order.
fn headers_from_value(value: &Dynamic) -> Result<Vec<(String, String)>, String> {
    if value.is_array() {
        let entries = value.clone().try_cast::<Array>().unwrap_or_default();
        let mut headers = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(pair) = entry.try_cast::<Array>() else {
                return Err("fetch header entries must be [name, value] arrays".to_string());
            };
            if pair.len() >= 2 {
                headers.push((pair[0].to_string().to_ascii_lowercase(), pair[1].to_string()));
            }
        }
        return Ok(headers);
    }
    if value.is_map() {
        let map = value.clone().try_cast::<Map>().unwrap_or_default();
        return Ok(map.into_iter().map(|(name, value)| (name.to_ascii_lowercase(), value.to_string())).collect());
    }
    Err(format!("fetch option 'headers' must be an array or a map, got {}", value.type_name()))
}

fn body_bytes(value: &Dynamic) -> Vec<u8> {
    match value.clone().try_cast::<Blob>() {
        Some(blob) => blob,
        None => value.to_string().into_bytes(),
    }
}

/// Reads `keyboard` / `gamepad` from a map; missing fields keep their current value.
pub fn navigation_from_map(map: &Map, current: NavigationState) -> Result<NavigationState, String> {
    let field = |key: &str, fallback: bool| -> Result<bool, String> {
        match map.get(key).filter(|value| !value.is_unit()) {
            None => Ok(fallback),
            Some(value) => as_flag(value).ok_or_else(|| {
                format!("navigation field '{key}' must be a boolean or number, got {}", value.type_name())
            }),
        }
    };
    Ok(NavigationState { keyboard: field("keyboard", current.keyboard)?, gamepad: field("gamepad", current.gamepad)? })
}

/// Serializes a native snapshot into a script value. Serialization of these plain structs does
/// not fail in practice; a failure yields unit.
pub fn to_script_value<T: Serialize>(value: &T) -> Dynamic {
    rhai::serde::to_dynamic(value).unwrap_or_else(|err| {
        log::error!("[script] failed to convert native value: {err}");
        Dynamic::UNIT
    })
}

/// `#{id, ok, status, statusText, url, headers, body}` or `#{id, error}`.
pub fn fetch_result_to_dynamic(result: &FetchResult) -> Dynamic {
    let mut payload = match &result.outcome {
        FetchOutcome::Response(response) => to_script_value(response).try_cast::<Map>().unwrap_or_default(),
        FetchOutcome::Error(message) => {
            let mut map = Map::new();
            map.insert("error".into(), message.clone().into());
            map
        }
    };
    payload.insert("id".into(), Dynamic::from(result.id as INT));
    payload.into()
}
