use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::bundle::BundleMode;
use crate::fetch::ShutdownPolicy;

pub const DEFAULT_WINDOW_TITLE: &str = "kestrel-script-runtime";

/// Window description read once from the bundle's `app_config` object.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub sample_count: u32,
    pub swap_interval: u32,
    pub clipboard_size: u32,
    pub max_dropped_files: u32,
    pub max_dropped_file_path_length: u32,
    pub fullscreen: bool,
    pub high_dpi: bool,
    pub alpha: bool,
    pub enable_clipboard: bool,
    pub enable_dragndrop: bool,
    pub icon_path: Option<String>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: DEFAULT_WINDOW_TITLE.to_string(),
            width: 0,
            height: 0,
            sample_count: 1,
            swap_interval: 1,
            clipboard_size: 8192,
            max_dropped_files: 1,
            max_dropped_file_path_length: 2048,
            fullscreen: false,
            high_dpi: false,
            alpha: false,
            enable_clipboard: false,
            enable_dragndrop: false,
            icon_path: None,
        }
    }
}

impl WindowConfig {
    pub const FALLBACK_WIDTH: u32 = 1280;
    pub const FALLBACK_HEIGHT: u32 = 720;

    pub fn vsync(&self) -> bool {
        self.swap_interval > 0
    }

    /// Zero means "let the platform decide"; winit still needs a concrete initial size.
    pub fn initial_size(&self) -> (u32, u32) {
        let width = if self.width == 0 { Self::FALLBACK_WIDTH } else { self.width };
        let height = if self.height == 0 { Self::FALLBACK_HEIGHT } else { self.height };
        (width, height)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BundleConfig {
    #[serde(default)]
    pub mode: BundleMode,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "SchedulerConfig::default_max_macrotasks_per_frame")]
    pub max_macrotasks_per_frame: usize,
}

impl SchedulerConfig {
    const fn default_max_macrotasks_per_frame() -> usize {
        1_000
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { max_macrotasks_per_frame: Self::default_max_macrotasks_per_frame() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "FetchConfig::default_user_agent")]
    pub user_agent: String,
    #[serde(default = "FetchConfig::default_max_redirects")]
    pub max_redirects: usize,
    /// Join outstanding requests on shutdown instead of abandoning them with the process.
    #[serde(default)]
    pub join_on_shutdown: bool,
}

impl FetchConfig {
    fn default_user_agent() -> String {
        format!("kestrel-script-runtime/{}", env!("CARGO_PKG_VERSION"))
    }

    const fn default_max_redirects() -> usize {
        10
    }

    pub fn shutdown_policy(&self) -> ShutdownPolicy {
        if self.join_on_shutdown {
            ShutdownPolicy::Join
        } else {
            ShutdownPolicy::Detach
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: Self::default_user_agent(),
            max_redirects: Self::default_max_redirects(),
            join_on_shutdown: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub bundle: BundleConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub show_fps_in_title: bool,
    #[serde(default)]
    pub vsync: Option<bool>,
    #[serde(default = "AppConfig::default_log_filter")]
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bundle: BundleConfig::default(),
            scheduler: SchedulerConfig::default(),
            fetch: FetchConfig::default(),
            show_fps_in_title: false,
            vsync: None,
            log_filter: Self::default_log_filter(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub bundle_path: Option<PathBuf>,
    pub bundle_mode: Option<BundleMode>,
    pub vsync: Option<bool>,
}

impl AppConfig {
    pub const DEFAULT_PATH: &'static str = "config/app.json";

    fn default_log_filter() -> String {
        "info".to_string()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                eprintln!("[config] {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &AppConfigOverrides) {
        if let Some(path) = &overrides.bundle_path {
            self.bundle.path = Some(path.clone());
            // A bundle on the command line without an explicit mode means "load it once".
            if overrides.bundle_mode.is_none() && self.bundle.mode == BundleMode::Disabled {
                self.bundle.mode = BundleMode::Static;
            }
        }
        if let Some(mode) = overrides.bundle_mode {
            self.bundle.mode = mode;
        }
        if let Some(vsync) = overrides.vsync {
            self.vsync = Some(vsync);
        }
    }
}

impl AppConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.config_path.is_none()
            && self.bundle_path.is_none()
            && self.bundle_mode.is_none()
            && self.vsync.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.config_path.is_some() {
            fields.push("config");
        }
        if self.bundle_path.is_some() {
            fields.push("bundle");
        }
        if self.bundle_mode.is_some() {
            fields.push("mode");
        }
        if self.vsync.is_some() {
            fields.push("vsync");
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let mut file = NamedTempFile::new().expect("temp config");
        write!(file, r#"{{"bundle":{{"mode":"watch","path":"app.rhai"}},"fetch":{{"max_redirects":3}}}}"#)
            .expect("write config");
        let cfg = AppConfig::load(file.path()).expect("load config");
        assert_eq!(cfg.bundle.mode, BundleMode::Watch);
        assert_eq!(cfg.bundle.path.as_deref(), Some(Path::new("app.rhai")));
        assert_eq!(cfg.fetch.max_redirects, 3);
        assert_eq!(cfg.fetch.shutdown_policy(), ShutdownPolicy::Detach);
        assert_eq!(cfg.scheduler.max_macrotasks_per_frame, 1_000);
        assert_eq!(cfg.log_filter, "info");
    }

    #[test]
    fn bundle_override_promotes_disabled_mode_to_static() {
        let mut cfg = AppConfig::default();
        let overrides = AppConfigOverrides { bundle_path: Some("demo.rhai".into()), ..Default::default() };
        cfg.apply_overrides(&overrides);
        assert_eq!(cfg.bundle.mode, BundleMode::Static);

        let mut cfg = AppConfig::default();
        let overrides = AppConfigOverrides {
            bundle_path: Some("demo.rhai".into()),
            bundle_mode: Some(BundleMode::Watch),
            ..Default::default()
        };
        cfg.apply_overrides(&overrides);
        assert_eq!(cfg.bundle.mode, BundleMode::Watch);
        assert_eq!(overrides.applied_fields(), vec!["bundle", "mode"]);
    }

    #[test]
    fn window_defaults_match_platform_fallbacks() {
        let window = WindowConfig::default();
        assert_eq!(window.swap_interval, 1);
        assert_eq!(window.clipboard_size, 8192);
        assert_eq!(window.max_dropped_files, 1);
        assert!(window.vsync());
        assert_eq!(window.initial_size(), (1280, 720));
    }
}
