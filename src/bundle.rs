use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::assets::EmbeddedAssets;

/// Asset name the built-in bundle is registered under.
pub const EMBEDDED_BUNDLE_NAME: &str = "bundle.rhai";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleMode {
    /// No external bundle: run the one compiled into the binary.
    #[default]
    Disabled,
    /// Load the bundle file once at startup.
    Static,
    /// Load the bundle file and reload it whenever it changes on disk.
    Watch,
}

impl BundleMode {
    pub fn label(self) -> &'static str {
        match self {
            BundleMode::Disabled => "disabled",
            BundleMode::Static => "static",
            BundleMode::Watch => "watch",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "disabled" | "embedded" | "off" => Some(BundleMode::Disabled),
            "static" | "load" => Some(BundleMode::Static),
            "watch" | "hot" | "reload" => Some(BundleMode::Watch),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BundleSource {
    pub name: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleInfo {
    mode: BundleMode,
    path: Option<PathBuf>,
}

impl BundleInfo {
    pub fn new(mode: BundleMode, path: Option<&Path>) -> Self {
        let path = path.filter(|p| !p.as_os_str().is_empty()).map(weakly_canonical);
        Self { mode, path }
    }

    pub fn mode(&self) -> BundleMode {
        self.mode
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn watch_requested(&self) -> bool {
        self.mode == BundleMode::Watch && self.path.is_some()
    }

    pub fn load_source(&self, assets: &EmbeddedAssets) -> Result<BundleSource> {
        match (self.mode, self.path.as_deref()) {
            (BundleMode::Disabled, _) => {
                let bytes = assets
                    .find(EMBEDDED_BUNDLE_NAME)
                    .ok_or_else(|| anyhow!("No embedded bundle registered as '{EMBEDDED_BUNDLE_NAME}'"))?;
                let code = String::from_utf8(bytes.to_vec()).context("Embedded bundle is not valid UTF-8")?;
                Ok(BundleSource { name: EMBEDDED_BUNDLE_NAME.to_string(), code })
            }
            (_, Some(path)) => read_bundle(path),
            (mode, None) => bail!("Bundle mode '{}' requires a bundle path", mode.label()),
        }
    }
}

pub fn read_bundle(path: &Path) -> Result<BundleSource> {
    let code = fs::read_to_string(path).with_context(|| format!("Reading bundle {}", path.display()))?;
    Ok(BundleSource { name: path.display().to_string(), code })
}

pub fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

/// Canonicalizes as much of the path as exists; a missing file keeps its name under the
/// canonical parent.
fn weakly_canonical(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else if let Ok(cwd) = env::current_dir() {
        cwd.join(path)
    } else {
        path.to_path_buf()
    };
    match fs::canonicalize(&absolute) {
        Ok(canonical) => canonical,
        Err(_) => match (absolute.parent().and_then(|parent| fs::canonicalize(parent).ok()), absolute.file_name()) {
            (Some(parent), Some(name)) => parent.join(name),
            _ => absolute,
        },
    }
}
