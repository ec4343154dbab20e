use crate::bundle::BundleMode;
use crate::config::AppConfigOverrides;
use anyhow::{anyhow, bail, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CliOverrides {
    config: Option<PathBuf>,
    bundle: Option<PathBuf>,
    mode: Option<BundleMode>,
    vsync: Option<bool>,
}

impl CliOverrides {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut overrides = CliOverrides::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            if !flag.starts_with("--") {
                bail!("Unexpected argument '{flag}'. Use --bundle/--mode/--config/--vsync with values.");
            }
            let key = &flag[2..];
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "config" => overrides.config = Some(parse_path_flag(flag, &value)?),
                "bundle" => overrides.bundle = Some(parse_path_flag(flag, &value)?),
                "mode" => {
                    let mode = BundleMode::parse(&value).ok_or_else(|| {
                        anyhow!("Invalid mode '{value}'. Use disabled, static or watch.")
                    })?;
                    overrides.mode = Some(mode);
                }
                "vsync" => {
                    overrides.vsync = Some(parse_bool_flag("vsync", &value)?);
                }
                _ => bail!("Unknown flag '{flag}'. Supported flags: --bundle, --mode, --config, --vsync."),
            }
        }
        Ok(overrides)
    }

    pub fn into_config_overrides(self) -> AppConfigOverrides {
        AppConfigOverrides {
            config_path: self.config,
            bundle_path: self.bundle,
            bundle_mode: self.mode,
            vsync: self.vsync,
        }
    }
}

fn parse_path_flag(flag: &str, value: &str) -> Result<PathBuf> {
    if value.trim().is_empty() {
        bail!("Expected a non-empty path after '{flag}'");
    }
    Ok(PathBuf::from(value))
}

fn parse_bool_flag(flag: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => bail!("Invalid {flag} value '{other}'. Use on/off or true/false."),
    }
}
