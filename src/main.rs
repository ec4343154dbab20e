use kestrel_script_runtime::assets::EmbeddedAssetsBuilder;
use kestrel_script_runtime::bundle::EMBEDDED_BUNDLE_NAME;
use kestrel_script_runtime::cli::CliOverrides;
use kestrel_script_runtime::config::AppConfig;
use kestrel_script_runtime::run;

const EMBEDDED_BUNDLE: &[u8] = include_bytes!("../assets/bundle/app.rhai");

fn main() {
    let overrides = match CliOverrides::parse_from_env() {
        Ok(parsed) => parsed.into_config_overrides(),
        Err(err) => {
            eprintln!("[cli] {err}");
            std::process::exit(2);
        }
    };
    let config_path = overrides.config_path.clone().unwrap_or_else(|| AppConfig::DEFAULT_PATH.into());
    let mut config = AppConfig::load_or_default(&config_path);
    config.apply_overrides(&overrides);

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_filter.as_str())).init();
    if !overrides.is_empty() {
        log::info!("[cli] overrides: {}", overrides.applied_fields().join(", "));
    }

    let mut assets = EmbeddedAssetsBuilder::new();
    assets.register(EMBEDDED_BUNDLE_NAME, EMBEDDED_BUNDLE);
    if let Err(err) = run(config, assets.freeze()) {
        eprintln!("Application error: {err:?}");
        std::process::exit(1);
    }
}
