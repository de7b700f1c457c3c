use log::LevelFilter;

pub const LOG_ENV_VAR: &str = "RUST_LOG";

/// Installs the global logger. `RUST_LOG` takes precedence over the
/// configured level.
pub fn init(default_level: LevelFilter) {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(default_level)
        .filter_module("winit", LevelFilter::Warn)
        .filter_module("wgpu_core", LevelFilter::Warn)
        .filter_module("wgpu_hal", LevelFilter::Warn)
        .filter_module("naga", LevelFilter::Warn)
        .format_timestamp_millis();

    if let Ok(filters) = std::env::var(LOG_ENV_VAR) {
        builder.parse_filters(&filters);
    }

    if let Err(err) = builder.try_init() {
        eprintln!("Logger already initialized: {err}");
    }
}
