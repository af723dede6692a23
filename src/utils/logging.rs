use crate::config::PluginConfig;
use log::LevelFilter;
use std::fs::OpenOptions;

const NOISY_DEPENDENCIES: [&str; 4] = ["tungstenite", "tokio_tungstenite", "hyper_util", "reqwest"];

/// Level used when `RUST_LOG` is not set: the command line wins over the config file.
pub fn effective_level(cli_level: Option<LevelFilter>, config: &PluginConfig) -> LevelFilter {
    cli_level.unwrap_or_else(|| config.log_level.to_level_filter())
}

/// Installs env_logger. `RUST_LOG`, when set, overrides every other level source.
///
/// Stream Deck discards plugin stderr, so a configured `log_file` is appended to
/// instead. Calling this twice only reports the second attempt.
pub fn init_logging(cli_level: Option<LevelFilter>, config: &PluginConfig) {
    let mut builder = if std::env::var_os("RUST_LOG").is_some() {
        env_logger::Builder::from_default_env()
    } else {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(effective_level(cli_level, config));
        for module in NOISY_DEPENDENCIES {
            builder.filter_module(module, LevelFilter::Warn);
        }
        builder
    };

    if let Some(path) = &config.log_file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Cannot open log file {}: {}", path.display(), e),
        }
    }

    if let Err(e) = builder.try_init() {
        eprintln!("Logger already initialized: {}", e);
    }
}
