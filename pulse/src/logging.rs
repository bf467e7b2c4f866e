use log::LevelFilter;
use simplelog::*;
use std::fs::File;
use std::path::PathBuf;

/// Logging configuration for the Pulse client
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Master switch to enable/disable all logging
    pub enabled: bool,
    /// Path to the log file
    pub log_file: PathBuf,
    /// Whether to clear the log file on startup
    pub clear_on_startup: bool,
    /// Feature flags for specific logging categories
    pub features: LogFeatures,
    /// Overall log level
    pub level: LevelFilter,
}

/// Feature flags for specific logging categories
#[derive(Debug, Clone)]
pub struct LogFeatures {
    /// Realtime events received from change feeds
    pub realtime: bool,
    /// Backend calls issued by commands
    pub backend_calls: bool,
    /// Preference and session file changes
    pub settings: bool,
    /// General debug messages
    pub general: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_file: PathBuf::from("pulse_debug.log"),
            clear_on_startup: true,
            features: LogFeatures::default(),
            level: LevelFilter::Info,
        }
    }
}

impl Default for LogFeatures {
    fn default() -> Self {
        Self {
            realtime: true,
            backend_calls: true,
            settings: true,
            general: true,
        }
    }
}

impl LogConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Only errors and warnings
    pub fn minimal() -> Self {
        Self {
            enabled: true,
            level: LevelFilter::Warn,
            features: LogFeatures {
                realtime: false,
                backend_calls: false,
                settings: false,
                general: false,
            },
            ..Default::default()
        }
    }

    /// Everything, down to trace
    pub fn verbose() -> Self {
        Self {
            enabled: true,
            level: LevelFilter::Trace,
            features: LogFeatures::default(),
            ..Default::default()
        }
    }

    pub fn with_file(mut self, log_file: impl Into<PathBuf>) -> Self {
        self.log_file = log_file.into();
        self
    }
}

/// Initialize the logging system with the given configuration
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    if !config.enabled {
        let _ = WriteLogger::init(LevelFilter::Off, Config::default(), std::io::sink());
        return Ok(());
    }

    if config.clear_on_startup {
        let _ = File::create(&config.log_file)?;
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_file)?;

    let log_config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_time_offset_to_local()
        .unwrap_or_else(|builder| builder)
        .build();

    WriteLogger::init(config.level, log_config, log_file)?;

    log::info!("Logging initialized: file={}, level={:?}", config.log_file.display(), config.level);
    log::debug!("Log features: {:?}", config.features);

    Ok(())
}

/// Macro for logging realtime events
#[macro_export]
macro_rules! log_realtime {
    ($config:expr, $($arg:tt)*) => {
        if $config.enabled && $config.features.realtime {
            log::debug!(target: "realtime", $($arg)*);
        }
    };
}

/// Macro for logging backend calls
#[macro_export]
macro_rules! log_backend_call {
    ($config:expr, $($arg:tt)*) => {
        if $config.enabled && $config.features.backend_calls {
            log::debug!(target: "backend_calls", $($arg)*);
        }
    };
}

/// Macro for logging settings changes
#[macro_export]
macro_rules! log_settings {
    ($config:expr, $($arg:tt)*) => {
        if $config.enabled && $config.features.settings {
            log::debug!(target: "settings", $($arg)*);
        }
    };
}

/// Macro for general debug logging
#[macro_export]
macro_rules! log_debug {
    ($config:expr, $($arg:tt)*) => {
        if $config.enabled && $config.features.general {
            log::debug!(target: "general", $($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert!(!LogConfig::disabled().enabled);
        assert_eq!(LogConfig::minimal().level, LevelFilter::Warn);
        assert!(!LogConfig::minimal().features.realtime);
        assert_eq!(LogConfig::verbose().level, LevelFilter::Trace);
        assert!(LogConfig::verbose().features.backend_calls);
    }

    #[test]
    fn test_with_file() {
        let config = LogConfig::default().with_file("/tmp/pulse-test.log");
        assert_eq!(config.log_file, PathBuf::from("/tmp/pulse-test.log"));
    }

    #[test]
    fn test_macros_respect_flags() {
        let config = LogConfig::minimal();
        log_realtime!(config, "event {}", 1);
        log_backend_call!(config, "call {}", 2);
        log_settings!(config, "settings {}", 3);
        log_debug!(config, "debug {}", 4);
    }
}
