use std::sync::{Arc, OnceLock};

/// Environment variable holding the diagnostic category bitmask.
pub const DEBUG_ENV: &str = "CTLWIRE_DEBUG";

/// Environment variable that, when present, disables payload truncation in
/// control-channel logs.
pub const FULL_LOGGING_ENV: &str = "CTLWIRE_FULL_LOGGING";

/// Diagnostic categories that can be switched on individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogCategory {
    Init = 1,
    Ctx = 2,
    Engine = 3,
    Data = 4,
    SysIo = 5,
    Control = 8,
}

impl LogCategory {
    /// Bit for this category in the [`DEBUG_ENV`] mask.
    pub fn bit(self) -> u32 {
        1 << (self as u32 - 1)
    }
}

/// Logging knobs shared by every session of a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    categories: u32,
    full_logging: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            categories: LogCategory::Control.bit(),
            full_logging: false,
        }
    }
}

impl LogConfig {
    /// A configuration with every category off.
    pub fn quiet() -> Self {
        Self {
            categories: 0,
            full_logging: false,
        }
    }

    /// Read [`DEBUG_ENV`] and [`FULL_LOGGING_ENV`].
    ///
    /// An unset mask keeps the default (control traffic only). A set but
    /// non-numeric mask counts as zero.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(mask) = std::env::var(DEBUG_ENV) {
            config.categories = parse_mask(&mask);
        }
        config.full_logging = std::env::var_os(FULL_LOGGING_ENV).is_some();
        config
    }

    /// The process-wide configuration, read from the environment once.
    pub fn global() -> Arc<LogConfig> {
        static GLOBAL: OnceLock<Arc<LogConfig>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(Self::from_env())).clone()
    }

    pub fn with_category(mut self, category: LogCategory, enabled: bool) -> Self {
        if enabled {
            self.categories |= category.bit();
        } else {
            self.categories &= !category.bit();
        }
        self
    }

    pub fn with_full_logging(mut self, full: bool) -> Self {
        self.full_logging = full;
        self
    }

    pub fn enabled(&self, category: LogCategory) -> bool {
        self.categories & category.bit() != 0
    }

    pub fn full_logging(&self) -> bool {
        self.full_logging
    }
}

fn parse_mask(value: &str) -> u32 {
    let digits: &str = {
        let trimmed = value.trim_start();
        let end = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        &trimmed[..end]
    };
    digits.parse().unwrap_or(0)
}

/// Server-side session settings.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Answer `OPTION` with "not implemented" when no option handler is
    /// registered, instead of accepting it silently.
    pub strict_options: bool,
    /// Logging configuration; the process-wide one when `None`.
    pub log: Option<Arc<LogConfig>>,
}

impl ServerConfig {
    pub fn with_strict_options(mut self, strict: bool) -> Self {
        self.strict_options = strict;
        self
    }

    pub fn with_log(mut self, log: Arc<LogConfig>) -> Self {
        self.log = Some(log);
        self
    }

    pub(crate) fn log_config(&self) -> Arc<LogConfig> {
        self.log.clone().unwrap_or_else(LogConfig::global)
    }
}

/// Client-side connection settings.
#[derive(Debug, Clone, Default)]
pub struct ConnectConfig {
    /// Leave the SIGPIPE disposition alone when spawning a server.
    pub no_fix_signals: bool,
    /// The caller reaps the spawned server itself.
    pub no_waitpid: bool,
    /// Use a socket pair with descriptor passing instead of two pipes.
    pub fd_passing: bool,
    /// Logging configuration; the process-wide one when `None`.
    pub log: Option<Arc<LogConfig>>,
}

impl ConnectConfig {
    pub fn with_no_fix_signals(mut self, skip: bool) -> Self {
        self.no_fix_signals = skip;
        self
    }

    pub fn with_no_waitpid(mut self, skip: bool) -> Self {
        self.no_waitpid = skip;
        self
    }

    pub fn with_fd_passing(mut self, enabled: bool) -> Self {
        self.fd_passing = enabled;
        self
    }

    pub fn with_log(mut self, log: Arc<LogConfig>) -> Self {
        self.log = Some(log);
        self
    }

    pub(crate) fn log_config(&self) -> Arc<LogConfig> {
        self.log.clone().unwrap_or_else(LogConfig::global)
    }
}
