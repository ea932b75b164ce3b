use clap::ValueEnum;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Target the protocol engine logs control lines under.
const CONTROL_TARGET: &str = "ctlwire::control";

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Per-target filter: `level` everywhere, plus control-line traffic when
/// `wire` is set.
pub fn filter_for(level: LogLevel, wire: bool) -> Targets {
    let filter = Targets::new().with_default(level.as_filter());
    if wire {
        filter.with_target(CONTROL_TARGET, LevelFilter::DEBUG.max(level.as_filter()))
    } else {
        filter
    }
}

pub fn init_logging(format: LogFormat, level: LogLevel, wire: bool) {
    let filter = filter_for(level, wire);
    let show_target = wire || level >= LogLevel::Debug;
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_target(show_target);
            let _ = registry.with(layer).try_init();
        }
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(show_target);
            let _ = registry.with(layer).try_init();
        }
    }
}
