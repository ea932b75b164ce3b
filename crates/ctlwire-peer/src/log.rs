//! Rendering of control-channel traffic for diagnostics.

use std::fmt::Write as _;
use std::sync::Arc;

use ctlwire_line::{Direction, LineObserver, MonitorFlags, DATA_PREFIX};
use tracing::debug;

use crate::config::{LogCategory, LogConfig};

/// Lines longer than this are cut unless full logging is on.
pub const LOG_TRUNCATE_AT: usize = 64;

const CONFIDENTIAL: &str = "[Confidential data not shown]";

/// Render a protocol line for a log message.
///
/// Printable ASCII is kept, everything else becomes `\xNN`.
pub fn render_line(line: &[u8], confidential: bool, full: bool) -> String {
    if confidential {
        return CONFIDENTIAL.to_string();
    }
    if !full && line.starts_with(DATA_PREFIX) {
        return format!("D [{} bytes]", line.len() - DATA_PREFIX.len());
    }

    let shown = if full {
        line
    } else {
        &line[..line.len().min(LOG_TRUNCATE_AT)]
    };
    let mut out = String::with_capacity(shown.len() + 8);
    for &byte in shown {
        if byte == b' ' || byte.is_ascii_graphic() {
            out.push(byte as char);
        } else {
            let _ = write!(out, "\\x{byte:02x}");
        }
    }
    if shown.len() < line.len() {
        out.push_str("[...]");
    }
    out
}

/// Line observer installed on every session: forwards to the caller's
/// monitor and logs the line unless told not to.
pub(crate) struct ControlLog {
    pub(crate) config: Arc<LogConfig>,
    pub(crate) confidential: bool,
    pub(crate) monitor: Option<Box<dyn LineObserver + Send>>,
}

impl ControlLog {
    pub(crate) fn new(config: Arc<LogConfig>) -> Self {
        Self {
            config,
            confidential: false,
            monitor: None,
        }
    }
}

impl LineObserver for ControlLog {
    fn observe(&mut self, direction: Direction, line: &[u8]) -> MonitorFlags {
        let flags = match self.monitor.as_mut() {
            Some(monitor) => monitor.observe(direction, line),
            None => MonitorFlags::NONE,
        };
        if !flags.contains(MonitorFlags::NOLOG) && self.config.enabled(LogCategory::Control) {
            let arrow = match direction {
                Direction::Inbound => "<-",
                Direction::Outbound => "->",
            };
            debug!(
                target: "ctlwire::control",
                "{arrow} {}",
                render_line(line, self.confidential, self.config.full_logging())
            );
        }
        flags
    }
}

impl std::fmt::Debug for ControlLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlLog")
            .field("config", &self.config)
            .field("confidential", &self.confidential)
            .field("monitor", &self.monitor.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printable_lines_pass_through() {
        assert_eq!(render_line(b"OPTION foo=bar", false, false), "OPTION foo=bar");
    }

    #[test]
    fn control_bytes_are_hex_escaped() {
        assert_eq!(render_line(b"a\tb\x01", false, false), "a\\x09b\\x01");
    }

    #[test]
    fn long_lines_truncated_unless_full() {
        let line = vec![b'x'; 100];
        let short = render_line(&line, false, false);
        assert_eq!(short.len(), LOG_TRUNCATE_AT + "[...]".len());
        assert!(short.ends_with("[...]"));
        assert_eq!(render_line(&line, false, true).len(), 100);
    }

    #[test]
    fn data_lines_reduced_to_count() {
        assert_eq!(render_line(b"D secret", false, false), "D [6 bytes]");
        assert_eq!(render_line(b"D secret", false, true), "D secret");
    }

    #[test]
    fn confidential_hides_everything() {
        assert_eq!(
            render_line(b"D secret", true, true),
            "[Confidential data not shown]"
        );
    }

    #[test]
    fn monitor_flags_are_forwarded() {
        let mut log = ControlLog::new(Arc::new(LogConfig::quiet()));
        log.monitor = Some(Box::new(|_: Direction, line: &[u8]| {
            if line.starts_with(b"SECRET") {
                MonitorFlags::IGNORE
            } else {
                MonitorFlags::NONE
            }
        }));
        assert_eq!(
            log.observe(Direction::Outbound, b"SECRET x"),
            MonitorFlags::IGNORE
        );
        assert_eq!(log.observe(Direction::Outbound, b"OK"), MonitorFlags::NONE);
    }
}
