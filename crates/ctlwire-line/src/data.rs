use std::io::{ErrorKind, Write};

use bytes::{BufMut, BytesMut};
use tracing::debug;

use crate::codec::{escape_byte, DATA_LINE_LIMIT, DATA_PREFIX, LINE_LENGTH};
use crate::error::{LineError, Result};
use crate::monitor::{Direction, LineObserver, MonitorFlags};
use crate::writer::write_all;

/// Assembles outbound `D ` lines.
///
/// Payload bytes are escaped into a buffer that is sent as one line whenever
/// it reaches [`DATA_LINE_LIMIT`]. The first write failure is remembered;
/// every later call fails with it until [`reset`](Self::reset).
#[derive(Debug)]
pub struct DataWriter {
    buf: BytesMut,
    error: Option<StickyError>,
}

#[derive(Debug, Clone, Copy)]
struct StickyError {
    kind: ErrorKind,
    os_code: Option<i32>,
}

impl StickyError {
    fn to_error(self) -> LineError {
        LineError::Io(match self.os_code {
            Some(code) => std::io::Error::from_raw_os_error(code),
            None => self.kind.into(),
        })
    }
}

impl DataWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(LINE_LENGTH),
            error: None,
        }
    }

    /// Escape and buffer `data`, sending every line that fills up.
    pub fn write<W, O>(&mut self, dst: &mut W, data: &[u8], observer: &mut O) -> Result<()>
    where
        W: Write + ?Sized,
        O: LineObserver + ?Sized,
    {
        self.check()?;
        let mut rest = data;
        while !rest.is_empty() {
            if self.buf.is_empty() {
                self.buf.put_slice(DATA_PREFIX);
            }
            while let Some((&byte, tail)) = rest.split_first() {
                if self.buf.len() >= DATA_LINE_LIMIT {
                    break;
                }
                escape_byte(byte, &mut self.buf);
                rest = tail;
            }
            if self.buf.len() >= DATA_LINE_LIMIT {
                self.emit(dst, observer)?;
            }
        }
        Ok(())
    }

    /// Send any partially filled line. Returns whether a line was sent.
    pub fn flush<W, O>(&mut self, dst: &mut W, observer: &mut O) -> Result<bool>
    where
        W: Write + ?Sized,
        O: LineObserver + ?Sized,
    {
        self.check()?;
        if self.buf.is_empty() {
            return Ok(false);
        }
        self.emit(dst, observer)?;
        Ok(true)
    }

    /// Drop buffered bytes and forget a remembered error.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.error = None;
    }

    /// The remembered write failure, if any.
    pub fn error(&self) -> Option<LineError> {
        self.error.map(StickyError::to_error)
    }

    /// Bytes waiting to be sent, `D ` marker included.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn check(&self) -> Result<()> {
        match self.error {
            Some(sticky) => Err(sticky.to_error()),
            None => Ok(()),
        }
    }

    fn emit<W, O>(&mut self, dst: &mut W, observer: &mut O) -> Result<()>
    where
        W: Write + ?Sized,
        O: LineObserver + ?Sized,
    {
        let flags = observer.observe(Direction::Outbound, &self.buf);
        if flags.contains(MonitorFlags::IGNORE) {
            self.buf.clear();
            return Ok(());
        }

        self.buf.put_u8(b'\n');
        let sent = write_all(dst, &self.buf);
        self.buf.clear();
        if let Err(e) = sent {
            debug!(error = %e, "data line write failed; further data refused");
            self.error = Some(StickyError {
                kind: e.kind(),
                os_code: e.raw_os_error(),
            });
            return Err(LineError::Io(e));
        }
        Ok(())
    }
}

impl Default for DataWriter {
    fn default() -> Self {
        Self::new()
    }
}
