use std::io::{ErrorKind, Read};
use std::time::Duration;

use bytes::BytesMut;
use tracing::trace;

use crate::codec::LINE_LENGTH;
use crate::error::{LineError, Result};
use crate::monitor::{Direction, LineObserver, MonitorFlags};

/// Pause between attempts when the channel reports would-block.
pub const WOULD_BLOCK_BACKOFF: Duration = Duration::from_millis(100);

/// Reassembles newline-terminated lines from a byte channel.
///
/// Bytes read past the first terminator are kept in a carry-over buffer and
/// served by the next call without touching the channel. The reader does not
/// own the channel; each call borrows it.
pub struct LineReader {
    line: Box<[u8]>,
    len: usize,
    attic: BytesMut,
    eof: bool,
    pending: bool,
}

impl LineReader {
    pub fn new() -> Self {
        Self {
            line: vec![0u8; LINE_LENGTH].into_boxed_slice(),
            len: 0,
            attic: BytesMut::with_capacity(LINE_LENGTH),
            eof: false,
            pending: false,
        }
    }

    /// Read the next line from `src`.
    ///
    /// On success [`line`](Self::line) holds the content with `\n` and any
    /// preceding `\r` stripped. If `src` would block, bytes read so far are
    /// kept for the next call and the would-block error is returned.
    pub fn read_line<R, O>(&mut self, src: &mut R, observer: &mut O) -> Result<MonitorFlags>
    where
        R: Read + ?Sized,
        O: LineObserver + ?Sized,
    {
        self.len = 0;
        if self.eof && self.attic.is_empty() {
            return Err(LineError::Eof);
        }

        let mut filled = self.attic.len();
        self.line[..filled].copy_from_slice(&self.attic);
        self.attic.clear();

        let mut scanned = 0;
        let newline = loop {
            if let Some(pos) = self.line[scanned..filled].iter().position(|&b| b == b'\n') {
                break Some(scanned + pos);
            }
            scanned = filled;
            if self.eof || filled == self.line.len() {
                break None;
            }
            match src.read(&mut self.line[filled..]) {
                Ok(0) => self.eof = true,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    if e.kind() == ErrorKind::WouldBlock {
                        self.attic.extend_from_slice(&self.line[..filled]);
                        self.pending = false;
                    }
                    return Err(LineError::Io(e));
                }
            }
        };

        self.pending = false;
        let Some(pos) = newline else {
            return Err(if filled == 0 {
                LineError::Eof
            } else if self.eof {
                LineError::IncompleteLine
            } else {
                LineError::LineTooLong { max: LINE_LENGTH }
            });
        };

        if pos + 1 < filled {
            self.attic.extend_from_slice(&self.line[pos + 1..filled]);
            self.pending = self.attic.contains(&b'\n');
        }

        let mut end = pos;
        if end > 0 && self.line[end - 1] == b'\r' {
            end -= 1;
        }
        self.len = end;

        let flags = observer.observe(Direction::Inbound, &self.line[..end]);
        if flags.contains(MonitorFlags::IGNORE) {
            trace!(len = end, "inbound line suppressed by monitor");
            self.len = 0;
        }
        Ok(flags)
    }

    /// Like [`read_line`](Self::read_line), but sleeps and retries while the
    /// channel would block.
    pub fn read_line_retry<R, O>(&mut self, src: &mut R, observer: &mut O) -> Result<MonitorFlags>
    where
        R: Read + ?Sized,
        O: LineObserver + ?Sized,
    {
        loop {
            match self.read_line(src, observer) {
                Err(e) if e.is_would_block() => std::thread::sleep(WOULD_BLOCK_BACKOFF),
                other => return other,
            }
        }
    }

    /// The current line, terminator stripped.
    pub fn line(&self) -> &[u8] {
        &self.line[..self.len]
    }

    /// True when another complete line is already buffered.
    pub fn pending(&self) -> bool {
        self.pending
    }

    /// True once the channel has reported end of file.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Forget the current line, buffered bytes and EOF state.
    pub fn reset(&mut self) {
        self.len = 0;
        self.attic.clear();
        self.eof = false;
        self.pending = false;
    }
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LineReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineReader")
            .field("len", &self.len)
            .field("buffered", &self.attic.len())
            .field("eof", &self.eof)
            .field("pending", &self.pending)
            .finish()
    }
}
