use std::io::{ErrorKind, Write};

use bytes::{BufMut, BytesMut};
use tracing::warn;

use crate::codec::LINE_LENGTH;
use crate::error::Result;
use crate::monitor::{Direction, LineObserver, MonitorFlags};

/// Longest prefix kept when a line has to be truncated.
const MAX_TRUNCATED_PREFIX: usize = 5;

/// Write all of `buf`, retrying on interrupt.
pub fn write_all<W: Write + ?Sized>(dst: &mut W, mut buf: &[u8]) -> std::io::Result<()> {
    while !buf.is_empty() {
        match dst.write(buf) {
            Ok(0) => return Err(ErrorKind::WriteZero.into()),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Frame and send one line: `prefix`, `line`, then `\n`.
///
/// A frame that would exceed [`LINE_LENGTH`] is truncated (prefix capped at
/// five bytes, payload cut to fit) with a warning. The observer sees the
/// payload first and may suppress the write.
pub fn write_line<W, O>(
    dst: &mut W,
    prefix: Option<&[u8]>,
    line: &[u8],
    observer: &mut O,
) -> Result<MonitorFlags>
where
    W: Write + ?Sized,
    O: LineObserver + ?Sized,
{
    let mut prefix = prefix.unwrap_or_default();
    let mut line = line;

    if prefix.len() + line.len() + 1 > LINE_LENGTH {
        warn!(
            len = prefix.len() + line.len(),
            max = LINE_LENGTH,
            "line too long; truncating"
        );
        if prefix.len() > MAX_TRUNCATED_PREFIX {
            prefix = &prefix[..MAX_TRUNCATED_PREFIX];
        }
        line = &line[..line.len().min(LINE_LENGTH - prefix.len() - 1)];
    }

    let flags = observer.observe(Direction::Outbound, line);
    if flags.contains(MonitorFlags::IGNORE) {
        return Ok(flags);
    }

    let mut frame = BytesMut::with_capacity(prefix.len() + line.len() + 1);
    frame.put_slice(prefix);
    frame.put_slice(line);
    frame.put_u8(b'\n');
    write_all(dst, &frame)?;
    Ok(flags)
}

/// Cut `line` at its first embedded `\n`, warning if one was found.
pub fn first_line(line: &[u8]) -> &[u8] {
    match line.iter().position(|&b| b == b'\n') {
        Some(pos) => {
            warn!(
                len = line.len(),
                kept = pos,
                "line contains a terminator; truncating"
            );
            &line[..pos]
        }
        None => line,
    }
}
