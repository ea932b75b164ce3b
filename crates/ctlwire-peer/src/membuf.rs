use crate::error::{ErrorKind, PeerError, Result};

const DEFAULT_INITIAL: usize = 1024;
const GROWTH: usize = 1024;

/// Terminal state of a [`Membuf`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembufState {
    Ok,
    /// An append would have exceeded the maximum length.
    CapacityExceeded,
    /// Growing the buffer failed.
    AllocationFailed,
}

/// Growable accumulator for inquire data with an optional hard cap.
///
/// Once the buffer leaves [`MembufState::Ok`] further appends are ignored
/// and [`finish`](Self::finish) fails.
#[derive(Debug)]
pub struct Membuf {
    buf: Vec<u8>,
    max_len: usize,
    state: MembufState,
}

impl Membuf {
    /// A buffer capped at `max_len` bytes (0 means unlimited).
    pub fn new(max_len: usize) -> Self {
        let initial = if max_len > 0 { max_len } else { DEFAULT_INITIAL };
        Self {
            buf: Vec::with_capacity(initial),
            max_len,
            state: MembufState::Ok,
        }
    }

    pub fn append(&mut self, data: &[u8]) {
        if self.state != MembufState::Ok {
            return;
        }
        if self.max_len > 0 && self.buf.len() + data.len() > self.max_len {
            self.state = MembufState::CapacityExceeded;
            return;
        }
        if self.buf.capacity() - self.buf.len() < data.len()
            && self.buf.try_reserve(data.len() + GROWTH).is_err()
        {
            self.state = MembufState::AllocationFailed;
            return;
        }
        self.buf.extend_from_slice(data);
    }

    pub fn state(&self) -> MembufState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The error this buffer's state maps to, if any.
    pub fn error(&self) -> Option<PeerError> {
        match self.state {
            MembufState::Ok => None,
            MembufState::CapacityExceeded => Some(PeerError::new(ErrorKind::TooMuchData)),
            MembufState::AllocationFailed => Some(PeerError::with_detail(
                ErrorKind::General,
                "out of memory while collecting inquire data",
            )),
        }
    }

    /// Hand out the collected bytes, or the terminal error.
    pub fn finish(self) -> Result<Vec<u8>> {
        match self.error() {
            Some(err) => Err(err),
            None => Ok(self.buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_appends() {
        let mut buf = Membuf::new(0);
        buf.append(b"hello");
        buf.append(b" ");
        buf.append(b"world");
        assert_eq!(buf.len(), 11);
        assert_eq!(buf.finish().unwrap(), b"hello world");
    }

    #[test]
    fn exact_cap_is_allowed() {
        let mut buf = Membuf::new(4);
        buf.append(b"ab");
        buf.append(b"cd");
        assert_eq!(buf.state(), MembufState::Ok);
        assert_eq!(buf.finish().unwrap(), b"abcd");
    }

    #[test]
    fn exceeding_cap_is_terminal() {
        let mut buf = Membuf::new(4);
        buf.append(b"abc");
        buf.append(b"de");
        assert_eq!(buf.state(), MembufState::CapacityExceeded);

        buf.append(b"");
        assert_eq!(buf.len(), 3);
        let err = buf.finish().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TooMuchData);
    }

    #[test]
    fn unlimited_grows_past_initial_capacity() {
        let mut buf = Membuf::new(0);
        for _ in 0..10 {
            buf.append(&[7u8; 500]);
        }
        assert_eq!(buf.finish().unwrap().len(), 5000);
    }
}
