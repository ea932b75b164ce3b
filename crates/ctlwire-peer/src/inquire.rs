//! Server-initiated requests for data from the client.
//!
//! A handler calls [`Session::inquire`] to block until the client answers
//! `INQUIRE <keyword>` with `D` lines and `END`, or
//! [`Session::inquire_ext`] to return immediately and have a continuation
//! run once the reply is complete.

use ctlwire_line::{unescape_into, LINE_LENGTH};
use tracing::debug;

use crate::config::LogCategory;
use crate::error::{ErrorKind, PeerError, Result};
use crate::membuf::Membuf;
use crate::session::Session;

/// Runs once an asynchronous inquire resolves.
pub type Continuation<S> = Box<dyn FnOnce(&mut Session<S>, Result<Vec<u8>>) -> Result<()> + Send>;

/// Inquire progress of a session.
pub(crate) enum InquireState<S> {
    Idle,
    /// A blocking inquire is reading the reply.
    Blocking,
    /// Waiting for reply lines to arrive through the driver loop.
    Awaiting(Box<PendingInquire<S>>),
}

pub(crate) struct PendingInquire<S> {
    keyword: String,
    buffer: Membuf,
    continuation: Continuation<S>,
}

impl<S> InquireState<S> {
    pub(crate) fn is_active(&self) -> bool {
        !matches!(self, Self::Idle)
    }

    pub(crate) fn is_awaiting(&self) -> bool {
        matches!(self, Self::Awaiting(_))
    }
}

/// What a line received during an inquire means.
#[derive(Debug, PartialEq, Eq)]
enum ReplyLine<'a> {
    End,
    Cancel,
    Data(&'a [u8]),
    Other,
}

fn classify(line: &[u8]) -> ReplyLine<'_> {
    // Keywords are matched case-insensitively to ease manual testing.
    let keyword = |word: &[u8]| {
        line.len() >= word.len()
            && line[..word.len()].eq_ignore_ascii_case(word)
            && (line.len() == word.len() || line[word.len()] == b' ')
    };
    if keyword(b"END") {
        return ReplyLine::End;
    }
    if keyword(b"CAN") {
        return ReplyLine::Cancel;
    }
    if line.len() >= 2 && (line[0] == b'D' || line[0] == b'd') && line[1] == b' ' {
        return ReplyLine::Data(&line[2..]);
    }
    ReplyLine::Other
}

/// Decode a data payload into `buffer`. Returns the error that ends the
/// inquire, if any.
fn collect(buffer: &mut Membuf, payload: &[u8]) -> Option<PeerError> {
    if payload.is_empty() {
        return None;
    }
    let mut decoded = Vec::with_capacity(payload.len());
    if let Err(e) = unescape_into(payload, &mut decoded) {
        return Some(PeerError::from(e));
    }
    buffer.append(&decoded);
    buffer.error()
}

impl<S> Session<S> {
    fn check_inquire(&self, keyword: &str) -> Result<()> {
        if keyword.len() + 10 >= LINE_LENGTH - 10 {
            return Err(PeerError::with_detail(
                ErrorKind::InvalidValue,
                "inquire keyword too long",
            ));
        }
        self.require_server()?;
        if self.inquire.is_active() {
            return Err(PeerError::new(ErrorKind::NestedCommands));
        }
        Ok(())
    }

    /// Ask the client for data and block until it answers.
    ///
    /// `max_len` caps the reply (0 means unlimited); a larger reply fails
    /// with [`ErrorKind::TooMuchData`]. A `CAN` reply fails with
    /// [`ErrorKind::Canceled`].
    pub fn inquire(&mut self, keyword: &str, max_len: usize) -> Result<Vec<u8>> {
        self.check_inquire(keyword)?;
        self.inquire = InquireState::Blocking;
        let result = self.run_inquire(keyword, Some(Membuf::new(max_len)));
        self.inquire = InquireState::Idle;
        result.map(Option::unwrap_or_default)
    }

    /// Send `INQUIRE <keyword>` and wait for a bare `END`; any data line is
    /// an [`ErrorKind::UnexpectedCommand`].
    pub fn inquire_ack(&mut self, keyword: &str) -> Result<()> {
        self.check_inquire(keyword)?;
        self.inquire = InquireState::Blocking;
        let result = self.run_inquire(keyword, None);
        self.inquire = InquireState::Idle;
        result.map(|_| ())
    }

    fn run_inquire(&mut self, keyword: &str, mut buffer: Option<Membuf>) -> Result<Option<Vec<u8>>> {
        if self.log_config().enabled(LogCategory::Engine) {
            debug!(keyword, "sending inquire");
        }
        self.io
            .write_line(None, format!("INQUIRE {keyword}").as_bytes())
            .map_err(PeerError::Write)?;

        loop {
            self.io.read_line_retry()?;
            let line = self.io.line();
            if line.is_empty() || line[0] == b'#' {
                continue;
            }
            match classify(line) {
                ReplyLine::End => break,
                ReplyLine::Cancel => return Err(PeerError::new(ErrorKind::Canceled)),
                ReplyLine::Data(payload) => {
                    let Some(buffer) = buffer.as_mut() else {
                        return Err(PeerError::new(ErrorKind::UnexpectedCommand));
                    };
                    let payload = payload.to_vec();
                    if let Some(err) = collect(buffer, &payload) {
                        return Err(err);
                    }
                }
                ReplyLine::Other => return Err(PeerError::new(ErrorKind::UnexpectedCommand)),
            }
        }

        buffer.map(Membuf::finish).transpose()
    }

    /// Send `INQUIRE <keyword>` and return at once. The reply is collected
    /// by [`process_next`](Session::process_next); `continuation` then runs
    /// with the data or the failure, and its result completes the command
    /// unless it starts another inquire.
    pub fn inquire_ext<F>(&mut self, keyword: &str, max_len: usize, continuation: F) -> Result<()>
    where
        F: FnOnce(&mut Session<S>, Result<Vec<u8>>) -> Result<()> + Send + 'static,
    {
        self.check_inquire(keyword)?;
        if self.log_config().enabled(LogCategory::Engine) {
            debug!(keyword, "sending inquire (continuation)");
        }
        self.io
            .write_line(None, format!("INQUIRE {keyword}").as_bytes())
            .map_err(PeerError::Write)?;
        self.inquire = InquireState::Awaiting(Box::new(PendingInquire {
            keyword: keyword.to_string(),
            buffer: Membuf::new(max_len),
            continuation: Box::new(continuation),
        }));
        Ok(())
    }

    /// Keyword of the inquire waiting for a reply.
    pub fn pending_inquire(&self) -> Option<&str> {
        match &self.inquire {
            InquireState::Awaiting(pending) => Some(&pending.keyword),
            _ => None,
        }
    }

    /// Feed one reply line to the waiting inquire.
    pub(crate) fn feed_inquire(&mut self, line: &[u8]) -> Result<()> {
        let InquireState::Awaiting(pending) = &mut self.inquire else {
            return Ok(());
        };
        let outcome = match classify(line) {
            ReplyLine::Cancel => Some(Err(PeerError::new(ErrorKind::Canceled))),
            ReplyLine::End => Some(Ok(())),
            ReplyLine::Data(payload) => collect(&mut pending.buffer, payload).map(Err),
            ReplyLine::Other => Some(Err(PeerError::new(ErrorKind::UnexpectedCommand))),
        };
        let Some(outcome) = outcome else {
            return Ok(());
        };

        let InquireState::Awaiting(pending) = std::mem::replace(&mut self.inquire, InquireState::Idle)
        else {
            return Ok(());
        };
        let PendingInquire {
            buffer,
            continuation,
            ..
        } = *pending;
        let result = outcome.and_then(|()| buffer.finish());
        let rc = continuation(self, result);
        if rc.is_err() || !self.inquire.is_awaiting() {
            self.inquire = InquireState::Idle;
            return self.process_done(rc);
        }
        Ok(())
    }

    /// Drop a waiting inquire without running its continuation.
    pub(crate) fn release_inquire(&mut self) {
        if let InquireState::Awaiting(pending) = &self.inquire {
            debug!(keyword = %pending.keyword, "dropping unfinished inquire");
        }
        self.inquire = InquireState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufReader, Write};
    use std::sync::{Arc, Mutex};
    use std::thread;

    use super::*;
    use crate::session::tests::{read_reply, server_pair};

    #[test]
    fn classify_reply_lines() {
        assert_eq!(classify(b"END"), ReplyLine::End);
        assert_eq!(classify(b"end extra"), ReplyLine::End);
        assert_eq!(classify(b"ENDX"), ReplyLine::Other);
        assert_eq!(classify(b"CAN"), ReplyLine::Cancel);
        assert_eq!(classify(b"can now"), ReplyLine::Cancel);
        assert_eq!(classify(b"CANDY"), ReplyLine::Other);
        assert_eq!(classify(b"cancel"), ReplyLine::Other);
        assert_eq!(classify(b"D abc"), ReplyLine::Data(b"abc"));
        assert_eq!(classify(b"d "), ReplyLine::Data(b""));
        assert_eq!(classify(b"D"), ReplyLine::Other);
        assert_eq!(classify(b"NOP"), ReplyLine::Other);
    }

    #[test]
    fn blocking_inquire_collects_data() {
        let (mut session, peer) = server_pair(());
        let client = thread::spawn(move || {
            let mut writer = peer.try_clone().unwrap();
            let mut reader = BufReader::new(peer);
            assert_eq!(read_reply(&mut reader), "INQUIRE DATA");
            writer
                .write_all(b"# comment\n\nD hello%0A\nD \nd wor%6cd\nEND\n")
                .unwrap();
        });

        let data = session.inquire("DATA", 0).unwrap();
        assert_eq!(data, b"hello\nworld");
        assert!(!session.inquire.is_active());
        client.join().unwrap();
    }

    #[test]
    fn cancel_aborts_inquire() {
        let (mut session, mut peer) = server_pair(());
        peer.write_all(b"D partial\nCAN\n").unwrap();
        let err = session.inquire("PIN", 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Canceled);
        assert!(!session.inquire.is_active());
    }

    #[test]
    fn reply_over_cap_is_too_much_data() {
        let (mut session, mut peer) = server_pair(());
        peer.write_all(b"D 12345\nD 678\nEND\n").unwrap();
        let err = session.inquire("DATA", 6).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TooMuchData);
    }

    #[test]
    fn command_during_inquire_is_unexpected() {
        let (mut session, mut peer) = server_pair(());
        peer.write_all(b"NOP\n").unwrap();
        let err = session.inquire("DATA", 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedCommand);
    }

    #[test]
    fn can_prefix_is_not_a_cancel() {
        let (mut session, mut peer) = server_pair(());
        peer.write_all(b"CANDY\n").unwrap();
        let err = session.inquire("DATA", 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedCommand);
    }

    #[test]
    fn ack_inquire_rejects_data() {
        let (mut session, mut peer) = server_pair(());
        peer.write_all(b"END\nD oops\n").unwrap();
        session.inquire_ack("CONFIRM").unwrap();
        let err = session.inquire_ack("CONFIRM").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedCommand);
    }

    #[test]
    fn nested_inquire_rejected() {
        let (mut session, _peer) = server_pair(());
        session.inquire = InquireState::Blocking;
        let err = session.inquire("DATA", 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NestedCommands);
    }

    #[test]
    fn keyword_length_checked_first() {
        let (mut session, _peer) = server_pair(());
        session.inquire = InquireState::Blocking;
        let err = session.inquire(&"K".repeat(LINE_LENGTH), 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }

    #[test]
    fn sequential_inquires_are_allowed() {
        let (mut session, mut peer) = server_pair(());
        peer.write_all(b"D one\nEND\nD two\nEND\n").unwrap();
        assert_eq!(session.inquire("A", 0).unwrap(), b"one");
        assert_eq!(session.inquire("B", 0).unwrap(), b"two");
    }

    #[test]
    fn continuation_receives_reply() {
        let (mut session, peer) = server_pair(());
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);

        session.in_command = true;
        session
            .inquire_ext("DATA", 0, move |_, result| {
                *sink.lock().unwrap() = Some(result.map_err(|e| e.kind()));
                Ok(())
            })
            .unwrap();
        assert_eq!(session.pending_inquire(), Some("DATA"));
        assert!(session.inquire_ext("MORE", 0, |_, _| Ok(())).is_err());

        session.feed_inquire(b"D abc").unwrap();
        assert!(seen.lock().unwrap().is_none());
        session.feed_inquire(b"END").unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(Ok(b"abc".to_vec())));
        assert!(!session.inquire.is_active());
        assert!(!session.in_command);

        let mut peer = BufReader::new(peer);
        assert_eq!(read_reply(&mut peer), "INQUIRE DATA");
        assert_eq!(read_reply(&mut peer), "OK");
    }

    #[test]
    fn continuation_sees_cancel() {
        let (mut session, peer) = server_pair(());
        session.in_command = true;
        session
            .inquire_ext("PIN", 0, |_, result| result.map(|_| ()))
            .unwrap();
        session.feed_inquire(b"CAN").unwrap();

        let mut peer = BufReader::new(peer);
        assert_eq!(read_reply(&mut peer), "INQUIRE PIN");
        assert!(read_reply(&mut peer).starts_with("ERR 277 "));
    }
}
