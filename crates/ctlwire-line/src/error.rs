/// Errors that can occur while reading or writing protocol lines.
#[derive(Debug, thiserror::Error)]
pub enum LineError {
    /// The peer closed the channel and no buffered line remains.
    #[error("end of file")]
    Eof,

    /// No line terminator within the maximum line length.
    #[error("line too long (max {max} bytes)")]
    LineTooLong { max: usize },

    /// The channel reached EOF in the middle of a line.
    #[error("incomplete line at end of file")]
    IncompleteLine,

    /// A `%` escape without two following hex digits.
    #[error("malformed escape sequence at offset {offset}")]
    MalformedEscape { offset: usize },

    /// An I/O error occurred on the underlying channel.
    #[error("line I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LineError {
    /// True for a would-block condition from a non-blocking channel.
    pub fn is_would_block(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::WouldBlock)
    }
}

pub type Result<T> = std::result::Result<T, LineError>;
