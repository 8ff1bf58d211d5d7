use std::{error, fmt, io};

/// Everything that can take a connection down.
///
/// There is no retry path: each variant closes the connection and surfaces
/// to the delegate as a single `on_close`.
#[derive(Debug, PartialEq)]
pub(crate) enum ErrorKind {
    /// Peer closed the stream (zero-byte read).
    ConnectionClosed,
    /// Transport read or write failed.
    TransportError(IoError),

    /// The request prelude state machine hit invalid syntax, a null byte,
    /// or a protocol token other than `HTTP/1.1`.
    HeaderParse,
    /// `content-length` was present but not a decimal integer.
    BadContentLength,
    /// Declared body length exceeds [`MAX_BODY_SIZE`](crate::limits::MAX_BODY_SIZE).
    BodyTooLarge,

    /// The read buffer is full and already at its ceiling.
    BufferExhausted,
    /// Appending a response would push the write queue past its ceiling.
    WriteQueueFull,
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        ErrorKind::TransportError(IoError(err))
    }
}

#[derive(Debug)]
pub(crate) struct IoError(pub(crate) io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}
