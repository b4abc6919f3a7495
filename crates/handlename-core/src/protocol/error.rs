//! Protocol error types for the pipe transport.
//!
//! Every variant is fatal to the session: the transport never retries a
//! short read or write, it ends the loop and lets the process exit.

use std::io;

use thiserror::Error;

/// Protocol errors raised while exchanging fixed-size records.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The peer closed the channel (a read returned zero bytes).
    #[error("connection closed")]
    ConnectionClosed,

    /// A read returned fewer bytes than one record.
    #[error("short read: got {got} of {expected} bytes")]
    ShortRead {
        /// Bytes actually transferred.
        got: usize,
        /// Record size.
        expected: usize,
    },

    /// A write accepted fewer bytes than one record.
    #[error("short write: wrote {wrote} of {expected} bytes")]
    ShortWrite {
        /// Bytes actually transferred.
        wrote: usize,
        /// Record size.
        expected: usize,
    },

    /// A response carried a status value outside the taxonomy.
    #[error("unknown status value {0}")]
    UnknownStatus(u32),

    /// A response reported a name length larger than the name buffer.
    #[error("name length {len} exceeds buffer of {max} bytes")]
    NameTooLong {
        /// Reported length.
        len: u32,
        /// Buffer capacity.
        max: usize,
    },

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Create a short read error.
    #[must_use]
    pub const fn short_read(got: usize, expected: usize) -> Self {
        Self::ShortRead { got, expected }
    }

    /// Create a short write error.
    #[must_use]
    pub const fn short_write(wrote: usize, expected: usize) -> Self {
        Self::ShortWrite { wrote, expected }
    }

    /// Returns `true` if the peer went away rather than misbehaving.
    ///
    /// A broken pipe on a named pipe surfaces as an I/O error, so both it
    /// and a zero-byte read count as a disconnect.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::ConnectionClosed => true,
            Self::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_read_message() {
        let err = ProtocolError::short_read(3, 8);
        assert!(!err.is_disconnect());

        let msg = err.to_string();
        assert!(msg.contains('3'));
        assert!(msg.contains('8'));
    }

    #[test]
    fn test_disconnect_classification() {
        assert!(ProtocolError::ConnectionClosed.is_disconnect());

        let broken = io::Error::new(io::ErrorKind::BrokenPipe, "pipe gone");
        assert!(ProtocolError::from(broken).is_disconnect());

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(!ProtocolError::from(denied).is_disconnect());

        assert!(!ProtocolError::UnknownStatus(42).is_disconnect());
    }
}
