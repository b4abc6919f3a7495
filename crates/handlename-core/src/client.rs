//! Client side of the pipe protocol.
//!
//! The host application owns the server end of the pipe and drives the
//! helper with [`HandleClient`]: one request record out, one response
//! record back.

use std::io::{ErrorKind, Read, Write};

use crate::protocol::{HandleInfo, HandleQuery, ProtocolError, ProtocolResult, RESPONSE_LEN};

/// Blocking client over any duplex byte stream.
#[derive(Debug)]
pub struct HandleClient<S> {
    stream: S,
}

impl<S: Read + Write> HandleClient<S> {
    /// Wrap a connected stream.
    #[must_use]
    pub const fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Ask for the name of `handle_value` in `process_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::ConnectionClosed`] if the helper went away
    /// before a full response arrived, or a decode error for a malformed
    /// response.
    pub fn query(&mut self, process_id: u32, handle_value: u32) -> ProtocolResult<HandleInfo> {
        let request = HandleQuery::new(process_id, handle_value).encode();
        self.stream.write_all(&request)?;
        self.stream.flush()?;

        let mut record = [0u8; RESPONSE_LEN];
        self.stream.read_exact(&mut record).map_err(|err| {
            if err.kind() == ErrorKind::UnexpectedEof {
                ProtocolError::ConnectionClosed
            } else {
                ProtocolError::Io(err)
            }
        })?;
        HandleInfo::decode(&record)
    }

    /// Unwrap the stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}
