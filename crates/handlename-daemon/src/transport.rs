//! Transport loop: fixed-size records over a single connected pipe.
//!
//! The helper is a pipe *client*: the host application creates the pipe
//! and waits for the helper to connect. One request is read, resolved and
//! answered before the next is read. Each record must move in a single
//! read or write call; anything shorter ends the session.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

use handlename_core::protocol::{
    HandleInfo, HandleQuery, ProtocolError, ProtocolResult, REQUEST_LEN, RESPONSE_LEN,
};
use handlename_core::{KernelObjects, ResolverContext};
use tracing::{debug, info};

/// Open the pre-existing pipe at `path` for exclusive two-way use.
///
/// The pipe is never created here; a missing pipe is an error.
///
/// # Errors
///
/// Returns the OS error if the pipe does not exist or cannot be opened.
pub fn connect_pipe(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true);

    #[cfg(windows)]
    {
        use std::os::windows::fs::OpenOptionsExt;

        use windows_sys::Win32::Storage::FileSystem::{FILE_SHARE_READ, FILE_SHARE_WRITE};

        options.share_mode(FILE_SHARE_READ | FILE_SHARE_WRITE);
    }

    options.open(path)
}

/// Record-level view of a connected stream.
#[derive(Debug)]
pub struct Transport<S> {
    stream: S,
}

impl<S: Read + Write> Transport<S> {
    /// Wrap a connected stream.
    #[must_use]
    pub const fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Block until the next request record arrives.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::ConnectionClosed`] when the peer has gone,
    /// [`ProtocolError::ShortRead`] for a partial record, or the I/O error.
    pub fn read_request(&mut self) -> ProtocolResult<HandleQuery> {
        let mut record = [0u8; REQUEST_LEN];
        match self.stream.read(&mut record)? {
            0 => Err(ProtocolError::ConnectionClosed),
            REQUEST_LEN => Ok(HandleQuery::decode(&record)),
            got => Err(ProtocolError::short_read(got, REQUEST_LEN)),
        }
    }

    /// Send one response record.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::ShortWrite`] if the record did not go out in one
    /// call, or the I/O error.
    pub fn write_response(&mut self, info: &HandleInfo) -> ProtocolResult<()> {
        let record = info.encode();
        let wrote = self.stream.write(&record)?;
        if wrote != RESPONSE_LEN {
            return Err(ProtocolError::short_write(wrote, RESPONSE_LEN));
        }
        self.stream.flush()?;
        Ok(())
    }

    /// Unwrap the stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

/// Serve requests until the first transport error, which is returned.
///
/// Requests are handled strictly in order on the calling thread; the only
/// other thread involved is the resolver's watchdog worker.
pub fn serve<S, K>(transport: &mut Transport<S>, resolver: &mut ResolverContext<K>) -> ProtocolError
where
    S: Read + Write,
    K: KernelObjects,
{
    let mut served: u64 = 0;
    loop {
        let query = match transport.read_request() {
            Ok(query) => query,
            Err(err) => return finish(served, err),
        };

        let info = resolver.resolve_query(&query);
        if let Err(err) = transport.write_response(&info) {
            return finish(served, err);
        }

        served += 1;
        debug!(served, "response sent");
    }
}

fn finish(served: u64, err: ProtocolError) -> ProtocolError {
    info!(served, error = %err, "transport loop ended");
    err
}
