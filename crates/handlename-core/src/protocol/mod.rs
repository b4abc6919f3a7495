//! Pipe protocol: fixed-size records and their codec.
//!
//! The channel carries exactly one request record followed by exactly one
//! response record, repeated for as long as the client stays connected.
//! There is no framing, handshake or versioning: both record sizes are
//! constants and a short transfer ends the session.
//!
//! - [`error`]: Protocol error types ([`ProtocolError`], [`ProtocolResult`])
//! - [`records`]: Request/response records ([`HandleQuery`], [`HandleInfo`])
//! - [`status`]: Status taxonomy ([`HandleStatus`])

pub mod error;
pub mod records;
pub mod status;

pub use error::{ProtocolError, ProtocolResult};
pub use records::{
    HandleInfo, HandleQuery, MIN_NAME_LEN, NAME_BUFFER_LEN, NAME_HEADER_LEN, REQUEST_LEN,
    RESPONSE_HEADER_LEN, RESPONSE_LEN, encode_name_record,
};
pub use status::HandleStatus;

/// Default well-known pipe the helper connects to.
pub const DEFAULT_PIPE_PATH: &str = r"\\.\pipe\ComViewHandle";
