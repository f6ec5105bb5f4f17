use std::io;
use thiserror::Error;

/// A probing error result.
pub type Result<T> = std::result::Result<T, Error>;

/// A probing error.
///
/// A probe that is not answered in time is not an error, see
/// [`ProbeOutcome::Timeout`](crate::session::ProbeOutcome::Timeout).
#[derive(Error, Debug)]
pub enum Error {
    #[error("unable to resolve {host}: {reason}")]
    AddressResolution { host: String, reason: String },
    #[error("failed to send probe: {0}")]
    SendFailure(io::Error),
    #[error("malformed packet, minimum={expected}, provided={actual}")]
    MalformedPacket { expected: usize, actual: usize },
    #[error("invalid config: {0}")]
    BadConfig(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
