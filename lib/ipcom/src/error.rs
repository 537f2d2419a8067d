use std::error;
use std::fmt;
use std::io;

pub type NetResult<T> = Result<T, Error>;

/// Failure kinds for the client. The parser-level recoverables
/// (`BadChecksum`, `Garbage`, `Truncated`) never leave the receive path;
/// everything else propagates to the caller.
#[derive(Debug)]
pub enum Error {
    /// Hostname did not resolve.
    Resolve(String),
    /// TCP connection refused by the peer.
    Refused(String),
    /// Connect or read exceeded its bound.
    Timeout(String),
    /// Generic socket failure, including peer resets and broken pipes.
    Io(io::Error),
    /// The handshake reply indicated failure.
    AuthRejected { reason: &'static str },
    /// The handshake reply had the wrong size or shape.
    AuthMalformed(String),
    /// Frame checksum mismatch over the wire data; the frame is dropped.
    BadChecksum { to: u8, from: u8 },
    /// Stream bytes matched no known marker; recovered by scanning.
    Garbage(usize),
    /// Partial message; recovered by waiting for more bytes.
    Truncated,
    /// Write requested before any snapshot arrived.
    NoBaseline,
    /// Module, output or level outside the allowed bounds.
    OutOfRange { what: &'static str, value: i64 },
    /// A cover action would drive both relays; converted to stop.
    ForbiddenCoverState,
    /// No inbound bytes within the configured window.
    HealthTimeout(u64),
    /// The engine is down or restarting; the operation was not queued.
    Disconnected,
    /// Invalid local configuration or device mapping.
    Config(String),
}

impl Error {
    /// True for failures the supervisor answers with a session restart.
    #[inline]
    pub fn is_restartable(&self) -> bool {
        match self {
            Error::Resolve(_)
            | Error::Refused(_)
            | Error::Timeout(_)
            | Error::Io(_)
            | Error::Disconnected
            | Error::HealthTimeout(_) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Resolve(host) => write!(f, "hostname {} did not resolve", host),
            Error::Refused(endpoint) => write!(f, "connection refused by {}", endpoint),
            Error::Timeout(what) => write!(f, "timed out: {}", what),
            Error::Io(err) => write!(f, "socket error: {}", err),
            Error::AuthRejected { reason } => write!(f, "authentication rejected ({})", reason),
            Error::AuthMalformed(detail) => write!(f, "malformed handshake reply: {}", detail),
            Error::BadChecksum { to, from } => {
                write!(f, "frame checksum mismatch (to={}, from={})", to, from)
            }
            Error::Garbage(count) => write!(f, "{} unrecognized bytes on the stream", count),
            Error::Truncated => write!(f, "partial message, waiting for more bytes"),
            Error::NoBaseline => write!(f, "no state snapshot received yet"),
            Error::OutOfRange { what, value } => write!(f, "{} out of range: {}", what, value),
            Error::ForbiddenCoverState => write!(f, "both cover relays active, forcing stop"),
            Error::HealthTimeout(secs) => write!(f, "no inbound data for {}s", secs),
            Error::Disconnected => write!(f, "engine is not connected"),
            Error::Config(detail) => write!(f, "configuration error: {}", detail),
        }
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    #[inline]
    fn from(err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Error::Refused(err.to_string()),
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Error::Timeout(err.to_string()),
            _ => Error::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_folding() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        match Error::from(refused) {
            Error::Refused(_) => {}
            other => panic!("Unexpected mapping {:?}", other),
        }

        let timeout = io::Error::from(io::ErrorKind::TimedOut);
        match Error::from(timeout) {
            Error::Timeout(_) => {}
            other => panic!("Unexpected mapping {:?}", other),
        }

        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        match Error::from(reset) {
            Error::Io(_) => {}
            other => panic!("Unexpected mapping {:?}", other),
        }
    }

    #[test]
    fn test_restartable_classification() {
        assert!(Error::Disconnected.is_restartable());
        assert!(Error::HealthTimeout(120).is_restartable());
        assert!(Error::Resolve("gw".into()).is_restartable());
        assert!(!Error::AuthRejected { reason: "status" }.is_restartable());
        assert!(!Error::NoBaseline.is_restartable());
        assert!(!Error::Config("bad".into()).is_restartable());
    }
}
